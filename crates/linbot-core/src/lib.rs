//! # linbot core
//!
//! Command dispatch and request correlation for a OneBot v11 bot.
//!
//! ## Components
//!
//! - **Correlation broker** ([`CorrelationBroker`]): multiplexes concurrent
//!   API calls over the one gateway connection by `echo` id.
//! - **Plugin registry** ([`PluginRegistry`]): the live handlers, their
//!   groups, and the persisted per-command and per-room toggles.
//! - **Dispatcher** ([`Dispatcher`]): resolves a message to a handler by
//!   command prefix, then by engaged session.
//! - **Handler contract** ([`Handler`], [`PluginDescriptor`], [`PluginEnv`]).
//!
//! ```text
//! inbound frame ──echo?──▶ CorrelationBroker ──▶ waiting handler
//!        │
//!        └──message──▶ Dispatcher ──▶ Handler ──reply──▶ FrameSink
//!                                        │
//!                                        └──sub-query──▶ CorrelationBroker
//! ```
//!
//! The core owns no socket; the runtime crate plugs a WebSocket connection in
//! behind a [`ConnectionSlot`].

pub mod api;
pub mod broker;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod handler;
pub mod registry;
pub mod session;
pub mod state;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiRequest, FriendInfo, GroupInfo, GroupMemberInfo, StrangerInfo};
pub use broker::CorrelationBroker;
pub use control::ProcessControl;
pub use dispatch::{Dispatcher, handler_error_reply, match_command};
pub use error::{
    ApiError, ApiResult, SessionConflict, StateError, StateResult, TransportError,
    TransportResult,
};
pub use event::{ChatEvent, InboundFrame, MessageType, Sender, extract_plain_text};
pub use handler::{
    ApiTimeouts, BoxedHandler, BuildFn, Handler, PluginDescriptor, PluginEnv, PluginGroup,
};
pub use registry::{CommandCatalog, CommandInfo, GroupSummary, PluginRegistry};
pub use session::{SessionHandle, SessionTable};
pub use state::{JsonFileStore, MemoryStore, PersistedState, StateStore};
pub use transport::{BoxedFrameSink, ConnectionId, ConnectionSlot, FrameSink};

// Re-export for handler implementors.
pub use async_trait::async_trait;
