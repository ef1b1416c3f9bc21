//! Inbound frame routing.
//!
//! Every frame from the gateway is offered to the correlation broker first.
//! Whatever the broker does not consume is classified; chat messages that
//! pass room gating are dispatched on their own task and the reply is sent
//! back through the same connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use linbot_core::{
    ApiRequest, ChatEvent, ConnectionId, ConnectionSlot, CorrelationBroker, Dispatcher,
    FriendInfo, GroupInfo, InboundFrame,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::server::ConnectionHandler;

/// Behaviour switches for [`FrameRouter`].
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Answer unhandled private messages with a pointer to `帮助`.
    pub fallback_reply: bool,
    /// Deadline for the friend and group list fetch on connect.
    pub roster_timeout: Duration,
    pub fetch_roster_on_connect: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            fallback_reply: false,
            roster_timeout: Duration::from_secs(5),
            fetch_roster_on_connect: true,
        }
    }
}

/// Reply for a private message no handler answered.
pub fn fallback_reply(text: &str) -> String {
    format!("收到消息: {text}\n输入 \"帮助\" 查看支持的命令")
}

/// Connects the WebSocket server to the broker and the dispatcher.
#[derive(Clone)]
pub struct FrameRouter {
    slot: Arc<ConnectionSlot>,
    broker: Arc<CorrelationBroker>,
    dispatcher: Dispatcher,
    options: RouterOptions,
}

impl FrameRouter {
    pub fn new(
        slot: Arc<ConnectionSlot>,
        broker: Arc<CorrelationBroker>,
        dispatcher: Dispatcher,
        options: RouterOptions,
    ) -> Self {
        Self {
            slot,
            broker,
            dispatcher,
            options,
        }
    }

    /// Routes one raw frame.
    pub fn route(&self, data: &[u8]) {
        let frame: Value = match serde_json::from_slice(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, len = data.len(), "Dropping unparsable frame");
                return;
            }
        };

        if self.broker.route_inbound(&frame) {
            return;
        }

        match InboundFrame::classify(&frame) {
            InboundFrame::Message(event) => self.on_message(*event),
            InboundFrame::Other { post_type } => {
                trace!(post_type = %post_type, "Ignoring non-message event");
            }
            InboundFrame::Unknown => {
                trace!("Ignoring unrecognised frame");
            }
        }
    }

    fn on_message(&self, event: ChatEvent) {
        if let Some(room) = event.room_id()
            && !self.dispatcher.registry().is_room_enabled(room)
        {
            trace!(group_id = room, "Group not enabled, message ignored");
            return;
        }

        info!(
            message_type = ?event.message_type,
            user_id = event.user_id,
            group_id = ?event.group_id,
            sender = %event.sender_name(),
            text = %event.plain_text(),
            "Received message"
        );

        let router = self.clone();
        tokio::spawn(async move {
            if let Some(request) = router.reply_for(&event).await
                && let Err(e) = router.broker.send(request).await
            {
                warn!(user_id = event.user_id, error = %e, "Failed to deliver reply");
            }
        });
    }

    /// Dispatches `event` and builds the reply request, if there is one.
    pub async fn reply_for(&self, event: &ChatEvent) -> Option<ApiRequest> {
        let text = event.plain_text();
        let reply = match self.dispatcher.dispatch(&text, event).await {
            Some(reply) => reply,
            None if self.options.fallback_reply && !event.is_group() => {
                fallback_reply(text.trim())
            }
            None => return None,
        };

        Some(match event.room_id() {
            Some(group_id) => ApiRequest::send_group_msg(group_id, &reply),
            None => ApiRequest::send_private_msg(event.user_id, &reply),
        })
    }

    async fn fetch_roster(&self) {
        let timeout = self.options.roster_timeout;
        let (friends, groups) = tokio::join!(
            self.broker
                .call::<Vec<FriendInfo>>("get_friend_list", json!({}), timeout),
            self.broker
                .call::<Vec<GroupInfo>>("get_group_list", json!({}), timeout),
        );

        match friends {
            Ok(friends) => {
                info!(count = friends.len(), "Fetched friend list");
                for friend in &friends {
                    debug!(user_id = friend.user_id, nickname = %friend.nickname, remark = %friend.remark, "Friend");
                }
            }
            Err(e) => warn!(error = %e, "Failed to fetch friend list"),
        }
        match groups {
            Ok(groups) => {
                info!(count = groups.len(), "Fetched group list");
                for group in &groups {
                    debug!(group_id = group.group_id, name = %group.group_name, members = group.member_count, "Group");
                }
            }
            Err(e) => warn!(error = %e, "Failed to fetch group list"),
        }
    }
}

#[async_trait]
impl ConnectionHandler for FrameRouter {
    async fn on_connect(&self, remote: SocketAddr, tx: mpsc::Sender<Vec<u8>>) -> ConnectionId {
        let (id, replaced) = self.slot.attach(tx);
        if let Some(old) = replaced {
            info!(connection = id, replaced = old, remote_addr = %remote, "Gateway reconnected, replacing previous connection");
            self.broker.reject_all();
        }

        if self.options.fetch_roster_on_connect {
            let router = self.clone();
            tokio::spawn(async move { router.fetch_roster().await });
        }
        id
    }

    async fn on_frame(&self, _id: ConnectionId, data: &[u8]) {
        self.route(data);
    }

    async fn on_disconnect(&self, id: ConnectionId) {
        if self.slot.detach(id) {
            info!(connection = id, "Gateway disconnected");
            self.broker.reject_all();
        } else {
            debug!(connection = id, "Stale connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};

    use linbot_core::{
        ApiError, MemoryStore, PluginEnv, PluginRegistry, ProcessControl, SessionTable,
    };

    use super::*;

    struct Harness {
        router: FrameRouter,
        registry: PluginRegistry,
        broker: Arc<CorrelationBroker>,
    }

    fn harness(options: RouterOptions) -> Harness {
        let slot = Arc::new(ConnectionSlot::new());
        let broker = Arc::new(CorrelationBroker::new(slot.clone()));
        let registry = PluginRegistry::new(Arc::new(MemoryStore::new()));
        let env = PluginEnv::new(
            Arc::clone(&broker),
            SessionTable::new(),
            ProcessControl::new(),
            registry.catalog(),
        );
        registry.load(linbot_plugins::BUILTIN_GROUPS, &env);

        let router = FrameRouter::new(
            slot,
            Arc::clone(&broker),
            Dispatcher::new(registry.clone()),
            options,
        );
        Harness {
            router,
            registry,
            broker,
        }
    }

    fn quiet() -> RouterOptions {
        RouterOptions {
            fetch_roster_on_connect: false,
            ..Default::default()
        }
    }

    fn remote() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 40000))
    }

    fn frame(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    fn private_frame(user_id: i64, text: &str) -> Vec<u8> {
        frame(json!({
            "post_type": "message",
            "message_type": "private",
            "message_id": 1,
            "user_id": user_id,
            "message": [{"type": "text", "data": {"text": text}}],
            "raw_message": text,
            "sender": {"user_id": user_id, "nickname": "tester"},
        }))
    }

    #[tokio::test]
    async fn test_private_command_is_answered() {
        let h = harness(quiet());
        let (tx, mut rx) = mpsc::channel(8);
        let id = h.router.on_connect(remote(), tx).await;

        h.router.on_frame(id, &private_frame(42, "帮助")).await;

        let sent: Value = serde_json::from_slice(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(sent["action"], "send_private_msg");
        assert_eq!(sent["params"]["user_id"], 42);
        let message = sent["params"]["message"].as_str().unwrap();
        assert!(message.starts_with("支持的命令："));
        assert!(message.contains("帮助: 显示帮助信息"));
    }

    #[tokio::test]
    async fn test_group_messages_are_gated_by_room() {
        let h = harness(quiet());
        let event = ChatEvent::group(777, 42, "帮助");
        assert!(!h.registry.is_room_enabled(777));
        let (tx, mut rx) = mpsc::channel(8);
        let id = h.router.on_connect(remote(), tx).await;
        h.router
            .on_frame(
                id,
                &frame(json!({
                    "post_type": "message",
                    "message_type": "group",
                    "message_id": 2,
                    "user_id": 42,
                    "group_id": 777,
                    "message": "帮助",
                    "raw_message": "帮助",
                    "sender": {"user_id": 42},
                })),
            )
            .await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        h.registry.set_room_enabled(777, true);
        let request = h.router.reply_for(&event).await.unwrap();
        assert_eq!(request.action, "send_group_msg");
        assert_eq!(request.params["group_id"], 777);
    }

    #[tokio::test]
    async fn test_fallback_reply_only_when_enabled() {
        let h = harness(quiet());
        let event = ChatEvent::private(42, "  hello  ");
        assert!(h.router.reply_for(&event).await.is_none());

        let h = harness(RouterOptions {
            fallback_reply: true,
            ..quiet()
        });
        let request = h.router.reply_for(&event).await.unwrap();
        assert_eq!(
            request.params["message"],
            "收到消息: hello\n输入 \"帮助\" 查看支持的命令"
        );

        h.registry.set_room_enabled(1, true);
        assert!(h.router.reply_for(&ChatEvent::group(1, 42, "hello")).await.is_none());
    }

    #[tokio::test]
    async fn test_reply_frames_resolve_pending_calls() {
        let h = harness(quiet());
        let (tx, mut rx) = mpsc::channel(8);
        let id = h.router.on_connect(remote(), tx).await;

        let broker = Arc::clone(&h.broker);
        let call = tokio::spawn(async move {
            broker
                .call::<Vec<FriendInfo>>("get_friend_list", json!({}), Duration::from_secs(5))
                .await
        });

        let request: Value = serde_json::from_slice(&rx.recv().await.unwrap()).unwrap();
        h.router
            .on_frame(
                id,
                &frame(json!({
                    "status": "ok",
                    "retcode": 0,
                    "data": [{"user_id": 7, "nickname": "seven"}],
                    "echo": request["echo"],
                })),
            )
            .await;

        let friends = call.await.unwrap().unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].nickname, "seven");
    }

    #[tokio::test]
    async fn test_disconnect_rejects_pending_calls() {
        let h = harness(quiet());
        let (tx, mut rx) = mpsc::channel(8);
        let id = h.router.on_connect(remote(), tx).await;

        let broker = Arc::clone(&h.broker);
        let call = tokio::spawn(async move {
            broker
                .issue(ApiRequest::new("get_group_list"), Duration::from_secs(30))
                .await
        });
        rx.recv().await.unwrap();

        h.router.on_disconnect(id).await;
        assert!(matches!(call.await.unwrap(), Err(ApiError::ConnectionLost)));
        assert_eq!(h.broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_connection() {
        let h = harness(quiet());
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let first = h.router.on_connect(remote(), tx1).await;
        let second = h.router.on_connect(remote(), tx2).await;

        // The old socket closing must not detach the new one.
        h.router.on_disconnect(first).await;
        h.router.on_frame(second, &private_frame(5, "帮助")).await;
        let sent: Value = serde_json::from_slice(&rx2.recv().await.unwrap()).unwrap();
        assert_eq!(sent["params"]["user_id"], 5);
    }

    #[tokio::test]
    async fn test_roster_fetched_on_connect() {
        let h = harness(RouterOptions::default());
        let (tx, mut rx) = mpsc::channel(8);
        h.router.on_connect(remote(), tx).await;

        let mut actions = Vec::new();
        for _ in 0..2 {
            let request: Value = serde_json::from_slice(&rx.recv().await.unwrap()).unwrap();
            actions.push(request["action"].as_str().unwrap().to_string());
        }
        actions.sort();
        assert_eq!(actions, vec!["get_friend_list", "get_group_list"]);
    }

    #[tokio::test]
    async fn test_garbage_frames_are_dropped() {
        let h = harness(quiet());
        let (tx, mut rx) = mpsc::channel(8);
        let id = h.router.on_connect(remote(), tx).await;

        h.router.on_frame(id, b"not json").await;
        h.router
            .on_frame(id, &frame(json!({"post_type": "meta_event", "meta_event_type": "heartbeat"})))
            .await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }
}
