//! Request/response correlation over the shared gateway connection.
//!
//! Every sub-query a handler makes goes through one [`CorrelationBroker`]:
//!
//! 1. A correlation id (`echo`) that is not currently pending is chosen.
//! 2. A one-shot channel keyed on that id is registered **before** the frame
//!    is sent, so a fast reply can never be missed.
//! 3. The request is written to the [`FrameSink`] tagged with the echo.
//! 4. The caller awaits the channel with a deadline. Whichever of reply,
//!    deadline or disconnect happens first wins; the pending entry is gone
//!    afterwards.
//!
//! Inbound frames are offered to [`route_inbound`](CorrelationBroker::route_inbound)
//! before anything else. Frames it cannot match are handed back to the caller
//! for event classification, never dropped.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::api::ApiRequest;
use crate::error::{ApiError, ApiResult};
use crate::transport::BoxedFrameSink;

type Completion = oneshot::Sender<ApiResult<Value>>;

/// Multiplexes concurrent API calls over one connection.
pub struct CorrelationBroker {
    sink: BoxedFrameSink,
    pending: Mutex<HashMap<String, Completion>>,
    echo_counter: AtomicU64,
}

impl CorrelationBroker {
    /// Creates a broker writing through `sink`.
    pub fn new(sink: BoxedFrameSink) -> Self {
        Self {
            sink,
            pending: Mutex::new(HashMap::new()),
            echo_counter: AtomicU64::new(1),
        }
    }

    /// Sends `request` and waits for the frame echoing the generated id.
    ///
    /// Returns the whole reply frame; see [`call`](Self::call) for envelope
    /// handling.
    ///
    /// # Errors
    /// [`ApiError::Timeout`] when no reply arrives in time,
    /// [`ApiError::ConnectionLost`] when there is no connection or it drops
    /// while waiting.
    pub async fn issue(&self, request: ApiRequest, deadline: Duration) -> ApiResult<Value> {
        let (echo, rx) = self.register_generated(&request.action);
        self.send_and_wait(echo, rx, request, deadline).await
    }

    /// Like [`issue`](Self::issue) but with a caller-chosen correlation id.
    ///
    /// # Errors
    /// [`ApiError::DuplicateEcho`] if `echo` is already pending.
    pub async fn issue_with_echo(
        &self,
        echo: impl Into<String>,
        request: ApiRequest,
        deadline: Duration,
    ) -> ApiResult<Value> {
        let echo = echo.into();
        let (tx, rx) = oneshot::channel();
        match self.pending.lock().entry(echo.clone()) {
            Entry::Occupied(_) => return Err(ApiError::DuplicateEcho(echo)),
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }
        self.send_and_wait(echo, rx, request, deadline).await
    }

    /// Issues `action` and decodes the `data` field of a successful reply.
    ///
    /// # Errors
    /// Everything [`issue`](Self::issue) returns, plus [`ApiError::Failed`]
    /// when the gateway reports a non-ok status.
    pub async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        params: Value,
        deadline: Duration,
    ) -> ApiResult<T> {
        let reply = self
            .issue(ApiRequest::with_params(action, params), deadline)
            .await?;
        let data = unwrap_envelope(reply)?;
        Ok(serde_json::from_value(data)?)
    }

    /// Sends `request` without waiting for any reply.
    pub async fn send(&self, request: ApiRequest) -> ApiResult<()> {
        let frame = request.to_frame(None)?;
        self.sink.send_frame(frame).await?;
        trace!(action = %request.action, "Sent uncorrelated request");
        Ok(())
    }

    /// Offers an inbound frame to the pending requests.
    ///
    /// Returns `true` if the frame completed a pending request. Unknown or
    /// late echoes return `false` and should be routed onwards.
    pub fn route_inbound(&self, frame: &Value) -> bool {
        let Some(echo) = frame.get("echo").and_then(echo_key) else {
            return false;
        };

        let completion = self.pending.lock().remove(&echo);
        match completion {
            // A receiver that already gave up (timeout raced the reply) makes
            // this frame unsolicited.
            Some(tx) => tx.send(Ok(frame.clone())).is_ok(),
            None => {
                debug!(echo = %echo, "Reply for unknown echo (timed out or unsolicited)");
                false
            }
        }
    }

    /// Rejects every pending request with [`ApiError::ConnectionLost`].
    pub fn reject_all(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if drained.is_empty() {
            return;
        }
        debug!(
            count = drained.len(),
            "Rejecting pending API calls after disconnect"
        );
        for (_, tx) in drained {
            let _ = tx.send(Err(ApiError::ConnectionLost));
        }
    }

    /// Number of requests currently waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns whether `echo` is currently pending.
    pub fn is_pending(&self, echo: &str) -> bool {
        self.pending.lock().contains_key(echo)
    }

    fn register_generated(&self, action: &str) -> (String, oneshot::Receiver<ApiResult<Value>>) {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        // Caller-chosen ids share the namespace, so a generated id may collide.
        loop {
            let n = self.echo_counter.fetch_add(1, Ordering::Relaxed);
            let echo = format!("{action}#{n}");
            if let Entry::Vacant(slot) = pending.entry(echo.clone()) {
                slot.insert(tx);
                return (echo, rx);
            }
            trace!(echo = %echo, "Generated echo already pending, retrying");
        }
    }

    async fn send_and_wait(
        &self,
        echo: String,
        rx: oneshot::Receiver<ApiResult<Value>>,
        request: ApiRequest,
        deadline: Duration,
    ) -> ApiResult<Value> {
        debug!(action = %request.action, echo = %echo, "Issuing correlated request");

        let frame = match request.to_frame(Some(&echo)) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.lock().remove(&echo);
                return Err(e.into());
            }
        };

        if let Err(e) = self.sink.send_frame(frame).await {
            self.pending.lock().remove(&echo);
            return Err(e.into());
        }

        match timeout(deadline, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without an answer.
            Ok(Err(_)) => Err(ApiError::ConnectionLost),
            Err(_) => {
                self.pending.lock().remove(&echo);
                warn!(action = %request.action, echo = %echo, ?deadline, "API call timed out");
                Err(ApiError::Timeout)
            }
        }
    }
}

/// Normalizes an `echo` value into the map key.
fn echo_key(echo: &Value) -> Option<String> {
    match echo {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Checks the OneBot response envelope and extracts `data`.
fn unwrap_envelope(mut reply: Value) -> ApiResult<Value> {
    let retcode = reply.get("retcode").and_then(Value::as_i64).unwrap_or(0);
    let failed = reply
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| s == "failed")
        || retcode != 0;

    if failed {
        let message = reply
            .get("msg")
            .or_else(|| reply.get("message"))
            .or_else(|| reply.get("wording"))
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(ApiError::Failed { retcode, message });
    }

    Ok(reply
        .get_mut("data")
        .map(Value::take)
        .unwrap_or(Value::Null))
}
