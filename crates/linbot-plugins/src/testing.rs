//! Test helpers: plugin environments and a scripted gateway.

use std::sync::Arc;

use linbot_core::{
    ConnectionSlot, CorrelationBroker, PluginEnv, PluginRegistry, ProcessControl, SessionTable,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

pub(crate) fn env_for(registry: &PluginRegistry) -> PluginEnv {
    PluginEnv::new(
        Arc::new(CorrelationBroker::new(Arc::new(ConnectionSlot::new()))),
        SessionTable::new(),
        ProcessControl::new(),
        registry.catalog(),
    )
}

/// Answers API requests from a closure.
///
/// `Some(data)` becomes an ok reply carrying `data`; `None` a failed one.
pub(crate) struct FakeGateway {
    broker: Arc<CorrelationBroker>,
    requests: Arc<Mutex<Vec<Value>>>,
    _slot: Arc<ConnectionSlot>,
}

impl FakeGateway {
    pub(crate) fn start<F>(respond: F) -> Self
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + 'static,
    {
        let slot = Arc::new(ConnectionSlot::new());
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(16);
        slot.attach(tx);

        let broker = Arc::new(CorrelationBroker::new(slot.clone()));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let task_broker = Arc::clone(&broker);
        let task_requests = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let request: Value = serde_json::from_slice(&frame).unwrap();
                task_requests.lock().push(request.clone());

                let action = request["action"].as_str().unwrap_or_default();
                let reply = match respond(action, &request["params"]) {
                    Some(data) => json!({
                        "status": "ok", "retcode": 0, "data": data, "echo": request["echo"],
                    }),
                    None => json!({
                        "status": "failed", "retcode": 100, "msg": "rejected", "echo": request["echo"],
                    }),
                };
                task_broker.route_inbound(&reply);
            }
        });

        Self {
            broker,
            requests,
            _slot: slot,
        }
    }

    pub(crate) fn broker(&self) -> Arc<CorrelationBroker> {
        Arc::clone(&self.broker)
    }

    pub(crate) fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }
}
