//! Handler-triggered process shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Lets handlers ask the runtime to exit with a given status code.
///
/// The runtime waits on [`cancelled`](Self::cancelled) alongside OS signals
/// and uses [`exit_code`](Self::exit_code) as the process status.
#[derive(Clone, Default)]
pub struct ProcessControl {
    token: CancellationToken,
    exit_code: Arc<AtomicI32>,
}

impl ProcessControl {
    /// Creates a control with exit code 0 and no pending request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown with `code` once `delay` has elapsed.
    ///
    /// The delay gives an outbound reply time to be flushed. The first
    /// request's code is kept if several race.
    pub fn request_exit(&self, code: i32, delay: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.exit_now(code);
        });
    }

    /// Requests shutdown with `code` immediately.
    pub fn exit_now(&self, code: i32) {
        if self.token.is_cancelled() {
            return;
        }
        self.exit_code.store(code, Ordering::SeqCst);
        info!(code, "Process exit requested");
        self.token.cancel();
    }

    /// Completes once an exit has been requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Returns whether an exit has been requested.
    pub fn is_exit_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Exit code of the first request, 0 if none.
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    /// Token cancelled on exit; handed to background tasks.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_delayed_exit_keeps_first_code() {
        let control = ProcessControl::new();
        control.request_exit(1, Duration::from_secs(1));
        assert!(!control.is_exit_requested());

        tokio::time::advance(Duration::from_millis(1100)).await;
        control.cancelled().await;
        control.exit_now(0);
        assert_eq!(control.exit_code(), 1);
    }
}
