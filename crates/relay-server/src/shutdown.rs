//! Graceful shutdown coordination via `CancellationToken`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default upper bound on the drain wait.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the root cancellation signal and tracks drain completion.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    initiated: AtomicBool,
    completions: Mutex<Vec<CancellationToken>>,
    drain_timeout: Option<Duration>,
}

impl ShutdownCoordinator {
    /// Create a coordinator with the default drain timeout.
    pub fn new() -> Self {
        Self::with_timeout(Some(DEFAULT_DRAIN_TIMEOUT))
    }

    /// Create a coordinator; `None` waits for the drain indefinitely.
    pub fn with_timeout(drain_timeout: Option<Duration>) -> Self {
        Self {
            token: CancellationToken::new(),
            initiated: AtomicBool::new(false),
            completions: Mutex::new(Vec::new()),
            drain_timeout,
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Register a token that fires when one component has fully drained.
    pub fn watch(&self, completion: CancellationToken) {
        self.completions.lock().push(completion);
    }

    /// Signal shutdown. Non-blocking; only the first call has any effect.
    ///
    /// Returns whether this call initiated the shutdown.
    pub fn initiate(&self) -> bool {
        if self.initiated.swap(true, Ordering::AcqRel) {
            info!("shutdown already in progress");
            return false;
        }
        warn!("relay shutdown initiated");
        self.token.cancel();
        true
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until every watched component has drained.
    ///
    /// Returns `false` if the drain timeout elapsed first.
    pub async fn await_complete(&self) -> bool {
        let completions = self.completions.lock().clone();
        let drained = futures::future::join_all(completions.iter().map(CancellationToken::cancelled));

        let Some(limit) = self.drain_timeout else {
            let _ = drained.await;
            info!("shutdown complete");
            return true;
        };

        if tokio::time::timeout(limit, drained).await.is_ok() {
            info!("shutdown complete");
            true
        } else {
            warn!("shutdown timed out after {limit:?}, some connections may still be running");
            false
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
