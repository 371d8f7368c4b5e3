use crate::{ChainError, ChainResult};
use tokio::sync::watch;

/// An edge-triggered new-best-block signal.
///
/// Fires after every successful [`crate::Repository::set_best_block_id`];
/// consecutive updates between two waits coalesce into one tick. Each ticker
/// is independent; dropping one does not affect the others.
#[derive(Debug)]
pub struct Ticker {
    rx: watch::Receiver<u64>,
}

impl Ticker {
    pub(crate) fn new(rx: watch::Receiver<u64>) -> Self {
        Self { rx }
    }

    /// Waits for the next tick. Returns [`ChainError::Closed`] once the
    /// repository is gone; that is the normal shutdown signal.
    pub async fn tick(&mut self) -> ChainResult<()> {
        self.rx.changed().await.map_err(|_| ChainError::Closed)
    }

    /// Consumes a pending tick without waiting.
    pub fn try_tick(&mut self) -> bool {
        let changed = self.rx.has_changed().unwrap_or(false);
        if changed {
            let _ = self.rx.borrow_and_update();
        }
        changed
    }
}
