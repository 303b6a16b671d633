//! What a handle keeps and what it loses on a trip through the cache.
//!
//! | State                  | Implicit            | Explicit                        |
//! |------------------------|---------------------|---------------------------------|
//! | Tuning settings        | kept                | kept                            |
//! | Binds, result set      | cleared / stale     | cleared / stale                 |
//! | Update count           | reset to 0          | kept (or -1 once reported)      |
//! | Generated keys         | cleared             | kept                            |
//! | Batches                | cleared             | last batch re-armed             |
//! | Parameter/result descr | kept                | kept                            |

use crate::handle::StatementHandle;
use crate::mode::CacheMode;

/// Applies the park/checkout rules of one [`CacheMode`].
#[derive(Debug, Clone, Copy)]
pub struct StatementLifecycle {
    mode: CacheMode,
}

impl StatementLifecycle {
    pub fn new(mode: CacheMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Strip per-use state before the handle is parked.
    pub fn on_release(&self, handle: &mut StatementHandle) {
        handle.invalidate_results();
        handle.clear_parameters();

        match self.mode {
            CacheMode::Implicit => {
                handle.reset_update_count();
                handle.forget_generated_keys();
                handle.discard_batches();
            }
            CacheMode::Explicit => {
                handle.rearm_batch();
            }
        }

        handle.mark_parked();
        tracing::trace!(sql = handle.sql(), mode = ?self.mode, "statement parked");
    }

    /// Prepare a parked handle for its next user.
    pub fn on_checkout(&self, handle: &mut StatementHandle) {
        handle.mark_checked_out();
        tracing::trace!(
            sql = handle.sql(),
            checkouts = handle.checkouts(),
            pending_batch = handle.pending_batch_len(),
            "statement checked out"
        );
    }
}
