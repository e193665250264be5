use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{MiningError, Result};

/// Shared abort flag polled by miners and rule generators at the start of
/// every database scan, recursion level and rule-generation pass.
///
/// Clones share the same flag, so one handle can be given to a worker and
/// another kept by the caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    #[inline]
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(MiningError::Aborted)
        } else {
            Ok(())
        }
    }
}
