use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::EvalResult;
use crate::kernel::{KernelRegistry, LaunchParam, Selection, TilingContext};

/// Memoizes kernel selection and tiling.
///
/// The key is the full launch parameter (op parameters, every tensor descriptor and host data) plus the hardware,
/// so a launch with any differing component is a miss and gets freshly selected. Failures are not cached.
#[derive(Debug, Default)]
pub struct TilingCache {
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<(LaunchParam, TilingContext), Selection>,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl TilingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&self, registry: &KernelRegistry, param: &LaunchParam, ctx: &TilingContext) -> EvalResult<Selection> {
        let key = (param.clone(), *ctx);

        {
            let mut inner = self.inner();
            if let Some(selection) = inner.entries.get(&key).cloned() {
                inner.hits += 1;
                return Ok(selection);
            }
            inner.misses += 1;
        }

        // select without holding the lock, tiling can be slow
        let selection = registry.select(param, ctx)?;
        self.inner().entries.insert(key, selection.clone());
        Ok(selection)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner();
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    pub fn clear(&self) {
        self.inner().entries.clear();
    }

    fn inner(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
