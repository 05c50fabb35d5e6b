use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

/// Default number of rows written per transaction.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Upper bound on rows per batch. A staged row binds 11 parameters and a single
/// PostgreSQL statement accepts at most 65535.
pub const MAX_BATCH_SIZE: usize = 5000;

/// Batch size in `1..=MAX_BATCH_SIZE`, shared by the staging loader and the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSize(NonZeroUsize);

impl BatchSize {
    pub fn new(size: usize) -> Option<Self> {
        if size > MAX_BATCH_SIZE {
            return None;
        }
        NonZeroUsize::new(size).map(Self)
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for BatchSize {
    fn default() -> Self {
        Self(NonZeroUsize::MIN.saturating_add(DEFAULT_BATCH_SIZE - 1))
    }
}

impl fmt::Display for BatchSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for BatchSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        raw.parse::<usize>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| format!("batch size must be an integer between 1 and {MAX_BATCH_SIZE}, got {raw:?}"))
    }
}

/// Split `items` into contiguous batches of at most `size` elements, in order.
///
/// An empty slice yields no batches; the last batch holds the remainder.
pub fn chunk<T>(items: &[T], size: BatchSize) -> std::slice::Chunks<'_, T> {
    items.chunks(size.get())
}
