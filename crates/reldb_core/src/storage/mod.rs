//! In-memory relational storage.
//!
//! A [`Catalog`] is one immutable version of the store. Transactions work
//! on a private copy and the committed version is swapped atomically.

mod catalog;
mod table;

pub use catalog::Catalog;
pub use table::Table;

use crate::types::RowId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Store-wide source of row IDs.
///
/// Shared by all transactions of an engine so concurrently inserted rows
/// never collide.
#[derive(Debug, Clone, Default)]
pub struct RowIdAllocator(Arc<AtomicU64>);

impl RowIdAllocator {
    /// Creates an allocator whose first ID is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh row ID.
    pub fn allocate(&self) -> RowId {
        RowId::new(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_is_shared_between_clones() {
        let a = RowIdAllocator::new();
        let b = a.clone();
        assert_eq!(a.allocate(), RowId::new(1));
        assert_eq!(b.allocate(), RowId::new(2));
    }
}
