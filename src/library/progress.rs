//! Reading progress: last committed sentence index per book.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::BookCatalog;
use crate::error::VoxError;

/// Persistence contract for reading progress.
///
/// Writes are visible to the next `get` in the same process. Range checking
/// is the caller's job; readers clamp.
pub trait ProgressStore: Send + Sync {
    /// Last position for `book_id`, 0 when nothing was recorded.
    fn get(&self, book_id: u64) -> Result<usize, VoxError>;
    fn set(&self, book_id: u64, index: usize) -> Result<(), VoxError>;
}

/// Writes progress through to [`Book::last_position`](super::Book::last_position).
#[derive(Clone)]
pub struct CatalogProgressStore {
    catalog: Arc<dyn BookCatalog>,
}

impl CatalogProgressStore {
    pub fn new(catalog: Arc<dyn BookCatalog>) -> Self {
        Self { catalog }
    }
}

impl ProgressStore for CatalogProgressStore {
    fn get(&self, book_id: u64) -> Result<usize, VoxError> {
        Ok(self
            .catalog
            .get(book_id)?
            .map(|book| book.last_position)
            .unwrap_or(0))
    }

    fn set(&self, book_id: u64, index: usize) -> Result<(), VoxError> {
        let mut book = self
            .catalog
            .get(book_id)?
            .ok_or(VoxError::BookNotFound(book_id))?;
        if book.last_position == index {
            return Ok(());
        }
        book.last_position = index;
        self.catalog.update(&book)?;
        tracing::debug!(book_id, index, "Committed reading progress");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    positions: Mutex<HashMap<u64, usize>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressStore for MemoryProgressStore {
    fn get(&self, book_id: u64) -> Result<usize, VoxError> {
        Ok(self
            .positions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&book_id)
            .copied()
            .unwrap_or(0))
    }

    fn set(&self, book_id: u64, index: usize) -> Result<(), VoxError> {
        self.positions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(book_id, index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{MemoryCatalog, NewBook};

    #[test]
    fn unknown_book_reads_as_zero() {
        let store = MemoryProgressStore::new();
        assert_eq!(store.get(9).unwrap(), 0);
    }

    #[test]
    fn catalog_store_writes_through_to_book() {
        let catalog: Arc<dyn BookCatalog> = Arc::new(MemoryCatalog::new());
        let book = catalog
            .add(NewBook::builder().title("T").source_ref("t.txt").build())
            .unwrap();
        let store = CatalogProgressStore::new(Arc::clone(&catalog));

        store.set(book.id, 5).unwrap();

        assert_eq!(store.get(book.id).unwrap(), 5);
        assert_eq!(catalog.get(book.id).unwrap().unwrap().last_position, 5);
    }

    #[test]
    fn catalog_store_rejects_unknown_book_on_write() {
        let store = CatalogProgressStore::new(Arc::new(MemoryCatalog::new()));
        assert!(matches!(store.set(3, 1), Err(VoxError::BookNotFound(3))));
        assert_eq!(store.get(3).unwrap(), 0);
    }
}
