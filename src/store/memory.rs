use async_trait::async_trait;

use crate::model::Record;

use super::{Journal, StoreError, Tables};

/// Tables with no durability. For tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    tables: Tables,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Journal for MemoryStore {
    fn tables(&self) -> &Tables {
        &self.tables
    }

    async fn commit(&self, record: Record) -> Result<(), StoreError> {
        self.tables.apply(&record);
        Ok(())
    }
}
