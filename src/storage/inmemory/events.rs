//! In-memory audit event log

use super::{MemoryAuthStorage, lock};
use crate::oauth::types::AuditEvent;
use crate::storage::traits::*;
use async_trait::async_trait;

#[async_trait]
impl EventStore for MemoryAuthStorage {
    async fn record_event(&self, event: &AuditEvent) -> Result<()> {
        let mut events = lock(&self.events)?;
        events.push(event.clone());
        Ok(())
    }

    async fn list_events(&self, limit: Option<usize>) -> Result<Vec<AuditEvent>> {
        let events = lock(&self.events)?;
        let mut result: Vec<_> = events.iter().rev().cloned().collect();
        if let Some(limit) = limit {
            result.truncate(limit);
        }
        Ok(result)
    }
}
