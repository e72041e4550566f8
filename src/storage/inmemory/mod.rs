//! In-memory storage implementations
//!
//! This module provides in-memory implementations of all storage traits.
//! These implementations are suitable for development and testing.

mod artifacts;
mod directory;
mod events;
mod rate_limits;
mod sessions;

use crate::errors::StorageError;
use crate::oauth::types::{ApiRecord, AuditEvent, Client, User};
use crate::storage::traits::{ArtifactKind, ArtifactRecord, RateLimitCounter};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

pub use sessions::MemorySessionStore;

/// In-memory implementation of every persistent store
#[derive(Default)]
pub struct MemoryAuthStorage {
    artifacts: Mutex<HashMap<(ArtifactKind, String), ArtifactRecord>>,
    rate_limits: Mutex<HashMap<String, RateLimitCounter>>,
    clients: Mutex<HashMap<String, Client>>,
    apis: Mutex<HashMap<String, ApiRecord>>,
    users: Mutex<HashMap<String, User>>,
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuthStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    mutex
        .lock()
        .map_err(|e| StorageError::SerializationFailed(format!("Lock error: {}", e)))
}
