//! In-memory artifact storage

use super::{MemoryAuthStorage, lock};
use crate::storage::traits::*;
use async_trait::async_trait;
use chrono::Utc;
use ulid::Ulid;

#[async_trait]
impl ArtifactStore for MemoryAuthStorage {
    async fn create_artifact(&self, artifact: NewArtifact) -> Result<ArtifactRecord> {
        let now = Utc::now();
        let record = ArtifactRecord {
            id: Ulid::new().to_string(),
            kind: artifact.kind,
            payload: artifact.payload,
            consumed: false,
            session_id: artifact.session_id,
            created_at: now,
            updated_at: now,
            expires_at: artifact.expires_at,
        };

        let mut artifacts = lock(&self.artifacts)?;
        artifacts.insert((record.kind, record.id.clone()), record.clone());
        Ok(record)
    }

    async fn find_artifact(&self, kind: ArtifactKind, id: &str) -> Result<Option<ArtifactRecord>> {
        let artifacts = lock(&self.artifacts)?;
        let now = Utc::now();
        Ok(artifacts
            .get(&(kind, id.to_string()))
            .filter(|record| record.is_live(now))
            .cloned())
    }

    async fn lock_artifact(&self, kind: ArtifactKind, id: &str) -> Result<Option<ArtifactRecord>> {
        // Check and set happen under one guard
        let mut artifacts = lock(&self.artifacts)?;
        let now = Utc::now();
        match artifacts.get_mut(&(kind, id.to_string())) {
            Some(record) if !record.consumed && record.is_live(now) => {
                record.consumed = true;
                record.updated_at = now;
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_artifact(&self, kind: ArtifactKind, id: &str) -> Result<()> {
        let mut artifacts = lock(&self.artifacts)?;
        artifacts.remove(&(kind, id.to_string()));
        Ok(())
    }

    async fn delete_artifacts_by_session(
        &self,
        kind: ArtifactKind,
        session_id: &str,
    ) -> Result<usize> {
        let mut artifacts = lock(&self.artifacts)?;
        let initial_count = artifacts.len();
        artifacts.retain(|(record_kind, _), record| {
            *record_kind != kind || record.session_id.as_deref() != Some(session_id)
        });
        Ok(initial_count - artifacts.len())
    }

    async fn cleanup_expired_artifacts(&self) -> Result<usize> {
        let mut artifacts = lock(&self.artifacts)?;
        let now = Utc::now();
        let initial_count = artifacts.len();
        artifacts.retain(|_, record| record.is_live(now));
        Ok(initial_count - artifacts.len())
    }
}
