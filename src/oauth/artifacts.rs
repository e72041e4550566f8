//! Generic encrypted artifact manager.
//!
//! Wraps an [`ArtifactStore`] for one [`ArtifactKind`]: payloads are sealed
//! before they reach the store, and the raw store id is sealed before it
//! leaves this layer. Any external id that fails to open is reported as
//! [`ArtifactError::NotFound`], exactly like a missing record.

use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::errors::{ArtifactError, StorageError};
use crate::oauth::crypto::CryptoBox;
use crate::storage::traits::{ArtifactKind, ArtifactRecord, ArtifactStore, NewArtifact};

/// An opened artifact, addressed by its external (sealed) id
#[derive(Debug, Clone)]
pub struct Artifact<P> {
    pub external_id: String,
    pub payload: P,
    pub consumed: bool,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Store + crypto pairing for one artifact kind
pub struct EncryptedArtifacts<P> {
    store: Arc<dyn ArtifactStore>,
    crypto: CryptoBox,
    kind: ArtifactKind,
    ttl: Duration,
    _payload: PhantomData<fn() -> P>,
}

impl<P> Clone for EncryptedArtifacts<P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            crypto: self.crypto.clone(),
            kind: self.kind,
            ttl: self.ttl,
            _payload: PhantomData,
        }
    }
}

impl<P> EncryptedArtifacts<P>
where
    P: Serialize + DeserializeOwned,
{
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        crypto: CryptoBox,
        kind: ArtifactKind,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            crypto,
            kind,
            ttl,
            _payload: PhantomData,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Persist `payload` with the default lifetime
    pub async fn create(
        &self,
        payload: P,
        session_id: Option<&str>,
    ) -> Result<Artifact<P>, ArtifactError> {
        self.create_with_ttl(payload, session_id, self.ttl).await
    }

    /// Persist `payload` with an explicit lifetime
    pub async fn create_with_ttl(
        &self,
        payload: P,
        session_id: Option<&str>,
        ttl: Duration,
    ) -> Result<Artifact<P>, ArtifactError> {
        let serialized = serde_json::to_vec(&payload)
            .map_err(|e| StorageError::SerializationFailed(e.to_string()))?;
        let sealed_payload = self.crypto.encrypt(&serialized)?;

        let record = self
            .store
            .create_artifact(NewArtifact {
                kind: self.kind,
                payload: sealed_payload,
                session_id: session_id.map(str::to_string),
                expires_at: Utc::now() + ttl,
            })
            .await?;

        let external_id = self.crypto.encrypt_str(&record.id)?;
        Ok(Artifact {
            external_id,
            payload,
            consumed: record.consumed,
            session_id: record.session_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
            expires_at: record.expires_at,
        })
    }

    /// Load a live artifact by external id
    pub async fn find_by_id(&self, external_id: &str) -> Result<Artifact<P>, ArtifactError> {
        let raw_id = self.open_id(external_id)?;
        let record = self
            .store
            .find_artifact(self.kind, &raw_id)
            .await?
            .ok_or(ArtifactError::NotFound)?;
        self.open_record(external_id, record)
    }

    /// Atomically claim a live, unconsumed artifact. Only one caller wins.
    pub async fn find_and_lock(&self, external_id: &str) -> Result<Artifact<P>, ArtifactError> {
        let raw_id = self.open_id(external_id)?;
        let record = self
            .store
            .lock_artifact(self.kind, &raw_id)
            .await?
            .ok_or(ArtifactError::NotFound)?;
        self.open_record(external_id, record)
    }

    /// Delete by external id. Unknown or unreadable ids are ignored.
    pub async fn delete(&self, external_id: &str) -> Result<(), ArtifactError> {
        match self.open_id(external_id) {
            Ok(raw_id) => Ok(self.store.delete_artifact(self.kind, &raw_id).await?),
            Err(_) => Ok(()),
        }
    }

    /// Delete every artifact of this kind issued under `session_id`
    pub async fn delete_by_session(&self, session_id: &str) -> Result<usize, ArtifactError> {
        Ok(self
            .store
            .delete_artifacts_by_session(self.kind, session_id)
            .await?)
    }

    fn open_id(&self, external_id: &str) -> Result<String, ArtifactError> {
        self.crypto
            .decrypt_str(external_id)
            .map_err(|_| ArtifactError::NotFound)
    }

    fn open_record(
        &self,
        external_id: &str,
        record: ArtifactRecord,
    ) -> Result<Artifact<P>, ArtifactError> {
        let payload = self
            .crypto
            .decrypt(&record.payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<P>(&bytes).ok())
            .ok_or_else(|| {
                tracing::error!(kind = self.kind.as_str(), "stored artifact payload is unreadable");
                ArtifactError::NotFound
            })?;

        Ok(Artifact {
            external_id: external_id.to_string(),
            payload,
            consumed: record.consumed,
            session_id: record.session_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
            expires_at: record.expires_at,
        })
    }
}
