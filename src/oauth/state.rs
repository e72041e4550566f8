//! Authorization state bound to a client at the start of the authorize redirect.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ArtifactError;
use crate::oauth::artifacts::{Artifact, EncryptedArtifacts};

/// Request context captured at `/authorize` and replayed at login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePayload {
    pub client_id: String,
    /// The `state` value supplied by the client, echoed back on redirect
    pub client_state: Option<String>,
    pub callback_url: String,
    pub scope: String,
    pub audience: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Issues, validates and consumes authorization states
#[derive(Clone)]
pub struct StateManager {
    artifacts: EncryptedArtifacts<StatePayload>,
    stale_after: Duration,
}

impl StateManager {
    pub fn new(artifacts: EncryptedArtifacts<StatePayload>, stale_after: Duration) -> Self {
        Self {
            artifacts,
            stale_after,
        }
    }

    /// Create a valid state and return its external id
    pub async fn issue(&self, payload: StatePayload) -> Result<String, ArtifactError> {
        let artifact = self.artifacts.create(payload, None).await?;
        Ok(artifact.external_id)
    }

    /// Load a state that is valid for `client_id`.
    ///
    /// Returns `None` for a missing, consumed, stale or foreign state without
    /// saying which. A stale state is additionally invalidated in the background.
    pub async fn resolve(
        &self,
        external_id: &str,
        client_id: &str,
    ) -> Option<Artifact<StatePayload>> {
        let artifact = match self.artifacts.find_by_id(external_id).await {
            Ok(artifact) => artifact,
            Err(ArtifactError::NotFound) => return None,
            Err(err) => {
                tracing::error!(error = ?err, "state lookup failed");
                return None;
            }
        };

        if Utc::now() - artifact.updated_at > self.stale_after {
            let artifacts = self.artifacts.clone();
            let external_id = external_id.to_string();
            tokio::spawn(async move {
                if let Err(err) = artifacts.find_and_lock(&external_id).await {
                    tracing::debug!(error = ?err, "stale state already invalid");
                }
                if let Err(err) = artifacts.delete(&external_id).await {
                    tracing::warn!(error = ?err, "unable to delete stale state");
                }
            });
            return None;
        }

        let client_matches = artifact.payload.client_id == client_id;
        if !client_matches | artifact.consumed {
            return None;
        }
        Some(artifact)
    }

    /// Whether the state is valid for `client_id`
    pub async fn validate(&self, external_id: &str, client_id: &str) -> bool {
        self.resolve(external_id, client_id).await.is_some()
    }

    /// Mark the state invalid. Returns `true` only for the caller that
    /// performed the transition.
    pub async fn consume(&self, external_id: &str) -> Result<bool, ArtifactError> {
        match self.artifacts.find_and_lock(external_id).await {
            Ok(_) => Ok(true),
            Err(ArtifactError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
