//! In-memory client, API and user directories

use super::{MemoryAuthStorage, lock};
use crate::errors::StorageError;
use crate::oauth::types::{ApiRecord, Client, User};
use crate::storage::traits::*;
use async_trait::async_trait;

impl MemoryAuthStorage {
    fn with_user<F>(&self, user_id: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut User),
    {
        let mut users = lock(&self.users)?;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| StorageError::NotFound(format!("User {}", user_id)))?;
        update(user);
        Ok(())
    }
}

#[async_trait]
impl ClientStore for MemoryAuthStorage {
    async fn store_client(&self, client: &Client) -> Result<()> {
        let mut clients = lock(&self.clients)?;
        clients.insert(client.client_id.clone(), client.clone());
        Ok(())
    }

    async fn get_client_by_client_id(&self, client_id: &str) -> Result<Option<Client>> {
        let clients = lock(&self.clients)?;
        Ok(clients.get(client_id).cloned())
    }
}

#[async_trait]
impl ApiStore for MemoryAuthStorage {
    async fn store_api(&self, api: &ApiRecord) -> Result<()> {
        let mut apis = lock(&self.apis)?;
        apis.insert(api.identifier.clone(), api.clone());
        Ok(())
    }

    async fn find_api_by_audience(&self, audience: &str) -> Result<Option<ApiRecord>> {
        let apis = lock(&self.apis)?;
        Ok(apis.get(audience).cloned())
    }
}

#[async_trait]
impl UserStore for MemoryAuthStorage {
    async fn store_user(&self, user: &User) -> Result<()> {
        let mut users = lock(&self.users)?;
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>> {
        let users = lock(&self.users)?;
        Ok(users.get(user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let users = lock(&self.users)?;
        Ok(users
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn block_ip_for_user(&self, user_id: &str, ip: &str) -> Result<()> {
        self.with_user(user_id, |user| {
            user.blocked_for.insert(ip.to_string());
        })
    }

    async fn unblock_ip_for_user(&self, user_id: &str, ip: &str) -> Result<()> {
        self.with_user(user_id, |user| {
            user.blocked_for.remove(ip);
        })
    }

    async fn increment_login_count(&self, user_id: &str) -> Result<()> {
        self.with_user(user_id, |user| user.login_count += 1)
    }

    async fn mark_email_verified(&self, user_id: &str) -> Result<()> {
        self.with_user(user_id, |user| user.email_verified = true)
    }

    async fn update_password(
        &self,
        user_id: &str,
        password_hash: &str,
        password_history: &[String],
    ) -> Result<()> {
        self.with_user(user_id, |user| {
            user.password_hash = password_hash.to_string();
            user.password_history = password_history.to_vec();
        })
    }
}
