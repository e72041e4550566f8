//! PostgreSQL client, API and user directories

use super::{PostgresAuthStorage, column_error, enum_from_text, enum_to_text, query_error};
use crate::errors::StorageError;
use crate::oauth::types::{ApiRecord, Client, GrantType, User};
use crate::storage::traits::*;
use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgArguments, PgRow};

type UserUpdate<'q> = sqlx::query::Query<'q, sqlx::Postgres, PgArguments>;

fn row_to_client(row: &PgRow) -> Result<Client> {
    let application_type: String = row
        .try_get("application_type")
        .map_err(|e| column_error("application_type", e))?;
    let grant_types: Vec<String> = row
        .try_get("grant_types")
        .map_err(|e| column_error("grant_types", e))?;
    let grant_types = grant_types
        .iter()
        .map(|value| {
            value
                .parse::<GrantType>()
                .map_err(|e| StorageError::InvalidData(format!("Unknown grant type: {}", e)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Client {
        client_id: row
            .try_get("client_id")
            .map_err(|e| column_error("client_id", e))?,
        client_secret: row
            .try_get("client_secret")
            .map_err(|e| column_error("client_secret", e))?,
        client_name: row
            .try_get("client_name")
            .map_err(|e| column_error("client_name", e))?,
        application_type: enum_from_text(application_type)?,
        allowed_callback_urls: row
            .try_get("allowed_callback_urls")
            .map_err(|e| column_error("allowed_callback_urls", e))?,
        allowed_logout_urls: row
            .try_get("allowed_logout_urls")
            .map_err(|e| column_error("allowed_logout_urls", e))?,
        grant_types,
        id_token_expiry: row
            .try_get("id_token_expiry")
            .map_err(|e| column_error("id_token_expiry", e))?,
        refresh_token_expiry: row
            .try_get("refresh_token_expiry")
            .map_err(|e| column_error("refresh_token_expiry", e))?,
        scopes: row.try_get("scopes").map_err(|e| column_error("scopes", e))?,
        audience: row
            .try_get("audience")
            .map_err(|e| column_error("audience", e))?,
    })
}

fn row_to_api(row: &PgRow) -> Result<ApiRecord> {
    Ok(ApiRecord {
        name: row.try_get("name").map_err(|e| column_error("name", e))?,
        identifier: row
            .try_get("identifier")
            .map_err(|e| column_error("identifier", e))?,
        token_expiry: row
            .try_get("token_expiry")
            .map_err(|e| column_error("token_expiry", e))?,
        token_signing_alg: row
            .try_get("token_signing_alg")
            .map_err(|e| column_error("token_signing_alg", e))?,
        permissions: row
            .try_get("permissions")
            .map_err(|e| column_error("permissions", e))?,
    })
}

fn row_to_user(row: &PgRow) -> Result<User> {
    let blocked_for: Vec<String> = row
        .try_get("blocked_for")
        .map_err(|e| column_error("blocked_for", e))?;
    Ok(User {
        id: row.try_get("id").map_err(|e| column_error("id", e))?,
        email: row.try_get("email").map_err(|e| column_error("email", e))?,
        email_verified: row
            .try_get("email_verified")
            .map_err(|e| column_error("email_verified", e))?,
        password_hash: row
            .try_get("password_hash")
            .map_err(|e| column_error("password_hash", e))?,
        password_history: row
            .try_get("password_history")
            .map_err(|e| column_error("password_history", e))?,
        blocked_for: blocked_for.into_iter().collect(),
        login_count: row
            .try_get("login_count")
            .map_err(|e| column_error("login_count", e))?,
        first_name: row
            .try_get("first_name")
            .map_err(|e| column_error("first_name", e))?,
        last_name: row
            .try_get("last_name")
            .map_err(|e| column_error("last_name", e))?,
    })
}

impl PostgresAuthStorage {
    /// Run a single-user update, reporting a missing user as `NotFound`
    async fn update_user(&self, user_id: &str, query: UserUpdate<'_>) -> Result<()> {
        let result = query.execute(&self.pool).await.map_err(query_error)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("User {}", user_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ClientStore for PostgresAuthStorage {
    async fn store_client(&self, client: &Client) -> Result<()> {
        let grant_types: Vec<&str> = client.grant_types.iter().map(|g| g.as_str()).collect();
        sqlx::query(
            r#"
            INSERT INTO clients (
                client_id, client_secret, client_name, application_type,
                allowed_callback_urls, allowed_logout_urls, grant_types,
                id_token_expiry, refresh_token_expiry, scopes, audience
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (client_id) DO UPDATE SET
                client_secret = EXCLUDED.client_secret,
                client_name = EXCLUDED.client_name,
                application_type = EXCLUDED.application_type,
                allowed_callback_urls = EXCLUDED.allowed_callback_urls,
                allowed_logout_urls = EXCLUDED.allowed_logout_urls,
                grant_types = EXCLUDED.grant_types,
                id_token_expiry = EXCLUDED.id_token_expiry,
                refresh_token_expiry = EXCLUDED.refresh_token_expiry,
                scopes = EXCLUDED.scopes,
                audience = EXCLUDED.audience
            "#,
        )
        .bind(&client.client_id)
        .bind(&client.client_secret)
        .bind(&client.client_name)
        .bind(enum_to_text(&client.application_type)?)
        .bind(&client.allowed_callback_urls)
        .bind(&client.allowed_logout_urls)
        .bind(&grant_types)
        .bind(client.id_token_expiry)
        .bind(client.refresh_token_expiry)
        .bind(&client.scopes)
        .bind(&client.audience)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn get_client_by_client_id(&self, client_id: &str) -> Result<Option<Client>> {
        let row = sqlx::query("SELECT * FROM clients WHERE client_id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;
        row.as_ref().map(row_to_client).transpose()
    }
}

#[async_trait]
impl ApiStore for PostgresAuthStorage {
    async fn store_api(&self, api: &ApiRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO apis (identifier, name, token_expiry, token_signing_alg, permissions)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (identifier) DO UPDATE SET
                name = EXCLUDED.name,
                token_expiry = EXCLUDED.token_expiry,
                token_signing_alg = EXCLUDED.token_signing_alg,
                permissions = EXCLUDED.permissions
            "#,
        )
        .bind(&api.identifier)
        .bind(&api.name)
        .bind(api.token_expiry)
        .bind(&api.token_signing_alg)
        .bind(&api.permissions)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn find_api_by_audience(&self, audience: &str) -> Result<Option<ApiRecord>> {
        let row = sqlx::query("SELECT * FROM apis WHERE identifier = $1")
            .bind(audience)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;
        row.as_ref().map(row_to_api).transpose()
    }
}

#[async_trait]
impl UserStore for PostgresAuthStorage {
    async fn store_user(&self, user: &User) -> Result<()> {
        let blocked_for: Vec<String> = user.blocked_for.iter().cloned().collect();
        sqlx::query(
            r#"
            INSERT INTO users (
                id, email, email_verified, password_hash, password_history,
                blocked_for, login_count, first_name, last_name
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                email_verified = EXCLUDED.email_verified,
                password_hash = EXCLUDED.password_hash,
                password_history = EXCLUDED.password_history,
                blocked_for = EXCLUDED.blocked_for,
                login_count = EXCLUDED.login_count,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(&user.password_hash)
        .bind(&user.password_history)
        .bind(&blocked_for)
        .bind(user.login_count)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn block_ip_for_user(&self, user_id: &str, ip: &str) -> Result<()> {
        let query = sqlx::query(
            r#"
            UPDATE users SET blocked_for = CASE
                WHEN $2 = ANY(blocked_for) THEN blocked_for
                ELSE array_append(blocked_for, $2)
            END
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(ip);
        self.update_user(user_id, query).await
    }

    async fn unblock_ip_for_user(&self, user_id: &str, ip: &str) -> Result<()> {
        let query =
            sqlx::query("UPDATE users SET blocked_for = array_remove(blocked_for, $2) WHERE id = $1")
                .bind(user_id)
                .bind(ip);
        self.update_user(user_id, query).await
    }

    async fn increment_login_count(&self, user_id: &str) -> Result<()> {
        let query = sqlx::query("UPDATE users SET login_count = login_count + 1 WHERE id = $1")
            .bind(user_id);
        self.update_user(user_id, query).await
    }

    async fn mark_email_verified(&self, user_id: &str) -> Result<()> {
        let query = sqlx::query("UPDATE users SET email_verified = TRUE WHERE id = $1")
            .bind(user_id);
        self.update_user(user_id, query).await
    }

    async fn update_password(
        &self,
        user_id: &str,
        password_hash: &str,
        password_history: &[String],
    ) -> Result<()> {
        let query = sqlx::query(
            "UPDATE users SET password_hash = $2, password_history = $3 WHERE id = $1",
        )
        .bind(user_id)
        .bind(password_hash)
        .bind(password_history);
        self.update_user(user_id, query).await
    }
}
