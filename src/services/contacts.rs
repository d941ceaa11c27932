//! Contact lookup for signed-in customers.
//!
//! The `users` table belongs to the identity service; this crate only reads
//! the email column.

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::store::StoreError;
use crate::Result;

#[async_trait]
pub trait ContactResolver: Send + Sync {
    /// Email on file for a user, if any.
    async fn email_for(&self, user_id: Uuid) -> Result<Option<String>>;
}

pub struct PgContacts {
    pool: PgPool,
}

impl PgContacts {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactResolver for PgContacts {
    async fn email_for(&self, user_id: Uuid) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> = sqlx::query_as("SELECT email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(row.and_then(|(email,)| email).filter(|e| !e.trim().is_empty()))
    }
}

/// Fixed directory, for tests and single-tenant setups.
#[derive(Default)]
pub struct StaticContacts {
    emails: RwLock<HashMap<Uuid, String>>,
}

impl StaticContacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: Uuid, email: impl Into<String>) {
        self.emails.write().insert(user_id, email.into());
    }
}

#[async_trait]
impl ContactResolver for StaticContacts {
    async fn email_for(&self, user_id: Uuid) -> Result<Option<String>> {
        Ok(self.emails.read().get(&user_id).cloned())
    }
}
