//! Hook repository for database operations
//!
//! Persists [`HookRegistration`]s in the `hooks` table, sealing the token and
//! secret with the instance id as associated data.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use thiserror::Error;

use crate::crypto::{CredentialCipher, CryptoError};
use crate::error::is_unique_violation;
use crate::models::hook::{self, Entity as Hook};
use crate::registry::HookRegistration;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a hook is already registered for instance {instance}")]
    AlreadyExists { instance: String },
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("credential error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Fields of a registration about to be persisted.
#[derive(Clone)]
pub struct NewHook {
    pub instance_id: String,
    pub org_id: String,
    pub owner: String,
    pub repo: String,
    pub token: String,
    pub secret: String,
    pub hook_id: i64,
}

#[async_trait]
pub trait HookStore: Send + Sync {
    async fn insert(&self, hook: NewHook) -> Result<HookRegistration, StoreError>;

    async fn find_by_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<HookRegistration>, StoreError>;

    /// Returns whether a row was removed.
    async fn delete_by_instance(&self, instance_id: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone)]
pub struct HookRepository {
    db: Arc<DatabaseConnection>,
    cipher: CredentialCipher,
}

impl HookRepository {
    pub fn new(db: Arc<DatabaseConnection>, cipher: CredentialCipher) -> Self {
        Self { db, cipher }
    }

    fn to_registration(&self, model: hook::Model) -> Result<HookRegistration, StoreError> {
        let token = self.cipher.open(&model.instance_id, &model.token_ciphertext)?;
        let secret = self.cipher.open(&model.instance_id, &model.secret_ciphertext)?;

        Ok(HookRegistration {
            id: model.id,
            instance_id: model.instance_id,
            org_id: model.org_id,
            owner: model.owner,
            repo: model.repo,
            token,
            secret,
            hook_id: model.hook_id,
            created_at: model.created_at.with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl HookStore for HookRepository {
    async fn insert(&self, new: NewHook) -> Result<HookRegistration, StoreError> {
        let active = hook::ActiveModel {
            instance_id: Set(new.instance_id.clone()),
            org_id: Set(new.org_id),
            owner: Set(new.owner),
            repo: Set(new.repo),
            token_ciphertext: Set(self.cipher.seal(&new.instance_id, &new.token)?),
            secret_ciphertext: Set(self.cipher.seal(&new.instance_id, &new.secret)?),
            hook_id: Set(new.hook_id),
            created_at: Set(Utc::now().into()),
            ..Default::default()
        };

        let model = active.insert(&*self.db).await.map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::AlreadyExists {
                    instance: new.instance_id.clone(),
                }
            } else {
                StoreError::Database(err)
            }
        })?;

        self.to_registration(model)
    }

    async fn find_by_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<HookRegistration>, StoreError> {
        Hook::find()
            .filter(hook::Column::InstanceId.eq(instance_id))
            .one(&*self.db)
            .await?
            .map(|model| self.to_registration(model))
            .transpose()
    }

    async fn delete_by_instance(&self, instance_id: &str) -> Result<bool, StoreError> {
        let result = Hook::delete_many()
            .filter(hook::Column::InstanceId.eq(instance_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
