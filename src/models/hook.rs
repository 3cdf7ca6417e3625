//! Hook entity model
//!
//! One row per broker service instance. Credential columns hold sealed bytes
//! (see [`crate::crypto`]), never plaintext once a key is configured.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "hooks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Broker service instance id; unique
    #[sea_orm(unique)]
    pub instance_id: String,

    /// Platform organization the instance was provisioned for
    pub org_id: String,

    pub owner: String,

    pub repo: String,

    pub token_ciphertext: Vec<u8>,

    pub secret_ciphertext: Vec<u8>,

    /// Webhook id on the source-control host
    pub hook_id: i64,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
