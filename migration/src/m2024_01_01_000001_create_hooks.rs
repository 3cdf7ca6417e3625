//! Migration to create the hooks table.
//!
//! One row per broker service instance, holding the GitHub webhook registration
//! and the credentials used to act on the repository.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Hooks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Hooks::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Hooks::InstanceId).text().not_null())
                    .col(ColumnDef::new(Hooks::OrgId).text().not_null())
                    .col(ColumnDef::new(Hooks::Owner).text().not_null())
                    .col(ColumnDef::new(Hooks::Repo).text().not_null())
                    .col(ColumnDef::new(Hooks::TokenCiphertext).binary().not_null())
                    .col(ColumnDef::new(Hooks::SecretCiphertext).binary().not_null())
                    .col(ColumnDef::new(Hooks::HookId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Hooks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_hooks_instance_id")
                    .table(Hooks::Table)
                    .col(Hooks::InstanceId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Lookups by repository when auditing which instances point at it
        manager
            .create_index(
                Index::create()
                    .name("idx_hooks_org_owner_repo")
                    .table(Hooks::Table)
                    .col(Hooks::OrgId)
                    .col(Hooks::Owner)
                    .col(Hooks::Repo)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_hooks_org_owner_repo").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_hooks_instance_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Hooks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Hooks {
    Table,
    Id,
    InstanceId,
    OrgId,
    Owner,
    Repo,
    TokenCiphertext,
    SecretCiphertext,
    HookId,
    CreatedAt,
}
