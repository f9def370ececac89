//! Ledger schema: accounts, entries and transfers.
//!
//! - `accounts`: owner, currency and the denormalised balance
//! - `entries`: one signed balance change per account
//! - `transfers`: a directed movement between two accounts
//!
//! Foreign keys and the `amount > 0` check on transfers are what reject bad
//! transfer requests; the engine does not pre-validate them.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// ─────────────────────────────────────────────────────────────────────────────
// Table identifiers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Iden)]
enum Accounts {
    Table,
    Id,
    Owner,
    Balance,
    Currency,
    CreatedAt,
}

#[derive(Iden)]
enum Entries {
    Table,
    Id,
    AccountId,
    Amount,
    CreatedAt,
}

#[derive(Iden)]
enum Transfers {
    Table,
    Id,
    FromAccountId,
    ToAccountId,
    Amount,
    CreatedAt,
}

// ─────────────────────────────────────────────────────────────────────────────
// Migration implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ───────────────────────────────────────────────────────────────────
        // 1. Accounts
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Accounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Accounts::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Accounts::Owner).string().not_null())
                    .col(ColumnDef::new(Accounts::Balance).big_integer().not_null())
                    .col(ColumnDef::new(Accounts::Currency).string().not_null())
                    .col(
                        ColumnDef::new(Accounts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-accounts-owner")
                    .table(Accounts::Table)
                    .col(Accounts::Owner)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 2. Entries
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Entries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Entries::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Entries::AccountId).big_integer().not_null())
                    // Signed: negative for debits, positive for credits.
                    .col(ColumnDef::new(Entries::Amount).big_integer().not_null())
                    .col(
                        ColumnDef::new(Entries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-entries-account_id")
                            .from(Entries::Table, Entries::AccountId)
                            .to(Accounts::Table, Accounts::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-entries-account_id")
                    .table(Entries::Table)
                    .col(Entries::AccountId)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 3. Transfers
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Transfers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Transfers::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Transfers::FromAccountId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transfers::ToAccountId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transfers::Amount)
                            .big_integer()
                            .not_null()
                            .check(Expr::col(Transfers::Amount).gt(0)),
                    )
                    .col(
                        ColumnDef::new(Transfers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-transfers-from_account_id")
                            .from(Transfers::Table, Transfers::FromAccountId)
                            .to(Accounts::Table, Accounts::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-transfers-to_account_id")
                            .from(Transfers::Table, Transfers::ToAccountId)
                            .to(Accounts::Table, Accounts::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transfers-from_account_id")
                    .table(Transfers::Table)
                    .col(Transfers::FromAccountId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transfers-to_account_id")
                    .table(Transfers::Table)
                    .col(Transfers::ToAccountId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transfers-from_account_id-to_account_id")
                    .table(Transfers::Table)
                    .col(Transfers::FromAccountId)
                    .col(Transfers::ToAccountId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Drop in reverse order of creation (respecting FK dependencies)
        manager
            .drop_table(Table::drop().table(Transfers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Entries::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Accounts::Table).to_owned())
            .await?;
        Ok(())
    }
}
