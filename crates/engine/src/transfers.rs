//! Transfer primitives.
//!
//! A [`Transfer`] records a directed money movement between two accounts. It
//! is written once, together with its two entries, and never changed.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{Account, Entry};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: i64,
    pub from_account_id: i64,
    pub to_account_id: i64,
    /// Always positive; the schema rejects anything else.
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Everything a successful transfer wrote, as seen at commit time.
///
/// Not persisted on its own: it is assembled from the rows written inside the
/// unit of work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    pub from_account: Account,
    pub to_account: Account,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transfers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::accounts::Entity",
        from = "Column::FromAccountId",
        to = "super::accounts::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    FromAccount,
    #[sea_orm(
        belongs_to = "super::accounts::Entity",
        from = "Column::ToAccountId",
        to = "super::accounts::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    ToAccount,
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Transfer {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            from_account_id: model.from_account_id,
            to_account_id: model.to_account_id,
            amount: model.amount,
            created_at: model.created_at,
        }
    }
}
