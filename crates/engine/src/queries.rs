//! Row-level access to accounts, entries and transfers.
//!
//! [`Queries`] is a borrowed view over any sea-orm connection. Bound to a
//! `DatabaseConnection` every call is its own implicit transaction; bound to
//! a `DatabaseTransaction` (as handed out by
//! [`Engine::with_tx`](crate::Engine::with_tx)) the calls share one unit of
//! work.
//!
//! Every operation is a single statement, optionally followed by a read-back
//! of the touched row on the same connection.

use chrono::Utc;
use sea_orm::{
    ActiveValue, DbBackend, QueryFilter, QueryOrder, QuerySelect,
    prelude::*,
    sea_query::{Expr, LockType},
};

use crate::{
    Account, CreateAccountCmd, EngineError, Entry, EntryFilter, Page, ResultEngine, Transfer,
    TransferCmd, TransferFilter, accounts, entries, transfers,
};

pub struct Queries<'c, C> {
    conn: &'c C,
}

impl<C> Clone for Queries<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Queries<'_, C> {}

fn not_found(label: &str, id: i64) -> EngineError {
    EngineError::KeyNotFound(format!("{label} {id}"))
}

fn not_updated(err: DbErr, label: &str, id: i64) -> EngineError {
    match err {
        DbErr::RecordNotUpdated | DbErr::RecordNotFound(_) => not_found(label, id),
        other => other.into(),
    }
}

impl<'c, C: ConnectionTrait> Queries<'c, C> {
    pub fn new(conn: &'c C) -> Self {
        Self { conn }
    }

    pub fn backend(&self) -> DbBackend {
        self.conn.get_database_backend()
    }

    // ── accounts ────────────────────────────────────────────────────────────

    pub async fn create_account(&self, cmd: &CreateAccountCmd) -> ResultEngine<Account> {
        let model = accounts::ActiveModel {
            owner: ActiveValue::Set(cmd.owner.clone()),
            balance: ActiveValue::Set(cmd.balance),
            currency: ActiveValue::Set(cmd.currency.code().to_string()),
            created_at: ActiveValue::Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.conn)
        .await?;
        Account::try_from(model)
    }

    pub async fn get_account(&self, id: i64) -> ResultEngine<Account> {
        accounts::Entity::find_by_id(id)
            .one(self.conn)
            .await?
            .ok_or_else(|| not_found("account", id))?
            .try_into()
    }

    /// Read an account and hold its row lock until the surrounding
    /// transaction ends.
    ///
    /// PostgreSQL gets `FOR NO KEY UPDATE`, which does not conflict with the
    /// `KEY SHARE` locks taken by foreign-key checks from `entries` and
    /// `transfers` inserts. SQLite has no row locks (writers are serialised on
    /// the whole database) so the clause is left out there.
    pub async fn get_account_for_update(&self, id: i64) -> ResultEngine<Account> {
        let mut query = accounts::Entity::find_by_id(id);
        if self.backend() == DbBackend::Postgres {
            query = query.lock(LockType::NoKeyUpdate);
        }
        query
            .one(self.conn)
            .await?
            .ok_or_else(|| not_found("account", id))?
            .try_into()
    }

    pub async fn list_accounts(&self, page: Page) -> ResultEngine<Vec<Account>> {
        accounts::Entity::find()
            .order_by_asc(accounts::Column::Id)
            .limit(page.limit)
            .offset(page.offset)
            .all(self.conn)
            .await?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    /// Overwrite the balance. Not used by transfers, which go through
    /// [`add_account_balance`](Self::add_account_balance).
    pub async fn update_account(&self, id: i64, balance: i64) -> ResultEngine<Account> {
        let model = accounts::ActiveModel {
            id: ActiveValue::Unchanged(id),
            balance: ActiveValue::Set(balance),
            ..Default::default()
        }
        .update(self.conn)
        .await
        .map_err(|err| not_updated(err, "account", id))?;
        Account::try_from(model)
    }

    /// Add a signed `delta` to the stored balance and return the updated row.
    ///
    /// The arithmetic happens in the `UPDATE` statement itself, which takes the
    /// row lock; no value read by the application is ever written back.
    ///
    /// The row only matches while the sum stays within `i64`. SQLite would
    /// otherwise store the overflowed sum as REAL, and Postgres would raise a
    /// range error. An existing row that does not match is reported as
    /// [`EngineError::InvalidAmount`].
    pub async fn add_account_balance(&self, id: i64, delta: i64) -> ResultEngine<Account> {
        let in_range = if delta >= 0 {
            accounts::Column::Balance.lte(i64::MAX - delta)
        } else {
            accounts::Column::Balance.gte(i64::MIN - delta)
        };
        let res = accounts::Entity::update_many()
            .col_expr(
                accounts::Column::Balance,
                Expr::col(accounts::Column::Balance).add(delta),
            )
            .filter(accounts::Column::Id.eq(id))
            .filter(in_range)
            .exec(self.conn)
            .await?;
        if res.rows_affected == 0 {
            let account = self.get_account(id).await?;
            return Err(EngineError::InvalidAmount(format!(
                "adding {delta} to account {id} (balance {}) overflows",
                account.balance
            )));
        }
        self.get_account(id).await
    }

    pub async fn delete_account(&self, id: i64) -> ResultEngine<()> {
        let res = accounts::Entity::delete_by_id(id).exec(self.conn).await?;
        if res.rows_affected == 0 {
            return Err(not_found("account", id));
        }
        Ok(())
    }

    // ── entries ─────────────────────────────────────────────────────────────

    pub async fn create_entry(&self, account_id: i64, amount: i64) -> ResultEngine<Entry> {
        let model = entries::ActiveModel {
            account_id: ActiveValue::Set(account_id),
            amount: ActiveValue::Set(amount),
            created_at: ActiveValue::Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.conn)
        .await?;
        Ok(model.into())
    }

    pub async fn get_entry(&self, id: i64) -> ResultEngine<Entry> {
        entries::Entity::find_by_id(id)
            .one(self.conn)
            .await?
            .map(Entry::from)
            .ok_or_else(|| not_found("entry", id))
    }

    pub async fn list_entries(&self, filter: EntryFilter) -> ResultEngine<Vec<Entry>> {
        let mut query = entries::Entity::find();
        if let Some(account_id) = filter.account_id {
            query = query.filter(entries::Column::AccountId.eq(account_id));
        }
        Ok(query
            .order_by_asc(entries::Column::Id)
            .limit(filter.page.limit)
            .offset(filter.page.offset)
            .all(self.conn)
            .await?
            .into_iter()
            .map(Entry::from)
            .collect())
    }

    /// Correct the amount of an entry. Account balances are left alone.
    pub async fn update_entry(&self, id: i64, amount: i64) -> ResultEngine<Entry> {
        let model = entries::ActiveModel {
            id: ActiveValue::Unchanged(id),
            amount: ActiveValue::Set(amount),
            ..Default::default()
        }
        .update(self.conn)
        .await
        .map_err(|err| not_updated(err, "entry", id))?;
        Ok(model.into())
    }

    pub async fn delete_entry(&self, id: i64) -> ResultEngine<()> {
        let res = entries::Entity::delete_by_id(id).exec(self.conn).await?;
        if res.rows_affected == 0 {
            return Err(not_found("entry", id));
        }
        Ok(())
    }

    // ── transfers ───────────────────────────────────────────────────────────

    pub async fn create_transfer(&self, cmd: &TransferCmd) -> ResultEngine<Transfer> {
        let model = transfers::ActiveModel {
            from_account_id: ActiveValue::Set(cmd.from_account_id),
            to_account_id: ActiveValue::Set(cmd.to_account_id),
            amount: ActiveValue::Set(cmd.amount),
            created_at: ActiveValue::Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.conn)
        .await?;
        Ok(model.into())
    }

    pub async fn get_transfer(&self, id: i64) -> ResultEngine<Transfer> {
        transfers::Entity::find_by_id(id)
            .one(self.conn)
            .await?
            .map(Transfer::from)
            .ok_or_else(|| not_found("transfer", id))
    }

    pub async fn list_transfers(&self, filter: TransferFilter) -> ResultEngine<Vec<Transfer>> {
        let mut query = transfers::Entity::find();
        if let Some(from) = filter.from_account_id {
            query = query.filter(transfers::Column::FromAccountId.eq(from));
        }
        if let Some(to) = filter.to_account_id {
            query = query.filter(transfers::Column::ToAccountId.eq(to));
        }
        Ok(query
            .order_by_asc(transfers::Column::Id)
            .limit(filter.page.limit)
            .offset(filter.page.offset)
            .all(self.conn)
            .await?
            .into_iter()
            .map(Transfer::from)
            .collect())
    }
}
