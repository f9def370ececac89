use std::future::Future;

use sea_orm::ConnectionTrait;

use crate::{Queries, ResultEngine, TransferCmd, TransferResult};

use super::Engine;

/// Balance deltas of a transfer, in the order the rows must be touched.
///
/// The account with the lower id always goes first, whichever side of the
/// transfer it is on. Two transfers over the same pair therefore request the
/// row locks in the same order and can never wait on each other in a cycle.
pub(crate) fn balance_update_order(cmd: &TransferCmd) -> [(i64, i64); 2] {
    let debit = (cmd.from_account_id, -cmd.amount);
    let credit = (cmd.to_account_id, cmd.amount);
    if cmd.from_account_id < cmd.to_account_id {
        [debit, credit]
    } else {
        [credit, debit]
    }
}

impl Engine {
    /// Move money between two accounts in one unit of work.
    ///
    /// Writes the transfer, a debit entry on the source, a credit entry on the
    /// destination, then adjusts both balances. Either all of it commits or
    /// none of it does. Unknown accounts and non-positive amounts are rejected
    /// by the schema constraints, not pre-checked.
    pub async fn transfer(&self, cmd: TransferCmd) -> ResultEngine<TransferResult> {
        self.transfer_until(cmd, std::future::pending::<()>()).await
    }

    /// [`transfer`](Self::transfer) that rolls back once `cancel` resolves.
    pub async fn transfer_until<C>(&self, cmd: TransferCmd, cancel: C) -> ResultEngine<TransferResult>
    where
        C: Future<Output = ()> + Send,
    {
        let result = self
            .with_tx_until(cancel, |engine, store| {
                Box::pin(async move { engine.apply_transfer(store, &cmd).await })
            })
            .await?;

        tracing::info!(
            transfer_id = result.transfer.id,
            from_account_id = cmd.from_account_id,
            to_account_id = cmd.to_account_id,
            amount = cmd.amount,
            "transfer committed"
        );
        Ok(result)
    }

    /// The transfer body, against whatever connection `store` is bound to.
    pub(crate) async fn apply_transfer<C: ConnectionTrait>(
        &self,
        store: Queries<'_, C>,
        cmd: &TransferCmd,
    ) -> ResultEngine<TransferResult> {
        let transfer = store.create_transfer(cmd).await?;
        let from_entry = store.create_entry(cmd.from_account_id, -cmd.amount).await?;
        let to_entry = store.create_entry(cmd.to_account_id, cmd.amount).await?;

        let [(first_id, first_delta), (second_id, second_delta)] = balance_update_order(cmd);
        let first = store.add_account_balance(first_id, first_delta).await?;
        let second = store.add_account_balance(second_id, second_delta).await?;
        let (from_account, to_account) = if first_id == second_id {
            // Self-transfer: the second update carries the final balance.
            (second.clone(), second)
        } else if first_id == cmd.from_account_id {
            (first, second)
        } else {
            (second, first)
        };

        self.policy().check_debited(&from_account)?;

        Ok(TransferResult {
            transfer,
            from_entry,
            to_entry,
            from_account,
            to_account,
        })
    }
}
