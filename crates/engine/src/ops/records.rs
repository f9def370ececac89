use crate::{
    Account, CreateAccountCmd, Entry, EntryFilter, Page, ResultEngine, Transfer, TransferFilter,
};

use super::Engine;

impl Engine {
    pub async fn create_account(&self, cmd: CreateAccountCmd) -> ResultEngine<Account> {
        let account = self.queries().create_account(&cmd).await?;
        tracing::info!(
            account_id = account.id,
            owner = %account.owner,
            currency = %account.currency,
            "account created"
        );
        Ok(account)
    }

    pub async fn account(&self, id: i64) -> ResultEngine<Account> {
        self.queries().get_account(id).await
    }

    pub async fn accounts(&self, page: Page) -> ResultEngine<Vec<Account>> {
        self.queries().list_accounts(page).await
    }

    /// Remove an account. Fails while entries or transfers still reference it.
    pub async fn delete_account(&self, id: i64) -> ResultEngine<()> {
        self.queries().delete_account(id).await
    }

    pub async fn entry(&self, id: i64) -> ResultEngine<Entry> {
        self.queries().get_entry(id).await
    }

    pub async fn entries(&self, filter: EntryFilter) -> ResultEngine<Vec<Entry>> {
        self.queries().list_entries(filter).await
    }

    /// Maintenance correction of a single entry; balances are not touched.
    pub async fn update_entry(&self, id: i64, amount: i64) -> ResultEngine<Entry> {
        let entry = self.queries().update_entry(id, amount).await?;
        tracing::warn!(entry_id = id, amount, "entry amount corrected");
        Ok(entry)
    }

    pub async fn delete_entry(&self, id: i64) -> ResultEngine<()> {
        self.queries().delete_entry(id).await?;
        tracing::warn!(entry_id = id, "entry deleted");
        Ok(())
    }

    pub async fn transfer_record(&self, id: i64) -> ResultEngine<Transfer> {
        self.queries().get_transfer(id).await
    }

    pub async fn transfers(&self, filter: TransferFilter) -> ResultEngine<Vec<Transfer>> {
        self.queries().list_transfers(filter).await
    }
}
