//! Command structs for engine operations.
//!
//! These types group parameters for write operations and listings, keeping
//! call sites readable and avoiding long argument lists.

use crate::Currency;

/// Move `amount` minor units from one account to another.
///
/// `from_account_id` and `to_account_id` may be equal: the balance nets to
/// zero but the transfer and both entries are still written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferCmd {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
}

impl TransferCmd {
    #[must_use]
    pub fn new(from_account_id: i64, to_account_id: i64, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }
}

/// Open a new account.
#[derive(Clone, Debug)]
pub struct CreateAccountCmd {
    pub owner: String,
    pub currency: Currency,
    pub balance: i64,
}

impl CreateAccountCmd {
    #[must_use]
    pub fn new(owner: impl Into<String>, currency: Currency) -> Self {
        Self {
            owner: owner.into(),
            currency,
            balance: 0,
        }
    }

    #[must_use]
    pub fn balance(mut self, balance: i64) -> Self {
        self.balance = balance;
        self
    }
}

/// Limit/offset window over an id-ordered listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub limit: u64,
    pub offset: u64,
}

impl Page {
    #[must_use]
    pub fn new(limit: u64, offset: u64) -> Self {
        Self { limit, offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 5,
            offset: 0,
        }
    }
}

/// Listing filter for entries.
#[derive(Clone, Copy, Debug, Default)]
pub struct EntryFilter {
    pub account_id: Option<i64>,
    pub page: Page,
}

impl EntryFilter {
    #[must_use]
    pub fn new(page: Page) -> Self {
        Self {
            account_id: None,
            page,
        }
    }

    #[must_use]
    pub fn account_id(mut self, account_id: i64) -> Self {
        self.account_id = Some(account_id);
        self
    }
}

/// Listing filter for transfers. Both ids set means "from AND to".
#[derive(Clone, Copy, Debug, Default)]
pub struct TransferFilter {
    pub from_account_id: Option<i64>,
    pub to_account_id: Option<i64>,
    pub page: Page,
}

impl TransferFilter {
    #[must_use]
    pub fn new(page: Page) -> Self {
        Self {
            from_account_id: None,
            to_account_id: None,
            page,
        }
    }

    #[must_use]
    pub fn from_account_id(mut self, account_id: i64) -> Self {
        self.from_account_id = Some(account_id);
        self
    }

    #[must_use]
    pub fn to_account_id(mut self, account_id: i64) -> Self {
        self.to_account_id = Some(account_id);
        self
    }
}
