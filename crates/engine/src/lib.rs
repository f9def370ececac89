//! Transactional transfer engine.
//!
//! Money moves between two [`Account`]s as one unit of work: a [`Transfer`]
//! row, a debit and a credit [`Entry`], and an atomic balance update on each
//! side. Balance rows are always touched lower id first, so concurrent
//! transfers over the same pair (in either direction) cannot deadlock.
//!
//! ```no_run
//! # async fn demo(db: sea_orm::DatabaseConnection) -> Result<(), engine::EngineError> {
//! use engine::{CreateAccountCmd, Currency, Engine, TransferCmd};
//!
//! let engine = Engine::builder().database(db).build().await?;
//! let alice = engine.create_account(CreateAccountCmd::new("alice", Currency::Usd).balance(100)).await?;
//! let bob = engine.create_account(CreateAccountCmd::new("bob", Currency::Usd)).await?;
//! let result = engine.transfer(TransferCmd::new(alice.id, bob.id, 10)).await?;
//! assert_eq!(result.from_account.balance, 90);
//! # Ok(())
//! # }
//! ```

pub use accounts::Account;
pub use commands::{CreateAccountCmd, EntryFilter, Page, TransferCmd, TransferFilter};
pub use currency::Currency;
pub use entries::Entry;
pub use error::{EngineError, ErrorKind};
pub use ops::{Engine, EngineBuilder, TxFuture};
pub use policy::BalancePolicy;
pub use queries::Queries;
pub use transfers::{Transfer, TransferResult};

mod accounts;
mod commands;
mod currency;
mod entries;
mod error;
mod ops;
mod policy;
mod queries;
mod transfers;

type ResultEngine<T> = Result<T, EngineError>;
