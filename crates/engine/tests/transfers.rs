use std::{collections::HashSet, sync::Arc, time::Duration};

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tempfile::TempDir;
use tokio::task::JoinSet;

use engine::{
    Account, BalancePolicy, CreateAccountCmd, Currency, Engine, EngineError, EntryFilter,
    ErrorKind, Page, TransferCmd, TransferFilter, TransferResult,
};
use migration::MigratorTrait;

async fn migrated_engine(mut options: ConnectOptions, policy: BalancePolicy) -> Engine {
    options.sqlx_logging(false);
    let db: DatabaseConnection = Database::connect(options).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    Engine::builder()
        .database(db)
        .policy(policy)
        .build()
        .await
        .unwrap()
}

async fn engine_with_policy(policy: BalancePolicy) -> Engine {
    // One connection: every pooled connection to `sqlite::memory:` would
    // otherwise get its own empty database.
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1);
    migrated_engine(options, policy).await
}

/// An on-disk database behind a pool of several connections, so concurrent
/// transfers really overlap at the backend. Keep the directory alive for the
/// whole test.
async fn file_backed_engine(dir: &TempDir) -> Engine {
    let path = dir.path().join("ledger.db");
    let mut options = ConnectOptions::new(format!("sqlite:{}?mode=rwc", path.display()));
    options.max_connections(8);
    migrated_engine(options, BalancePolicy::AllowNegative).await
}

async fn engine_with_db() -> Engine {
    engine_with_policy(BalancePolicy::AllowNegative).await
}

async fn open_account(engine: &Engine, owner: &str, balance: i64) -> Account {
    engine
        .create_account(CreateAccountCmd::new(owner, Currency::Usd).balance(balance))
        .await
        .unwrap()
}

async fn assert_nothing_written(engine: &Engine) {
    let transfers = engine
        .transfers(TransferFilter::new(Page::new(100, 0)))
        .await
        .unwrap();
    assert!(transfers.is_empty(), "unexpected transfers: {transfers:?}");
    let entries = engine
        .entries(EntryFilter::new(Page::new(100, 0)))
        .await
        .unwrap();
    assert!(entries.is_empty(), "unexpected entries: {entries:?}");
}

async fn run_concurrently(engine: &Arc<Engine>, cmds: Vec<TransferCmd>) -> Vec<TransferResult> {
    let mut tasks = JoinSet::new();
    for cmd in cmds {
        let engine = Arc::clone(engine);
        tasks.spawn(async move { engine.transfer(cmd).await });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        results.push(joined.unwrap().unwrap());
    }
    results
}

#[tokio::test]
async fn transfer_writes_records_and_moves_balances() {
    let engine = engine_with_db().await;
    let alice = open_account(&engine, "alice", 100).await;
    let bob = open_account(&engine, "bob", 50).await;

    let result = engine
        .transfer(TransferCmd::new(alice.id, bob.id, 30))
        .await
        .unwrap();

    assert_eq!(result.transfer.from_account_id, alice.id);
    assert_eq!(result.transfer.to_account_id, bob.id);
    assert_eq!(result.transfer.amount, 30);
    assert!(result.transfer.id > 0);

    assert_eq!(result.from_entry.account_id, alice.id);
    assert_eq!(result.from_entry.amount, -30);
    assert_eq!(result.to_entry.account_id, bob.id);
    assert_eq!(result.to_entry.amount, 30);
    assert_ne!(result.from_entry.id, result.to_entry.id);

    assert_eq!(result.from_account.id, alice.id);
    assert_eq!(result.from_account.balance, 70);
    assert_eq!(result.to_account.id, bob.id);
    assert_eq!(result.to_account.balance, 80);

    // Conservation: the pair's total is unchanged.
    assert_eq!(
        result.from_account.balance + result.to_account.balance,
        alice.balance + bob.balance
    );

    assert_eq!(engine.account(alice.id).await.unwrap().balance, 70);
    assert_eq!(engine.account(bob.id).await.unwrap().balance, 80);
}

#[tokio::test]
async fn transfer_from_higher_to_lower_id_updates_right_sides() {
    let engine = engine_with_db().await;
    let low = open_account(&engine, "low", 10).await;
    let high = open_account(&engine, "high", 10).await;
    assert!(low.id < high.id);

    let result = engine
        .transfer(TransferCmd::new(high.id, low.id, 4))
        .await
        .unwrap();

    assert_eq!(result.from_account.id, high.id);
    assert_eq!(result.from_account.balance, 6);
    assert_eq!(result.to_account.id, low.id);
    assert_eq!(result.to_account.balance, 14);
}

#[tokio::test]
async fn committed_transfer_reads_back_identically() {
    let engine = engine_with_db().await;
    let alice = open_account(&engine, "alice", 100).await;
    let bob = open_account(&engine, "bob", 0).await;

    let result = engine
        .transfer(TransferCmd::new(alice.id, bob.id, 15))
        .await
        .unwrap();

    let transfer = engine.transfer_record(result.transfer.id).await.unwrap();
    assert_eq!(transfer.id, result.transfer.id);
    assert_eq!(transfer.from_account_id, alice.id);
    assert_eq!(transfer.to_account_id, bob.id);
    assert_eq!(transfer.amount, 15);
    let drift = (transfer.created_at - result.transfer.created_at).num_milliseconds();
    assert!(drift.abs() < 1000, "created_at drifted by {drift}ms");

    for expected in [&result.from_entry, &result.to_entry] {
        let entry = engine.entry(expected.id).await.unwrap();
        assert_eq!(entry.account_id, expected.account_id);
        assert_eq!(entry.amount, expected.amount);
        let drift = (entry.created_at - expected.created_at).num_milliseconds();
        assert!(drift.abs() < 1000, "created_at drifted by {drift}ms");
    }
}

#[tokio::test]
async fn self_transfer_keeps_balance_but_records_both_sides() {
    let engine = engine_with_db().await;
    let alice = open_account(&engine, "alice", 40).await;

    let result = engine
        .transfer(TransferCmd::new(alice.id, alice.id, 25))
        .await
        .unwrap();

    assert_eq!(result.from_account.balance, 40);
    assert_eq!(result.to_account.balance, 40);
    assert_eq!(result.from_entry.amount, -25);
    assert_eq!(result.to_entry.amount, 25);

    let entries = engine
        .entries(EntryFilter::new(Page::new(10, 0)).account_id(alice.id))
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(engine.account(alice.id).await.unwrap().balance, 40);
}

#[tokio::test]
async fn unknown_account_rolls_back_everything() {
    let engine = engine_with_db().await;
    let alice = open_account(&engine, "alice", 100).await;

    let err = engine
        .transfer(TransferCmd::new(alice.id, 9_999, 10))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation, "{err}");

    assert_nothing_written(&engine).await;
    assert_eq!(engine.account(alice.id).await.unwrap().balance, 100);
}

#[tokio::test]
async fn non_positive_amount_is_rejected_by_schema() {
    let engine = engine_with_db().await;
    let alice = open_account(&engine, "alice", 100).await;
    let bob = open_account(&engine, "bob", 100).await;

    for amount in [0, -10] {
        let err = engine
            .transfer(TransferCmd::new(alice.id, bob.id, amount))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Database(_)), "{err}");
        assert!(!err.is_retryable());
    }

    assert_nothing_written(&engine).await;
    assert_eq!(engine.account(alice.id).await.unwrap().balance, 100);
    assert_eq!(engine.account(bob.id).await.unwrap().balance, 100);
}

#[tokio::test]
async fn negative_balance_is_allowed_by_default() {
    let engine = engine_with_db().await;
    let alice = open_account(&engine, "alice", 5).await;
    let bob = open_account(&engine, "bob", 0).await;

    let result = engine
        .transfer(TransferCmd::new(alice.id, bob.id, 10))
        .await
        .unwrap();
    assert_eq!(result.from_account.balance, -5);
    assert_eq!(result.to_account.balance, 10);
}

#[tokio::test]
async fn reject_overdraft_policy_rolls_back() {
    let engine = engine_with_policy(BalancePolicy::RejectOverdraft).await;
    let alice = open_account(&engine, "alice", 5).await;
    let bob = open_account(&engine, "bob", 0).await;

    let err = engine
        .transfer(TransferCmd::new(alice.id, bob.id, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds(_)), "{err}");

    assert_nothing_written(&engine).await;
    assert_eq!(engine.account(alice.id).await.unwrap().balance, 5);
    assert_eq!(engine.account(bob.id).await.unwrap().balance, 0);

    // Exactly draining the account is fine.
    let result = engine
        .transfer(TransferCmd::new(alice.id, bob.id, 5))
        .await
        .unwrap();
    assert_eq!(result.from_account.balance, 0);
}

#[tokio::test]
async fn balance_overflow_rolls_back_as_validation_error() {
    let engine = engine_with_db().await;
    let alice = open_account(&engine, "alice", 10).await;
    let whale = open_account(&engine, "whale", i64::MAX).await;

    let err = engine
        .transfer(TransferCmd::new(alice.id, whale.id, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)), "{err}");
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_nothing_written(&engine).await;
    assert_eq!(engine.account(alice.id).await.unwrap().balance, 10);
    assert_eq!(engine.account(whale.id).await.unwrap().balance, i64::MAX);
}

#[tokio::test]
async fn cancelled_transfer_leaves_no_trace() {
    let engine = engine_with_db().await;
    let alice = open_account(&engine, "alice", 100).await;
    let bob = open_account(&engine, "bob", 0).await;

    let err = engine
        .transfer_until(TransferCmd::new(alice.id, bob.id, 10), std::future::ready(()))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Cancelled);

    assert_nothing_written(&engine).await;
    assert_eq!(engine.account(alice.id).await.unwrap().balance, 100);
}

async fn assert_no_double_counting(engine: Arc<Engine>) {
    let x = open_account(&engine, "x", 100).await;
    let y = open_account(&engine, "y", 50).await;

    let n = 5;
    let amount = 10;
    let results = run_concurrently(
        &engine,
        (0..n).map(|_| TransferCmd::new(x.id, y.id, amount)).collect(),
    )
    .await;
    assert_eq!(results.len(), n);

    let mut seen_steps = HashSet::new();
    let mut transfer_ids = HashSet::new();
    for result in &results {
        assert!(transfer_ids.insert(result.transfer.id));
        assert_eq!(result.transfer.from_account_id, x.id);
        assert_eq!(result.transfer.to_account_id, y.id);
        assert_eq!(result.transfer.amount, amount);
        assert_eq!(result.from_entry.amount, -amount);
        assert_eq!(result.to_entry.amount, amount);

        let debited = x.balance - result.from_account.balance;
        let credited = result.to_account.balance - y.balance;
        assert_eq!(debited, credited);
        assert!(debited > 0);
        assert_eq!(debited % amount, 0);

        let step = debited / amount;
        assert!((1..=n as i64).contains(&step), "step {step} out of range");
        assert!(seen_steps.insert(step), "step {step} observed twice");
    }

    let x_after = engine.account(x.id).await.unwrap();
    let y_after = engine.account(y.id).await.unwrap();
    assert_eq!(x_after.balance, 50);
    assert_eq!(y_after.balance, 100);

    let transfers = engine
        .transfers(TransferFilter::new(Page::new(100, 0)).from_account_id(x.id))
        .await
        .unwrap();
    assert_eq!(transfers.len(), n);
    let debits = engine
        .entries(EntryFilter::new(Page::new(100, 0)).account_id(x.id))
        .await
        .unwrap();
    assert_eq!(debits.len(), n);
    assert!(debits.iter().all(|e| e.amount == -amount));
    let credits = engine
        .entries(EntryFilter::new(Page::new(100, 0)).account_id(y.id))
        .await
        .unwrap();
    assert_eq!(credits.len(), n);
    assert!(credits.iter().all(|e| e.amount == amount));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transfers_do_not_double_count() {
    assert_no_double_counting(Arc::new(engine_with_db().await)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transfers_do_not_double_count_on_a_connection_pool() {
    let dir = TempDir::new().unwrap();
    assert_no_double_counting(Arc::new(file_backed_engine(&dir).await)).await;
}

async fn assert_opposite_directions_net_to_zero(engine: Arc<Engine>) {
    let x = open_account(&engine, "x", 100).await;
    let y = open_account(&engine, "y", 100).await;

    let n = 10;
    let amount = 10;
    let cmds = (0..n)
        .flat_map(|_| {
            [
                TransferCmd::new(x.id, y.id, amount),
                TransferCmd::new(y.id, x.id, amount),
            ]
        })
        .collect();

    let results = tokio::time::timeout(Duration::from_secs(30), run_concurrently(&engine, cmds))
        .await
        .expect("transfers stalled");
    assert_eq!(results.len(), 2 * n);

    assert_eq!(engine.account(x.id).await.unwrap().balance, 100);
    assert_eq!(engine.account(y.id).await.unwrap().balance, 100);

    let forward = engine
        .transfers(TransferFilter::new(Page::new(100, 0)).from_account_id(x.id))
        .await
        .unwrap();
    let backward = engine
        .transfers(TransferFilter::new(Page::new(100, 0)).from_account_id(y.id))
        .await
        .unwrap();
    assert_eq!(forward.len(), n);
    assert_eq!(backward.len(), n);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_direction_transfers_complete_and_net_to_zero() {
    assert_opposite_directions_net_to_zero(Arc::new(engine_with_db().await)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_direction_transfers_complete_on_a_connection_pool() {
    let dir = TempDir::new().unwrap();
    assert_opposite_directions_net_to_zero(Arc::new(file_backed_engine(&dir).await)).await;
}
