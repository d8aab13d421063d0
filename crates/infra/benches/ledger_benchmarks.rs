//! Benchmarks for the in-memory ledger store: commit throughput and
//! journal reads under growing journals.

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::{Builder, Runtime};

use payvault_core::{AggregateId, AggregateRoot, Currency, ExpectedVersion, Money, UserId};
use payvault_infra::{InMemoryLedgerStore, LedgerCommit, LedgerStore};
use payvault_ledger::{EntityRef, IdempotencyKey, Transaction, TransactionId};
use payvault_wallet::{Wallet, WalletId};

fn usd() -> Currency {
    Currency::new("USD").unwrap()
}

fn credit_entry(dest: WalletId, seq: u64) -> Transaction {
    Transaction::credit(
        TransactionId::new(AggregateId::new()),
        dest,
        Money::from_minor(10_000, usd()),
        EntityRef::new("recharge", format!("r-{seq}")),
        IdempotencyKey::derive("recharge", &format!("r-{seq}"), "credit"),
        Utc::now(),
    )
    .unwrap()
}

async fn seeded_store(entries: u64) -> (InMemoryLedgerStore, Wallet) {
    let store = InMemoryLedgerStore::new();
    let wallet = Wallet::open(WalletId::new(AggregateId::new()), UserId::new(), usd(), Utc::now());
    store
        .commit(LedgerCommit::new().wallet(wallet.clone(), ExpectedVersion::Exact(0)))
        .await
        .unwrap();
    for seq in 0..entries {
        store
            .commit(LedgerCommit::new().entry(credit_entry(wallet.id_typed(), seq)))
            .await
            .unwrap();
    }
    (store, wallet)
}

fn runtime() -> Runtime {
    Builder::new_current_thread().build().unwrap()
}

fn bench_commit(c: &mut Criterion) {
    let rt = runtime();

    c.bench_function("commit_credit_with_entry", |b| {
        let (store, wallet) = rt.block_on(seeded_store(0));
        let mut seq = 0u64;
        b.iter(|| {
            rt.block_on(async {
                let mut current = store.wallet(wallet.id_typed()).await.unwrap().unwrap();
                let expected = ExpectedVersion::Exact(current.version());
                current
                    .credit(Money::from_minor(10_000, usd()), Utc::now())
                    .unwrap();
                store
                    .commit(
                        LedgerCommit::new()
                            .wallet(current, expected)
                            .entry(credit_entry(wallet.id_typed(), 1_000_000 + seq)),
                    )
                    .await
                    .unwrap();
                seq += 1;
            })
        });
    });
}

fn bench_journal_reads(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("entries_for_wallet");

    for size in [100u64, 1_000, 10_000] {
        let (store, wallet) = rt.block_on(seeded_store(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let entries = store.entries_for_wallet(wallet.id_typed()).await.unwrap();
                    assert_eq!(entries.len() as u64, size);
                })
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_commit, bench_journal_reads);
criterion_main!(benches);
