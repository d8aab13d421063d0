//! Infrastructure for the wallet ledger: storage contracts and their
//! in-memory and Postgres implementations.

pub mod store;


pub use store::in_memory::InMemoryLedgerStore;
pub use store::postgres::PostgresLedgerStore;
pub use store::r#trait::{LedgerCommit, LedgerStore, StoreError, WalletWrite, WithdrawalWrite};
