//! Postgres-backed ledger store.
//!
//! ## Atomicity
//!
//! `commit` runs every write inside one database transaction. Wallet rows
//! are updated in ascending wallet-id order so two commits touching the same
//! pair of wallets acquire row locks in the same order and cannot deadlock.
//!
//! ## Error mapping
//!
//! | PostgreSQL error code | StoreError | Scenario |
//! |-----------------------|------------|----------|
//! | `23505` on `transactions.idempotency_key` | `DuplicateIdempotencyKey` | Retried posting |
//! | `23505` elsewhere | `Conflict` | Concurrent insert of the same wallet / owner+currency |
//! | version-guard UPDATE touching 0 rows | `Conflict` | Someone else wrote first |
//! | anything else | `Backend` | Connection, IO, corrupt row |

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction as PgTransaction};
use tracing::instrument;

use payvault_core::{AggregateId, AggregateRoot, Currency, ExpectedVersion, Money, UserId};
use payvault_ledger::{
    EntityRef, IdempotencyKey, Transaction, TransactionId, TransactionKind,
};
use payvault_wallet::{Wallet, WalletId, WalletStatus};
use payvault_withdrawals::{Withdrawal, WithdrawalId, WithdrawalStatus};

use super::r#trait::{LedgerCommit, LedgerStore, StoreError, WalletWrite, WithdrawalWrite};

/// Postgres implementation of [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the ledger schema if it does not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallets (
                id UUID PRIMARY KEY,
                owner_id UUID NOT NULL,
                currency TEXT NOT NULL,
                balance_minor BIGINT NOT NULL,
                status TEXT NOT NULL,
                version BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                UNIQUE (owner_id, currency)
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("migrate_wallets", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id UUID PRIMARY KEY,
                kind TEXT NOT NULL,
                amount_minor BIGINT NOT NULL,
                currency TEXT NOT NULL,
                source_wallet_id UUID,
                destination_wallet_id UUID,
                related_entity_type TEXT NOT NULL,
                related_entity_id TEXT NOT NULL,
                idempotency_key TEXT NOT NULL UNIQUE,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("migrate_transactions", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transactions_source ON transactions (source_wallet_id)",
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("migrate_transactions_idx", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transactions_destination ON transactions (destination_wallet_id)",
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("migrate_transactions_idx", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS withdrawals (
                id UUID PRIMARY KEY,
                wallet_id UUID NOT NULL REFERENCES wallets (id),
                amount_minor BIGINT NOT NULL,
                currency TEXT NOT NULL,
                payment_method TEXT NOT NULL,
                payment_details TEXT NOT NULL,
                status TEXT NOT NULL,
                transaction_id UUID,
                processed_by UUID,
                rejection_reason TEXT,
                requested_at TIMESTAMPTZ NOT NULL,
                processed_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                version BIGINT NOT NULL
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("migrate_withdrawals", e))?;

        Ok(())
    }
}

async fn write_wallet(
    tx: &mut PgTransaction<'_, Postgres>,
    write: &WalletWrite,
) -> Result<(), StoreError> {
    let wallet = &write.wallet;
    match write.expected {
        ExpectedVersion::Exact(0) => {
            sqlx::query(
                r#"
                INSERT INTO wallets (
                    id, owner_id, currency, balance_minor, status, version, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(wallet.id_typed().0.as_uuid())
            .bind(wallet.owner_id().as_uuid())
            .bind(wallet.currency().as_str())
            .bind(wallet.balance().minor())
            .bind(wallet.status().as_str())
            .bind(wallet.version() as i64)
            .bind(wallet.updated_at())
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!(
                        "wallet already exists for owner {} in {}",
                        wallet.owner_id(),
                        wallet.currency()
                    ))
                } else {
                    map_sqlx_error("insert_wallet", e)
                }
            })?;
        }
        ExpectedVersion::Exact(expected) => {
            let result = sqlx::query(
                r#"
                UPDATE wallets
                SET balance_minor = $1, status = $2, version = $3, updated_at = $4
                WHERE id = $5 AND version = $6
                "#,
            )
            .bind(wallet.balance().minor())
            .bind(wallet.status().as_str())
            .bind(wallet.version() as i64)
            .bind(wallet.updated_at())
            .bind(wallet.id_typed().0.as_uuid())
            .bind(expected as i64)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("update_wallet", e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict(format!(
                    "wallet {}: expected version {expected} no longer current",
                    wallet.id_typed()
                )));
            }
        }
        ExpectedVersion::Any => {
            sqlx::query(
                r#"
                INSERT INTO wallets (
                    id, owner_id, currency, balance_minor, status, version, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO UPDATE SET
                    balance_minor = EXCLUDED.balance_minor,
                    status = EXCLUDED.status,
                    version = EXCLUDED.version,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(wallet.id_typed().0.as_uuid())
            .bind(wallet.owner_id().as_uuid())
            .bind(wallet.currency().as_str())
            .bind(wallet.balance().minor())
            .bind(wallet.status().as_str())
            .bind(wallet.version() as i64)
            .bind(wallet.updated_at())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("upsert_wallet", e))?;
        }
    }
    Ok(())
}

async fn write_withdrawal(
    tx: &mut PgTransaction<'_, Postgres>,
    write: &WithdrawalWrite,
) -> Result<(), StoreError> {
    let w = &write.withdrawal;
    match write.expected {
        ExpectedVersion::Exact(0) => {
            sqlx::query(
                r#"
                INSERT INTO withdrawals (
                    id, wallet_id, amount_minor, currency, payment_method, payment_details,
                    status, transaction_id, processed_by, rejection_reason,
                    requested_at, processed_at, completed_at, version
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(w.id_typed().0.as_uuid())
            .bind(w.wallet_id().0.as_uuid())
            .bind(w.amount().minor())
            .bind(w.amount().currency().as_str())
            .bind(w.payment_method())
            .bind(w.payment_details())
            .bind(w.status().as_str())
            .bind(w.transaction_id().map(|id| *id.0.as_uuid()))
            .bind(w.processed_by().map(|id| *id.as_uuid()))
            .bind(w.rejection_reason())
            .bind(w.requested_at())
            .bind(w.processed_at())
            .bind(w.completed_at())
            .bind(w.version() as i64)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!("withdrawal {} already exists", w.id_typed()))
                } else {
                    map_sqlx_error("insert_withdrawal", e)
                }
            })?;
        }
        ExpectedVersion::Exact(expected) => {
            let result = sqlx::query(
                r#"
                UPDATE withdrawals
                SET status = $1, transaction_id = $2, processed_by = $3,
                    rejection_reason = $4, processed_at = $5, completed_at = $6, version = $7
                WHERE id = $8 AND version = $9
                "#,
            )
            .bind(w.status().as_str())
            .bind(w.transaction_id().map(|id| *id.0.as_uuid()))
            .bind(w.processed_by().map(|id| *id.as_uuid()))
            .bind(w.rejection_reason())
            .bind(w.processed_at())
            .bind(w.completed_at())
            .bind(w.version() as i64)
            .bind(w.id_typed().0.as_uuid())
            .bind(expected as i64)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("update_withdrawal", e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict(format!(
                    "withdrawal {}: expected version {expected} no longer current",
                    w.id_typed()
                )));
            }
        }
        ExpectedVersion::Any => {
            return Err(StoreError::Backend(
                "withdrawal writes require an exact expected version".to_string(),
            ));
        }
    }
    Ok(())
}

async fn insert_entry(
    tx: &mut PgTransaction<'_, Postgres>,
    entry: &Transaction,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, kind, amount_minor, currency,
            source_wallet_id, destination_wallet_id,
            related_entity_type, related_entity_id,
            idempotency_key, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(entry.id().0.as_uuid())
    .bind(entry.kind().as_str())
    .bind(entry.amount().minor())
    .bind(entry.amount().currency().as_str())
    .bind(entry.source_wallet_id().map(|id| *id.0.as_uuid()))
    .bind(entry.destination_wallet_id().map(|id| *id.0.as_uuid()))
    .bind(&entry.related().entity_type)
    .bind(&entry.related().entity_id)
    .bind(entry.idempotency_key().as_str())
    .bind(entry.created_at())
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            StoreError::DuplicateIdempotencyKey(entry.idempotency_key().to_string())
        } else {
            map_sqlx_error("insert_transaction", e)
        }
    })?;
    Ok(())
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(wallet_id = %id), err)]
    async fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, StoreError> {
        let row = sqlx::query(
            "SELECT id, owner_id, currency, balance_minor, status, version, updated_at
             FROM wallets WHERE id = $1",
        )
        .bind(id.0.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_wallet", e))?;

        row.map(decode_wallet).transpose()
    }

    #[instrument(skip(self), fields(owner = %owner, currency = %currency), err)]
    async fn wallet_for_owner(
        &self,
        owner: UserId,
        currency: Currency,
    ) -> Result<Option<Wallet>, StoreError> {
        let row = sqlx::query(
            "SELECT id, owner_id, currency, balance_minor, status, version, updated_at
             FROM wallets WHERE owner_id = $1 AND currency = $2",
        )
        .bind(owner.as_uuid())
        .bind(currency.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_wallet_for_owner", e))?;

        row.map(decode_wallet).transpose()
    }

    #[instrument(skip(self), fields(withdrawal_id = %id), err)]
    async fn withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>, StoreError> {
        let row = sqlx::query(
            "SELECT id, wallet_id, amount_minor, currency, payment_method, payment_details,
                    status, transaction_id, processed_by, rejection_reason,
                    requested_at, processed_at, completed_at, version
             FROM withdrawals WHERE id = $1",
        )
        .bind(id.0.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_withdrawal", e))?;

        row.map(decode_withdrawal).transpose()
    }

    #[instrument(skip(self), fields(wallet_id = %id), err)]
    async fn entries_for_wallet(&self, id: WalletId) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, kind, amount_minor, currency,
                    source_wallet_id, destination_wallet_id,
                    related_entity_type, related_entity_id,
                    idempotency_key, created_at
             FROM transactions
             WHERE source_wallet_id = $1 OR destination_wallet_id = $1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(id.0.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_entries", e))?;

        rows.into_iter().map(decode_entry).collect()
    }

    #[instrument(skip(self, key), err)]
    async fn entry_for_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query(
            "SELECT id, kind, amount_minor, currency,
                    source_wallet_id, destination_wallet_id,
                    related_entity_type, related_entity_id,
                    idempotency_key, created_at
             FROM transactions WHERE idempotency_key = $1",
        )
        .bind(key.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_entry_for_key", e))?;

        row.map(decode_entry).transpose()
    }

    #[instrument(
        skip(self, commit),
        fields(
            wallet_writes = commit.wallets.len(),
            withdrawal_writes = commit.withdrawals.len(),
            entries = commit.entries.len()
        ),
        err
    )]
    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        if commit.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_commit", e))?;

        // Ascending wallet-id order keeps row-lock acquisition deterministic
        // across concurrent commits.
        let mut wallet_writes: Vec<&WalletWrite> = commit.wallets.iter().collect();
        wallet_writes.sort_by_key(|w| w.wallet.id_typed());

        for write in wallet_writes {
            write_wallet(&mut tx, write).await?;
        }
        for write in &commit.withdrawals {
            write_withdrawal(&mut tx, write).await?;
        }
        for entry in &commit.entries {
            insert_entry(&mut tx, entry).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }
}

fn decode_wallet(row: sqlx::postgres::PgRow) -> Result<Wallet, StoreError> {
    let wallet_id: uuid::Uuid = try_column(&row, "id")?;
    let owner_id: uuid::Uuid = try_column(&row, "owner_id")?;
    let currency: String = try_column(&row, "currency")?;
    let balance_minor: i64 = try_column(&row, "balance_minor")?;
    let status: String = try_column(&row, "status")?;
    let version: i64 = try_column(&row, "version")?;
    let updated_at: DateTime<Utc> = try_column(&row, "updated_at")?;

    let currency = Currency::new(&currency).map_err(corrupt_row)?;
    let status = WalletStatus::from_str(&status).map_err(corrupt_row)?;

    Ok(Wallet::from_stored(
        WalletId::new(AggregateId::from_uuid(wallet_id)),
        UserId::from_uuid(owner_id),
        Money::from_minor(balance_minor, currency),
        status,
        version as u64,
        updated_at,
    ))
}

fn decode_withdrawal(row: sqlx::postgres::PgRow) -> Result<Withdrawal, StoreError> {
    let withdrawal_id: uuid::Uuid = try_column(&row, "id")?;
    let wallet_id: uuid::Uuid = try_column(&row, "wallet_id")?;
    let amount_minor: i64 = try_column(&row, "amount_minor")?;
    let currency: String = try_column(&row, "currency")?;
    let payment_method: String = try_column(&row, "payment_method")?;
    let payment_details: String = try_column(&row, "payment_details")?;
    let status: String = try_column(&row, "status")?;
    let transaction_id: Option<uuid::Uuid> = try_column(&row, "transaction_id")?;
    let processed_by: Option<uuid::Uuid> = try_column(&row, "processed_by")?;
    let rejection_reason: Option<String> = try_column(&row, "rejection_reason")?;
    let requested_at: DateTime<Utc> = try_column(&row, "requested_at")?;
    let processed_at: Option<DateTime<Utc>> = try_column(&row, "processed_at")?;
    let completed_at: Option<DateTime<Utc>> = try_column(&row, "completed_at")?;
    let version: i64 = try_column(&row, "version")?;

    let currency = Currency::new(&currency).map_err(corrupt_row)?;
    let status = WithdrawalStatus::from_str(&status).map_err(corrupt_row)?;

    Ok(Withdrawal::from_stored(
        WithdrawalId::new(AggregateId::from_uuid(withdrawal_id)),
        WalletId::new(AggregateId::from_uuid(wallet_id)),
        Money::from_minor(amount_minor, currency),
        payment_method,
        payment_details,
        status,
        transaction_id.map(|id| TransactionId::new(AggregateId::from_uuid(id))),
        processed_by.map(UserId::from_uuid),
        rejection_reason,
        requested_at,
        processed_at,
        completed_at,
        version as u64,
    ))
}

fn decode_entry(row: sqlx::postgres::PgRow) -> Result<Transaction, StoreError> {
    let transaction_id: uuid::Uuid = try_column(&row, "id")?;
    let kind: String = try_column(&row, "kind")?;
    let amount_minor: i64 = try_column(&row, "amount_minor")?;
    let currency: String = try_column(&row, "currency")?;
    let source: Option<uuid::Uuid> = try_column(&row, "source_wallet_id")?;
    let destination: Option<uuid::Uuid> = try_column(&row, "destination_wallet_id")?;
    let entity_type: String = try_column(&row, "related_entity_type")?;
    let entity_id: String = try_column(&row, "related_entity_id")?;
    let idempotency_key: String = try_column(&row, "idempotency_key")?;
    let created_at: DateTime<Utc> = try_column(&row, "created_at")?;

    let currency = Currency::new(&currency).map_err(corrupt_row)?;
    let kind = TransactionKind::from_str(&kind).map_err(corrupt_row)?;

    Ok(Transaction::from_stored(
        TransactionId::new(AggregateId::from_uuid(transaction_id)),
        kind,
        Money::from_minor(amount_minor, currency),
        source.map(|id| WalletId::new(AggregateId::from_uuid(id))),
        destination.map(|id| WalletId::new(AggregateId::from_uuid(id))),
        EntityRef::new(entity_type, entity_id),
        IdempotencyKey::from(idempotency_key),
        created_at,
    ))
}

fn try_column<'r, T>(row: &'r sqlx::postgres::PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Backend(format!("failed to read column {name}: {e}")))
}

fn corrupt_row(err: payvault_core::DomainError) -> StoreError {
    StoreError::Backend(format!("corrupt row: {err}"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            if db_err.code().as_deref() == Some("23505") {
                StoreError::Conflict(msg)
            } else {
                StoreError::Backend(msg)
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
