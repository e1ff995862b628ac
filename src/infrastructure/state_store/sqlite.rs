//! Durable `StateStore` backed by SQLite, grounded on the reference
//! engine's `infrastructure::persistence::database::Database` (same
//! `sqlx::sqlite` pool setup, WAL journal mode for concurrency).
//!
//! The spec frames the State Store as a key/value-shaped mapping
//! (`lock/{name}`, `signal/{fingerprint}`, `order/{order_id}`,
//! `oco/{group_id}`, plus the `order_by_exchange_id` secondary index) —
//! so rather than modeling five bespoke tables, this adapter keeps one
//! `kv` table per namespace and stores each record as a JSON blob. The
//! conditional-update primitives the `StateStore` trait needs
//! (insert-if-absent-or-expired, renew-if-holder-matches) are expressed
//! as single `UPDATE ... WHERE` / `INSERT OR IGNORE` statements so
//! atomicity comes from SQLite itself rather than an in-process mutex.

use crate::domain::errors::StateStoreError;
use crate::domain::lock::{Lock, ProcessedSignalRecord};
use crate::domain::oco::{OcoPair, OcoState};
use crate::domain::order::{Order, OrderId};
use crate::domain::ports::StateStore;
use crate::domain::signal::SignalFingerprint;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub async fn connect(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("failed to create state store directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // An in-memory database only exists for the lifetime of one
        // connection, so a pool of several would each see an empty,
        // unrelated database. Pin the pool to a single connection in
        // that case; file-backed databases keep the normal pool size.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("failed to connect to state store database")?;

        info!(db_url, "connected to state store");

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS locks (
                name TEXT PRIMARY KEY,
                holder_id TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_signals (
                fingerprint TEXT PRIMARY KEY,
                record TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                exchange_order_id TEXT,
                is_terminal INTEGER NOT NULL,
                record TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS oco_pairs (
                group_id TEXT PRIMARY KEY,
                is_open INTEGER NOT NULL,
                record TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seen_events (
                exchange_order_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                PRIMARY KEY (exchange_order_id, sequence)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn store_err(context: &str, err: impl std::fmt::Display) -> StateStoreError {
    StateStoreError::Transient {
        reason: format!("{context}: {err}"),
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get_lock(&self, name: &str) -> Result<Option<Lock>, StateStoreError> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT holder_id, acquired_at, expires_at FROM locks WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err("get_lock", e))?;

        Ok(match row {
            Some((holder_id, acquired_at, expires_at)) => Some(Lock {
                name: name.to_string(),
                holder_id,
                acquired_at: parse_ts(&acquired_at)?,
                expires_at: parse_ts(&expires_at)?,
            }),
            None => None,
        })
    }

    async fn put_lock_if_absent_or_expired(
        &self,
        lock: &Lock,
        now: DateTime<Utc>,
    ) -> Result<bool, StateStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO locks (name, holder_id, acquired_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                holder_id = excluded.holder_id,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE locks.expires_at <= ?
            "#,
        )
        .bind(&lock.name)
        .bind(&lock.holder_id)
        .bind(lock.acquired_at.to_rfc3339())
        .bind(lock.expires_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("put_lock_if_absent_or_expired", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn renew_lock(
        &self,
        name: &str,
        holder_id: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<bool, StateStoreError> {
        let result = sqlx::query(
            "UPDATE locks SET expires_at = ? WHERE name = ? AND holder_id = ?",
        )
        .bind(new_expires_at.to_rfc3339())
        .bind(name)
        .bind(holder_id)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("renew_lock", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_lock_if_holder(
        &self,
        name: &str,
        holder_id: &str,
    ) -> Result<(), StateStoreError> {
        sqlx::query("DELETE FROM locks WHERE name = ? AND holder_id = ?")
            .bind(name)
            .bind(holder_id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("delete_lock_if_holder", e))?;
        Ok(())
    }

    async fn get_processed_signal(
        &self,
        fingerprint: &SignalFingerprint,
    ) -> Result<Option<ProcessedSignalRecord>, StateStoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT record FROM processed_signals WHERE fingerprint = ?")
                .bind(&fingerprint.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_err("get_processed_signal", e))?;

        row.map(|(json,)| {
            serde_json::from_str(&json).map_err(|e| store_err("decode processed_signal", e))
        })
        .transpose()
    }

    async fn put_processed_signal(
        &self,
        record: &ProcessedSignalRecord,
    ) -> Result<(), StateStoreError> {
        let json = serde_json::to_string(record).map_err(|e| store_err("encode record", e))?;
        sqlx::query(
            "INSERT INTO processed_signals (fingerprint, record) VALUES (?, ?)
             ON CONFLICT(fingerprint) DO UPDATE SET record = excluded.record",
        )
        .bind(&record.fingerprint.0)
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("put_processed_signal", e))?;
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, StateStoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT record FROM orders WHERE order_id = ?")
                .bind(order_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_err("get_order", e))?;

        row.map(|(json,)| serde_json::from_str(&json).map_err(|e| store_err("decode order", e)))
            .transpose()
    }

    async fn put_order(&self, order: &Order) -> Result<(), StateStoreError> {
        let json = serde_json::to_string(order).map_err(|e| store_err("encode order", e))?;
        sqlx::query(
            "INSERT INTO orders (order_id, exchange_order_id, is_terminal, record)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(order_id) DO UPDATE SET
                exchange_order_id = excluded.exchange_order_id,
                is_terminal = excluded.is_terminal,
                record = excluded.record",
        )
        .bind(order.order_id.to_string())
        .bind(&order.exchange_order_id)
        .bind(order.status.is_terminal() as i64)
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("put_order", e))?;
        Ok(())
    }

    async fn get_order_by_exchange_id(
        &self,
        exchange_order_id: &str,
    ) -> Result<Option<OrderId>, StateStoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT order_id FROM orders WHERE exchange_order_id = ?")
                .bind(exchange_order_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_err("get_order_by_exchange_id", e))?;

        row.map(|(id_str,)| {
            ulid::Ulid::from_string(&id_str)
                .map(crate::domain::order::OrderId)
                .map_err(|e| store_err("decode order_id", e))
        })
        .transpose()
    }

    async fn list_pending_orders(&self) -> Result<Vec<Order>, StateStoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT record FROM orders WHERE exchange_order_id IS NULL AND is_terminal = 0",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("list_pending_orders", e))?;

        rows.into_iter()
            .map(|(json,)| serde_json::from_str(&json).map_err(|e| store_err("decode order", e)))
            .collect()
    }

    async fn get_oco_pair(&self, group_id: &str) -> Result<Option<OcoPair>, StateStoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT record FROM oco_pairs WHERE group_id = ?")
                .bind(group_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_err("get_oco_pair", e))?;

        row.map(|(json,)| serde_json::from_str(&json).map_err(|e| store_err("decode oco_pair", e)))
            .transpose()
    }

    async fn put_oco_pair(&self, pair: &OcoPair) -> Result<(), StateStoreError> {
        let json = serde_json::to_string(pair).map_err(|e| store_err("encode oco_pair", e))?;
        let is_open = !matches!(pair.state, OcoState::Completed | OcoState::Failed);
        sqlx::query(
            "INSERT INTO oco_pairs (group_id, is_open, record) VALUES (?, ?, ?)
             ON CONFLICT(group_id) DO UPDATE SET is_open = excluded.is_open, record = excluded.record",
        )
        .bind(&pair.group_id.0)
        .bind(is_open as i64)
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("put_oco_pair", e))?;
        Ok(())
    }

    async fn list_open_oco_pairs(&self) -> Result<Vec<OcoPair>, StateStoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT record FROM oco_pairs WHERE is_open = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_err("list_open_oco_pairs", e))?;

        rows.into_iter()
            .map(|(json,)| serde_json::from_str(&json).map_err(|e| store_err("decode oco_pair", e)))
            .collect()
    }

    async fn mark_event_seen(
        &self,
        exchange_order_id: &str,
        sequence: u64,
    ) -> Result<bool, StateStoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO seen_events (exchange_order_id, sequence) VALUES (?, ?)",
        )
        .bind(exchange_order_id)
        .bind(sequence as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("mark_event_seen", e))?;

        Ok(result.rows_affected() > 0)
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StateStoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| store_err("parse timestamp", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_conditional_insert_respects_expiry() {
        let store = SqliteStateStore::connect("sqlite::memory:").await.unwrap();
        let now = Utc::now();
        let lock = Lock {
            name: "signal:abc".into(),
            holder_id: "w1".into(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(30),
        };

        assert!(store.put_lock_if_absent_or_expired(&lock, now).await.unwrap());
        assert!(!store.put_lock_if_absent_or_expired(&lock, now).await.unwrap());

        let after_expiry = now + chrono::Duration::seconds(31);
        assert!(
            store
                .put_lock_if_absent_or_expired(&lock, after_expiry)
                .await
                .unwrap()
        );
    }
}
