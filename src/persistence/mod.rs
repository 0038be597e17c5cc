//! SQLite persistence for keeper state.
//!
//! Persists state to survive restarts:
//! - Ledger positions, written on every open and close
//! - Owner automation policies
//! - Pending-transfer table keyed by transfer id
//! - Domain event journal

use crate::automation::{PendingTransfer, TransferStatus};
use crate::chain::{ChainId, TransferId};
use crate::events::DomainEvent;
use crate::ledger::HedgePosition;
use crate::policy::AutomationPolicy;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// SQLite-based persistence manager.
pub struct PersistenceManager {
    conn: Mutex<Connection>,
}

impl PersistenceManager {
    /// Create a new persistence manager, initializing the database if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let manager = Self {
            conn: Mutex::new(conn),
        };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", db_path.as_ref());
        Ok(manager)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("persistence connection lock poisoned"))
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            -- Ledger positions
            CREATE TABLE IF NOT EXISTS positions (
                owner TEXT NOT NULL,
                chain_id INTEGER NOT NULL,
                position_id INTEGER NOT NULL,
                amount TEXT NOT NULL,
                target_price TEXT NOT NULL,
                is_active INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                closed_at TEXT,
                PRIMARY KEY (owner, chain_id, position_id)
            );

            -- Owner policies (JSON payload, replaced wholesale)
            CREATE TABLE IF NOT EXISTS policies (
                owner TEXT PRIMARY KEY,
                policy TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Cross-chain transfers awaiting or past delivery
            CREATE TABLE IF NOT EXISTS pending_transfers (
                transfer_id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                source_chain_id INTEGER NOT NULL,
                target_chain_id INTEGER NOT NULL,
                source_position_id INTEGER NOT NULL,
                amount TEXT NOT NULL,
                fee TEXT NOT NULL,
                target_price_at_initiation TEXT NOT NULL,
                status TEXT NOT NULL,
                delivered_amount TEXT,
                target_position_id INTEGER,
                failure_reason TEXT,
                initiated_at TEXT NOT NULL,
                resolved_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_transfers_status ON pending_transfers(status);

            -- Domain event journal
            CREATE TABLE IF NOT EXISTS domain_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                owner TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON domain_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_owner ON domain_events(owner);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Write one position row, replacing any earlier state of the same slot.
    pub fn upsert_position(&self, pos: &HedgePosition) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO positions (owner, chain_id, position_id, amount, target_price,
                                   is_active, created_at, closed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(owner, chain_id, position_id) DO UPDATE SET
                is_active = ?6,
                closed_at = ?8
            "#,
            params![
                pos.owner,
                pos.chain_id.0 as i64,
                pos.position_id as i64,
                pos.amount.to_string(),
                pos.target_price.to_string(),
                pos.is_active as i32,
                pos.created_at.to_rfc3339(),
                pos.closed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Load every stored position, active and closed.
    pub fn load_positions(&self) -> Result<Vec<HedgePosition>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT owner, chain_id, position_id, amount, target_price, is_active,
                   created_at, closed_at
            FROM positions
            ORDER BY owner, chain_id, position_id
            "#,
        )?;

        let positions = stmt
            .query_map([], |row| {
                Ok(HedgePosition {
                    owner: row.get(0)?,
                    chain_id: ChainId(row.get::<_, i64>(1)? as u64),
                    position_id: row.get::<_, i64>(2)? as usize,
                    amount: decimal_col(row, 3)?,
                    target_price: decimal_col(row, 4)?,
                    is_active: row.get::<_, i32>(5)? != 0,
                    created_at: time_col(row, 6)?,
                    closed_at: opt_time_col(row, 7)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(positions)
    }

    /// Store (or replace) an owner's policy.
    pub fn save_policy(&self, owner: &str, policy: &AutomationPolicy) -> Result<()> {
        let payload = serde_json::to_string(policy).context("Failed to encode policy")?;
        self.conn()?.execute(
            r#"
            INSERT INTO policies (owner, policy, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(owner) DO UPDATE SET policy = ?2, updated_at = ?3
            "#,
            params![owner, payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn delete_policy(&self, owner: &str) -> Result<bool> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM policies WHERE owner = ?1", params![owner])?;
        Ok(deleted > 0)
    }

    /// Load all stored policies, skipping undecodable rows.
    pub fn load_policies(&self) -> Result<Vec<(String, AutomationPolicy)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT owner, policy FROM policies ORDER BY owner")?;

        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let policies = rows
            .into_iter()
            .filter_map(|(owner, payload)| match serde_json::from_str(&payload) {
                Ok(policy) => Some((owner, policy)),
                Err(e) => {
                    warn!(%owner, error = %e, "Skipping undecodable stored policy");
                    None
                }
            })
            .collect();

        Ok(policies)
    }

    /// Insert or update a transfer record.
    pub fn upsert_transfer(&self, transfer: &PendingTransfer) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO pending_transfers (transfer_id, owner, source_chain_id, target_chain_id,
                                           source_position_id, amount, fee,
                                           target_price_at_initiation, status, delivered_amount,
                                           target_position_id, failure_reason, initiated_at,
                                           resolved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(transfer_id) DO UPDATE SET
                status = ?9,
                delivered_amount = ?10,
                target_position_id = ?11,
                failure_reason = ?12,
                resolved_at = ?14
            "#,
            params![
                transfer.transfer_id.0,
                transfer.owner,
                transfer.source_chain_id.0 as i64,
                transfer.target_chain_id.0 as i64,
                transfer.source_position_id as i64,
                transfer.amount.to_string(),
                transfer.fee.to_string(),
                transfer.target_price_at_initiation.to_string(),
                transfer.status.as_str(),
                transfer.delivered_amount.map(|d| d.to_string()),
                transfer.target_position_id.map(|id| id as i64),
                transfer.failure_reason,
                transfer.initiated_at.to_rfc3339(),
                transfer.resolved_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Move a transfer from `Pending` to `Confirming`.
    ///
    /// Returns false if the row was not pending, so only one caller can
    /// claim a delivery.
    pub fn claim_transfer(&self, transfer_id: &TransferId) -> Result<bool> {
        let claimed = self.conn()?.execute(
            "UPDATE pending_transfers SET status = ?2 WHERE transfer_id = ?1 AND status = ?3",
            params![
                transfer_id.0,
                TransferStatus::Confirming.as_str(),
                TransferStatus::Pending.as_str(),
            ],
        )?;
        Ok(claimed > 0)
    }

    pub fn get_transfer(&self, transfer_id: &TransferId) -> Result<Option<PendingTransfer>> {
        let conn = self.conn()?;
        let transfer = conn
            .query_row(
                &format!("{TRANSFER_COLUMNS} WHERE transfer_id = ?1"),
                params![transfer_id.0],
                transfer_from_row,
            )
            .optional()?;
        Ok(transfer)
    }

    /// Transfers, optionally filtered by status, oldest first.
    pub fn list_transfers(&self, status: Option<TransferStatus>) -> Result<Vec<PendingTransfer>> {
        let conn = self.conn()?;
        let transfers = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "{TRANSFER_COLUMNS} WHERE status = ?1 ORDER BY initiated_at, transfer_id"
                ))?;
                let rows: Vec<PendingTransfer> = stmt
                    .query_map(params![status.as_str()], transfer_from_row)?
                    .filter_map(readable_transfer)
                    .collect();
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "{TRANSFER_COLUMNS} ORDER BY initiated_at, transfer_id"
                ))?;
                let rows: Vec<PendingTransfer> = stmt
                    .query_map([], transfer_from_row)?
                    .filter_map(readable_transfer)
                    .collect();
                rows
            }
        };
        Ok(transfers)
    }

    /// Append a domain event to the journal.
    pub fn record_event(&self, event: &DomainEvent) -> Result<()> {
        let payload = serde_json::to_string(event).context("Failed to encode event")?;
        self.conn()?.execute(
            r#"
            INSERT INTO domain_events (timestamp, kind, owner, payload)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                event.timestamp().to_rfc3339(),
                event.kind(),
                event.owner(),
                payload,
            ],
        )?;
        Ok(())
    }

    /// Most recent journal entries, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<DomainEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT payload FROM domain_events
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let events = stmt
            .query_map([limit as i64], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|payload| serde_json::from_str(&payload).ok())
            .collect();

        Ok(events)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }
}

const TRANSFER_COLUMNS: &str = r#"
    SELECT transfer_id, owner, source_chain_id, target_chain_id, source_position_id, amount, fee,
           target_price_at_initiation, status, delivered_amount, target_position_id,
           failure_reason, initiated_at, resolved_at
    FROM pending_transfers
"#;

fn transfer_from_row(row: &Row<'_>) -> rusqlite::Result<PendingTransfer> {
    let status: String = row.get(8)?;
    let status = TransferStatus::from_str(&status).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(PendingTransfer {
        transfer_id: TransferId(row.get(0)?),
        owner: row.get(1)?,
        source_chain_id: ChainId(row.get::<_, i64>(2)? as u64),
        target_chain_id: ChainId(row.get::<_, i64>(3)? as u64),
        source_position_id: row.get::<_, i64>(4)? as usize,
        amount: decimal_col(row, 5)?,
        fee: decimal_col(row, 6)?,
        target_price_at_initiation: decimal_col(row, 7)?,
        status,
        delivered_amount: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| Decimal::from_str(&s).ok()),
        target_position_id: row.get::<_, Option<i64>>(10)?.map(|id| id as usize),
        failure_reason: row.get(11)?,
        initiated_at: time_col(row, 12)?,
        resolved_at: opt_time_col(row, 13)?,
    })
}

fn readable_transfer(row: rusqlite::Result<PendingTransfer>) -> Option<PendingTransfer> {
    match row {
        Ok(transfer) => Some(transfer),
        Err(e) => {
            warn!(error = %e, "Skipping unreadable transfer row");
            None
        }
    }
}

fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    Ok(Decimal::from_str(&row.get::<_, String>(idx)?).unwrap_or_default())
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&row.get::<_, String>(idx)?)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now()))
}

fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row.get::<_, Option<String>>(idx)?.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }))
}
