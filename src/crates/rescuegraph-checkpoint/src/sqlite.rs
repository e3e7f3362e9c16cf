//! SQLite-backed store
//!
//! Durable implementation of [`CheckpointStore`] and [`EffectStore`] using `sqlx`.
//! The schema lives in `migrations/` and is applied on open.
//!
//! Timestamps are stored as unix milliseconds, JSON columns as text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::checkpoint::{
    Checkpoint, CheckpointPayload, EffectRecord, InstanceStatus, SuspensionTicket,
    WorkflowInstance,
};
use crate::error::{CheckpointError, Result};
use crate::traits::{chain_from_latest, CheckpointStore, EffectStore};

/// SQLite implementation of both store traits
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and apply migrations
    pub async fn open<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let path = database_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CheckpointError::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| CheckpointError::Database(format!("Failed to connect to database: {}", e)))?;

        info!(path = %path.display(), "Checkpoint database opened");
        Self::from_pool(pool).await
    }

    /// Connect with a `sqlite:` URL and apply migrations
    pub async fn connect(database_url: &str) -> Result<Self> {
        if database_url.contains(":memory:") {
            return Self::in_memory().await;
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| CheckpointError::Database(format!("Invalid database url: {}", e)))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| CheckpointError::Database(format!("Failed to connect to database: {}", e)))?;

        debug!(url = %database_url, "Checkpoint database connected");
        Self::from_pool(pool).await
    }

    /// A private in-memory database
    ///
    /// Each SQLite connection to `:memory:` is a separate database, so the pool holds
    /// exactly one connection and never recycles it.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CheckpointError::Database(format!("Failed to open in-memory database: {}", e)))?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and apply migrations
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self {
            pool: Arc::new(pool),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| CheckpointError::Database(format!("Migration failed: {}", e)))?;
        debug!("Checkpoint migrations applied");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| CheckpointError::Invalid(format!("timestamp out of range: {}", ms)))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| CheckpointError::Invalid(format!("column {}: {}", name, e)))
}

fn instance_from_row(row: &SqliteRow) -> Result<WorkflowInstance> {
    let status: String = column(row, "status")?;
    let durability: String = column(row, "durability")?;
    Ok(WorkflowInstance {
        instance_id: column(row, "instance_id")?,
        namespace: column(row, "namespace")?,
        graph_name: column(row, "graph_name")?,
        status: status.parse()?,
        durability: durability
            .parse()
            .map_err(CheckpointError::Invalid)?,
        created_at: from_millis(column(row, "created_at")?)?,
        updated_at: from_millis(column(row, "updated_at")?)?,
    })
}

fn checkpoint_from_row(row: &SqliteRow) -> Result<Checkpoint> {
    let payload: String = column(row, "payload")?;
    Ok(Checkpoint {
        checkpoint_id: column(row, "checkpoint_id")?,
        instance_id: column(row, "instance_id")?,
        parent_checkpoint_id: column(row, "parent_checkpoint_id")?,
        namespace: column(row, "namespace")?,
        payload: serde_json::from_str::<CheckpointPayload>(&payload)?,
        created_at: from_millis(column(row, "created_at")?)?,
    })
}

fn ticket_from_row(row: &SqliteRow) -> Result<SuspensionTicket> {
    let prompt: String = column(row, "prompt_payload")?;
    let choices: String = column(row, "valid_choice_ids")?;
    let expires_at: Option<i64> = column(row, "expires_at")?;
    Ok(SuspensionTicket {
        instance_id: column(row, "instance_id")?,
        step: column(row, "step")?,
        prompt_payload: serde_json::from_str(&prompt)?,
        valid_choice_ids: serde_json::from_str(&choices)?,
        decision_key: column(row, "decision_key")?,
        created_at: from_millis(column(row, "created_at")?)?,
        expires_at: expires_at.map(from_millis).transpose()?,
    })
}

fn effect_from_row(row: &SqliteRow) -> Result<EffectRecord> {
    let result: String = column(row, "result")?;
    Ok(EffectRecord {
        instance_id: column(row, "instance_id")?,
        call_site_id: column(row, "call_site_id")?,
        input_hash: column(row, "input_hash")?,
        result: serde_json::from_str(&result)?,
        completed_at: from_millis(column(row, "completed_at")?)?,
    })
}

/// Checkpoint insert plus instance status update, inside an open transaction
async fn append_checkpoint(
    conn: &mut sqlx::SqliteConnection,
    checkpoint: &Checkpoint,
    status: InstanceStatus,
) -> Result<()> {
    let exists = sqlx::query("SELECT 1 FROM workflow_instances WHERE instance_id = ?")
        .bind(&checkpoint.instance_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| CheckpointError::Database(format!("Failed to load instance: {}", e)))?;
    if exists.is_none() {
        return Err(CheckpointError::NotFound(checkpoint.instance_id.clone()));
    }

    let latest: Option<String> = sqlx::query(
        "SELECT checkpoint_id FROM checkpoints WHERE instance_id = ? ORDER BY seq DESC LIMIT 1",
    )
    .bind(&checkpoint.instance_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| CheckpointError::Database(format!("Failed to load latest checkpoint: {}", e)))?
    .map(|row| column::<String>(&row, "checkpoint_id"))
    .transpose()?;

    if latest != checkpoint.parent_checkpoint_id {
        return Err(CheckpointError::Conflict {
            instance_id: checkpoint.instance_id.clone(),
            expected: latest,
            actual: checkpoint.parent_checkpoint_id.clone(),
        });
    }

    let payload = serde_json::to_string(&checkpoint.payload)?;
    sqlx::query(
        "INSERT INTO checkpoints (checkpoint_id, instance_id, parent_checkpoint_id, namespace, payload, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&checkpoint.checkpoint_id)
    .bind(&checkpoint.instance_id)
    .bind(&checkpoint.parent_checkpoint_id)
    .bind(&checkpoint.namespace)
    .bind(payload)
    .bind(millis(checkpoint.created_at))
    .execute(&mut *conn)
    .await
    .map_err(|e| CheckpointError::Database(format!("Failed to insert checkpoint: {}", e)))?;

    sqlx::query("UPDATE workflow_instances SET status = ?, updated_at = ? WHERE instance_id = ?")
        .bind(status.as_str())
        .bind(millis(Utc::now()))
        .bind(&checkpoint.instance_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| CheckpointError::Database(format!("Failed to update instance status: {}", e)))?;

    Ok(())
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO workflow_instances (instance_id, namespace, graph_name, status, durability, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&instance.instance_id)
        .bind(&instance.namespace)
        .bind(&instance.graph_name)
        .bind(instance.status.as_str())
        .bind(instance.durability.as_str())
        .bind(millis(instance.created_at))
        .bind(millis(instance.updated_at))
        .execute(self.pool())
        .await
        .map_err(|e| CheckpointError::Database(format!("Failed to create instance: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(CheckpointError::AlreadyExists(instance.instance_id.clone()));
        }
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<WorkflowInstance>> {
        sqlx::query(
            "SELECT instance_id, namespace, graph_name, status, durability, created_at, updated_at
             FROM workflow_instances WHERE instance_id = ?",
        )
        .bind(instance_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| CheckpointError::Database(format!("Failed to load instance: {}", e)))?
        .map(|row| instance_from_row(&row))
        .transpose()
    }

    async fn list_instances(
        &self,
        namespace: Option<&str>,
        status: Option<InstanceStatus>,
    ) -> Result<Vec<WorkflowInstance>> {
        let rows = sqlx::query(
            "SELECT instance_id, namespace, graph_name, status, durability, created_at, updated_at
             FROM workflow_instances
             WHERE (?1 IS NULL OR namespace = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at ASC, instance_id ASC",
        )
        .bind(namespace)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(self.pool())
        .await
        .map_err(|e| CheckpointError::Database(format!("Failed to list instances: {}", e)))?;

        rows.iter().map(instance_from_row).collect()
    }

    async fn save(&self, checkpoint: &Checkpoint, status: InstanceStatus) -> Result<String> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CheckpointError::Database(format!("Failed to begin transaction: {}", e)))?;

        append_checkpoint(&mut *tx, checkpoint, status).await?;

        tx.commit()
            .await
            .map_err(|e| CheckpointError::Database(format!("Failed to commit checkpoint: {}", e)))?;

        debug!(
            instance_id = %checkpoint.instance_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            status = %status,
            "Checkpoint saved"
        );
        Ok(checkpoint.checkpoint_id.clone())
    }

    async fn save_suspended(
        &self,
        checkpoint: &Checkpoint,
        ticket: &SuspensionTicket,
    ) -> Result<String> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CheckpointError::Database(format!("Failed to begin transaction: {}", e)))?;

        append_checkpoint(&mut *tx, checkpoint, InstanceStatus::Suspended).await?;

        sqlx::query(
            "INSERT OR REPLACE INTO suspension_tickets
                (instance_id, step, prompt_payload, valid_choice_ids, decision_key, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&ticket.instance_id)
        .bind(&ticket.step)
        .bind(serde_json::to_string(&ticket.prompt_payload)?)
        .bind(serde_json::to_string(&ticket.valid_choice_ids)?)
        .bind(&ticket.decision_key)
        .bind(millis(ticket.created_at))
        .bind(ticket.expires_at.map(millis))
        .execute(&mut *tx)
        .await
        .map_err(|e| CheckpointError::Database(format!("Failed to store ticket: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| CheckpointError::Database(format!("Failed to commit suspension: {}", e)))?;

        debug!(
            instance_id = %checkpoint.instance_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            step = %ticket.step,
            "Suspension saved"
        );
        Ok(checkpoint.checkpoint_id.clone())
    }

    async fn save_resumed(&self, checkpoint: &Checkpoint) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CheckpointError::Database(format!("Failed to begin transaction: {}", e)))?;

        let deleted = sqlx::query("DELETE FROM suspension_tickets WHERE instance_id = ?")
            .bind(&checkpoint.instance_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CheckpointError::Database(format!("Failed to delete ticket: {}", e)))?;

        if deleted.rows_affected() == 0 {
            // Dropping the transaction rolls it back
            return Ok(false);
        }

        append_checkpoint(&mut *tx, checkpoint, InstanceStatus::Running).await?;

        tx.commit()
            .await
            .map_err(|e| CheckpointError::Database(format!("Failed to commit resume: {}", e)))?;
        Ok(true)
    }

    async fn load_latest(&self, instance_id: &str) -> Result<Option<Checkpoint>> {
        sqlx::query(
            "SELECT checkpoint_id, instance_id, parent_checkpoint_id, namespace, payload, created_at
             FROM checkpoints WHERE instance_id = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(instance_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| CheckpointError::Database(format!("Failed to load checkpoint: {}", e)))?
        .map(|row| checkpoint_from_row(&row))
        .transpose()
    }

    async fn list_chain(&self, instance_id: &str) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query(
            "SELECT checkpoint_id, instance_id, parent_checkpoint_id, namespace, payload, created_at
             FROM checkpoints WHERE instance_id = ? ORDER BY seq ASC",
        )
        .bind(instance_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| CheckpointError::Database(format!("Failed to list checkpoints: {}", e)))?;

        let checkpoints = rows
            .iter()
            .map(checkpoint_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(chain_from_latest(checkpoints))
    }

    async fn get_ticket(&self, instance_id: &str) -> Result<Option<SuspensionTicket>> {
        sqlx::query(
            "SELECT instance_id, step, prompt_payload, valid_choice_ids, decision_key, created_at, expires_at
             FROM suspension_tickets WHERE instance_id = ?",
        )
        .bind(instance_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| CheckpointError::Database(format!("Failed to load ticket: {}", e)))?
        .map(|row| ticket_from_row(&row))
        .transpose()
    }

    async fn take_ticket(&self, instance_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM suspension_tickets WHERE instance_id = ?")
            .bind(instance_id)
            .execute(self.pool())
            .await
            .map_err(|e| CheckpointError::Database(format!("Failed to delete ticket: {}", e)))?;
        Ok(result.rows_affected() == 1)
    }

    async fn prune(&self, instance_id: &str, keep_latest: usize) -> Result<usize> {
        let keep = keep_latest.max(1) as i64;
        let result = sqlx::query(
            "DELETE FROM checkpoints
             WHERE instance_id = ?1
               AND seq NOT IN (
                   SELECT seq FROM checkpoints WHERE instance_id = ?1 ORDER BY seq DESC LIMIT ?2
               )",
        )
        .bind(instance_id)
        .bind(keep)
        .execute(self.pool())
        .await
        .map_err(|e| CheckpointError::Database(format!("Failed to prune checkpoints: {}", e)))?;

        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl EffectStore for SqliteStore {
    async fn get_effect(
        &self,
        instance_id: &str,
        call_site_id: &str,
        input_hash: &str,
    ) -> Result<Option<EffectRecord>> {
        sqlx::query(
            "SELECT instance_id, call_site_id, input_hash, result, completed_at
             FROM effect_records
             WHERE instance_id = ? AND call_site_id = ? AND input_hash = ?",
        )
        .bind(instance_id)
        .bind(call_site_id)
        .bind(input_hash)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| CheckpointError::Database(format!("Failed to load effect record: {}", e)))?
        .map(|row| effect_from_row(&row))
        .transpose()
    }

    async fn put_effect(&self, record: &EffectRecord) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO effect_records (instance_id, call_site_id, input_hash, result, completed_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.instance_id)
        .bind(&record.call_site_id)
        .bind(&record.input_hash)
        .bind(serde_json::to_string(&record.result)?)
        .bind(millis(record.completed_at))
        .execute(self.pool())
        .await
        .map_err(|e| CheckpointError::Database(format!("Failed to store effect record: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_effects(&self, instance_id: &str) -> Result<Vec<EffectRecord>> {
        let rows = sqlx::query(
            "SELECT instance_id, call_site_id, input_hash, result, completed_at
             FROM effect_records WHERE instance_id = ?
             ORDER BY rowid ASC",
        )
        .bind(instance_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| CheckpointError::Database(format!("Failed to list effect records: {}", e)))?;

        rows.iter().map(effect_from_row).collect()
    }
}
