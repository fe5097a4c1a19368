use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{info, warn};

use common::{DescriptorStore, Error, Result, StrategyDescriptor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorStatus {
    Pending,
    Admitted,
    Rejected(String),
}

// ─── In-memory store ─────────────────────────────────────────────────────────

/// Descriptor store held in process memory. Used when no database is
/// configured and by tests.
#[derive(Default)]
pub struct MemoryDescriptorStore {
    rows: Mutex<Vec<(StrategyDescriptor, DescriptorStatus)>>,
}

impl MemoryDescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor. A descriptor id that is already present is
    /// ignored; the store is append-only.
    pub fn submit(&self, descriptor: StrategyDescriptor) {
        let mut rows = self.lock();
        if rows
            .iter()
            .any(|(d, _)| d.descriptor_id == descriptor.descriptor_id)
        {
            return;
        }
        rows.push((descriptor, DescriptorStatus::Pending));
    }

    pub fn status(&self, descriptor_id: &str) -> Option<DescriptorStatus> {
        self.lock()
            .iter()
            .find(|(d, _)| d.descriptor_id == descriptor_id)
            .map(|(_, s)| s.clone())
    }

    fn set_status(&self, descriptor_id: &str, status: DescriptorStatus) -> Result<()> {
        let mut rows = self.lock();
        let row = rows
            .iter_mut()
            .find(|(d, _)| d.descriptor_id == descriptor_id)
            .ok_or_else(|| Error::Other(format!("unknown descriptor '{descriptor_id}'")))?;
        row.1 = status;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(StrategyDescriptor, DescriptorStatus)>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DescriptorStore for MemoryDescriptorStore {
    async fn list_pending(&self) -> Result<Vec<StrategyDescriptor>> {
        Ok(self
            .lock()
            .iter()
            .filter(|(_, s)| *s == DescriptorStatus::Pending)
            .map(|(d, _)| d.clone())
            .collect())
    }

    async fn mark_admitted(&self, descriptor_id: &str) -> Result<()> {
        self.set_status(descriptor_id, DescriptorStatus::Admitted)
    }

    async fn mark_rejected(&self, descriptor_id: &str, reason: &str) -> Result<()> {
        self.set_status(descriptor_id, DescriptorStatus::Rejected(reason.to_string()))
    }
}

// ─── SQLite store ────────────────────────────────────────────────────────────

/// Descriptor store backed by the `strategy_descriptors` table. The discovery
/// side inserts rows with a JSON payload; `status` stays NULL while pending.
pub struct SqliteDescriptorStore {
    pool: SqlitePool,
}

impl SqliteDescriptorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn submit(&self, descriptor: &StrategyDescriptor) -> Result<()> {
        let payload = serde_json::to_string(descriptor)?;
        self.submit_raw(&descriptor.descriptor_id, &payload).await
    }

    /// Insert a raw payload as the discovery process would.
    pub async fn submit_raw(&self, descriptor_id: &str, payload: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO strategy_descriptors (descriptor_id, payload) VALUES (?, ?)
             ON CONFLICT(descriptor_id) DO NOTHING",
        )
        .bind(descriptor_id)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn status(&self, descriptor_id: &str) -> Result<Option<DescriptorStatus>> {
        let row: Option<(Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT status, reason FROM strategy_descriptors WHERE descriptor_id = ?",
        )
        .bind(descriptor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(status, reason)| match status.as_deref() {
            None => DescriptorStatus::Pending,
            Some("admitted") => DescriptorStatus::Admitted,
            Some(_) => DescriptorStatus::Rejected(reason.unwrap_or_default()),
        }))
    }

    async fn set_status(&self, descriptor_id: &str, status: &str, reason: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE strategy_descriptors
             SET status = ?, reason = ?, processed_at = ?
             WHERE descriptor_id = ?",
        )
        .bind(status)
        .bind(reason)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(descriptor_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// The row id is authoritative; a payload may omit `descriptor_id`.
fn parse_payload(descriptor_id: &str, payload: &str) -> Result<StrategyDescriptor> {
    let mut value: serde_json::Value = serde_json::from_str(payload)?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| Error::Other("payload is not a JSON object".into()))?;
    object.insert(
        "descriptor_id".into(),
        serde_json::Value::String(descriptor_id.to_string()),
    );
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl DescriptorStore for SqliteDescriptorStore {
    async fn list_pending(&self) -> Result<Vec<StrategyDescriptor>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT descriptor_id, payload FROM strategy_descriptors
             WHERE status IS NULL
             ORDER BY created_at, descriptor_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut pending = Vec::with_capacity(rows.len());
        for (descriptor_id, payload) in rows {
            match parse_payload(&descriptor_id, &payload) {
                Ok(descriptor) => pending.push(descriptor),
                Err(e) => {
                    warn!(descriptor_id = %descriptor_id, error = %e, "Unparseable descriptor payload, rejecting");
                    self.mark_rejected(&descriptor_id, &format!("unparseable payload: {e}"))
                        .await?;
                }
            }
        }
        Ok(pending)
    }

    async fn mark_admitted(&self, descriptor_id: &str) -> Result<()> {
        self.set_status(descriptor_id, "admitted", None).await?;
        info!(descriptor_id, "Descriptor marked admitted");
        Ok(())
    }

    async fn mark_rejected(&self, descriptor_id: &str, reason: &str) -> Result<()> {
        self.set_status(descriptor_id, "rejected", Some(reason)).await
    }
}
