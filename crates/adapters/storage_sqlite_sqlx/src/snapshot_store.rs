//! `SQLite` implementation of [`SnapshotStore`].

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use itemhub_app::ports::SnapshotStore;
use itemhub_domain::error::HubError;
use itemhub_domain::item::PersistedItem;
use itemhub_domain::time::Timestamp;

use crate::error::StorageError;

/// Wrapper for converting database rows into domain types without polluting
/// domain structs with database concerns.
struct Wrapper(PersistedItem);

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let name: String = row.try_get("name")?;
        let value_json: String = row.try_get("value")?;
        let changed: Option<String> = row.try_get("changed_at")?;
        let checked: Option<String> = row.try_get("checked_at")?;

        let value = serde_json::from_str(&value_json)
            .map_err(|err| sqlx::Error::Decode(Box::new(err)))?;

        Ok(Self(PersistedItem {
            name,
            value,
            changed: changed.as_deref().map(parse_timestamp).transpose()?,
            checked: checked.as_deref().map(parse_timestamp).transpose()?,
        }))
    }
}

fn parse_timestamp(value: &str) -> Result<Timestamp, sqlx::Error> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.to_utc())
        .map_err(|err| sqlx::Error::Decode(Box::new(err)))
}

const DELETE_ALL: &str = "DELETE FROM item_snapshots";

const INSERT: &str = r"
    INSERT INTO item_snapshots (name, value, changed_at, checked_at)
    VALUES (?, ?, ?, ?)
";

const SELECT_ALL: &str = "SELECT * FROM item_snapshots ORDER BY name";

/// `SQLite`-backed item snapshot store.
#[derive(Debug, Clone)]
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    /// Create a new store using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn replace(&self, items: &[PersistedItem]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(DELETE_ALL).execute(&mut *tx).await?;
        for item in items {
            sqlx::query(INSERT)
                .bind(&item.name)
                .bind(serde_json::to_string(&item.value)?)
                .bind(item.changed.map(|ts| ts.to_rfc3339()))
                .bind(item.checked.map(|ts| ts.to_rfc3339()))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    async fn save(&self, items: &[PersistedItem]) -> Result<(), HubError> {
        self.replace(items).await?;
        tracing::debug!(items = items.len(), "saved item snapshot");
        Ok(())
    }

    async fn load(&self) -> Result<Vec<PersistedItem>, HubError> {
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_ALL)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|Wrapper(item)| item).collect())
    }
}
