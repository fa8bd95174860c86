use std::sync::Arc;

use chrono::{DateTime, Utc};
use hauler_core::error::AppError;
use hauler_core::models::CanonicalRecord;
use hauler_core::traits::RecordSink;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

/// Record persistence in PostgreSQL, bound to one collection.
#[derive(Clone)]
pub struct RecordRepository {
    pool: Pool<Postgres>,
    collection: Arc<str>,
}

/// A record as stored.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: Uuid,
    pub collection: String,
    pub kind: String,
    pub data: serde_json::Value,
    pub data_hash: String,
    pub created_at: DateTime<Utc>,
}

impl RecordRepository {
    pub fn new(pool: PgPool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: Arc::from(collection.into()),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Insert one record. Returns the generated UUID.
    pub async fn save(&self, record: &CanonicalRecord) -> Result<Uuid, AppError> {
        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO records (collection, kind, data, data_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&*self.collection)
        .bind(&record.kind)
        .bind(&record.data)
        .bind(record.data_hash())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.0)
    }

    /// Insert all records in one transaction. Either every record is
    /// stored or none is.
    pub async fn save_many(&self, records: &[CanonicalRecord]) -> Result<u64, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let mut accepted = 0u64;
        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO records (collection, kind, data, data_hash)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&*self.collection)
            .bind(&record.kind)
            .bind(&record.data)
            .bind(record.data_hash())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
            accepted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(accepted)
    }

    /// Number of records in the collection.
    pub async fn count(&self) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM records WHERE collection = $1"#)
            .bind(&*self.collection)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count)
    }

    /// Records of the collection, oldest first.
    pub async fn list(&self, limit: usize) -> Result<Vec<StoredRecord>, AppError> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, collection, kind, data, data_hash, created_at
            FROM records
            WHERE collection = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(&*self.collection)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    collection: String,
    kind: String,
    data: serde_json::Value,
    data_hash: String,
    created_at: DateTime<Utc>,
}

impl From<RecordRow> for StoredRecord {
    fn from(row: RecordRow) -> Self {
        StoredRecord {
            id: row.id,
            collection: row.collection,
            kind: row.kind,
            data: row.data,
            data_hash: row.data_hash,
            created_at: row.created_at,
        }
    }
}

// -- Trait implementation --

impl RecordSink for RecordRepository {
    async fn insert(&self, record: &CanonicalRecord) -> Result<(), AppError> {
        self.save(record).await.map(|_| ())
    }

    async fn insert_many(&self, records: &[CanonicalRecord]) -> Result<u64, AppError> {
        self.save_many(records).await
    }
}
