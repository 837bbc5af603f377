//! SQLite store

use std::str::FromStr;

use async_trait::async_trait;
use authscan_core::{
    BulkScanJob, Evidence, ExtractedPolicyRecord, PolicyId, RepositorySource, RepositoryStatus,
    ScanJob, SourceKind,
};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use time::OffsetDateTime;
use tracing::debug;

use crate::store::{PolicyScope, Store, StoredPolicy};
use crate::{Result, StorageError};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS repositories (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        locator TEXT NOT NULL,
        checkpoint TEXT,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        last_scanned_at INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS scan_jobs (
        id TEXT PRIMARY KEY,
        repository_id TEXT NOT NULL,
        bulk_scan_id TEXT,
        status TEXT NOT NULL,
        files_scanned INTEGER NOT NULL,
        batches_processed INTEGER NOT NULL,
        policies_extracted INTEGER NOT NULL,
        errors_count INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        data TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_scan_jobs_repository ON scan_jobs(repository_id)",
    "CREATE TABLE IF NOT EXISTS bulk_scan_jobs (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        status TEXT NOT NULL,
        data TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS policies (
        id TEXT PRIMARY KEY,
        repository_id TEXT NOT NULL,
        scan_job_id TEXT NOT NULL,
        file_path TEXT NOT NULL,
        subject TEXT NOT NULL,
        resource TEXT NOT NULL,
        action TEXT NOT NULL,
        conditions TEXT,
        description TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_policies_file ON policies(repository_id, file_path)",
    "CREATE TABLE IF NOT EXISTS evidence (
        policy_id TEXT NOT NULL REFERENCES policies(id) ON DELETE CASCADE,
        ordinal INTEGER NOT NULL,
        file_path TEXT NOT NULL,
        line_start INTEGER NOT NULL,
        line_end INTEGER NOT NULL,
        snippet TEXT NOT NULL,
        PRIMARY KEY (policy_id, ordinal)
    )",
];

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url`, e.g. `sqlite://authscan.db`.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        debug!(url, "opened sqlite store");
        Ok(store)
    }

    /// Private in-memory database. A single connection keeps every query on
    /// the same database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn load_evidence(&self, policy_id: &str) -> Result<Vec<Evidence>> {
        let rows = sqlx::query(
            "SELECT file_path, line_start, line_end, snippet FROM evidence
             WHERE policy_id = ? ORDER BY ordinal",
        )
        .bind(policy_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Evidence> {
                Ok(Evidence {
                    file_path: row.try_get("file_path")?,
                    line_start: row.try_get::<i64, _>("line_start")? as usize,
                    line_end: row.try_get::<i64, _>("line_end")? as usize,
                    snippet: row.try_get("snippet")?,
                })
            })
            .collect()
    }
}

fn timestamp(value: i64, table: &'static str) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(value).map_err(|e| StorageError::Corrupt {
        table,
        reason: e.to_string(),
    })
}

fn repository_from_row(row: &SqliteRow) -> Result<RepositorySource> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let corrupt = |reason: String| StorageError::Corrupt {
        table: "repositories",
        reason,
    };

    Ok(RepositorySource {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        kind: SourceKind::parse(&kind).ok_or_else(|| corrupt(format!("unknown kind {kind}")))?,
        locator: row.try_get("locator")?,
        checkpoint: row.try_get("checkpoint")?,
        status: RepositoryStatus::parse(&status)
            .ok_or_else(|| corrupt(format!("unknown status {status}")))?,
        created_at: timestamp(row.try_get("created_at")?, "repositories")?,
        updated_at: timestamp(row.try_get("updated_at")?, "repositories")?,
        last_scanned_at: row
            .try_get::<Option<i64>, _>("last_scanned_at")?
            .map(|t| timestamp(t, "repositories"))
            .transpose()?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_repository(&self, repo: &RepositorySource) -> Result<()> {
        sqlx::query(
            "INSERT INTO repositories
                (id, tenant_id, name, kind, locator, checkpoint, status, created_at, updated_at, last_scanned_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                locator = excluded.locator,
                checkpoint = excluded.checkpoint,
                status = excluded.status,
                updated_at = excluded.updated_at,
                last_scanned_at = excluded.last_scanned_at",
        )
        .bind(&repo.id)
        .bind(&repo.tenant_id)
        .bind(&repo.name)
        .bind(repo.kind.as_str())
        .bind(&repo.locator)
        .bind(&repo.checkpoint)
        .bind(repo.status.as_str())
        .bind(repo.created_at.unix_timestamp())
        .bind(repo.updated_at.unix_timestamp())
        .bind(repo.last_scanned_at.map(|t| t.unix_timestamp()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_repository(&self, id: &str) -> Result<Option<RepositorySource>> {
        let row = sqlx::query("SELECT * FROM repositories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(repository_from_row).transpose()
    }

    async fn list_repositories(&self, tenant_id: Option<&str>) -> Result<Vec<RepositorySource>> {
        let rows = match tenant_id {
            Some(tenant) => {
                sqlx::query("SELECT * FROM repositories WHERE tenant_id = ? ORDER BY created_at, id")
                    .bind(tenant)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM repositories ORDER BY created_at, id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(repository_from_row).collect()
    }

    async fn save_policy(&self, scope: &PolicyScope, record: &ExtractedPolicyRecord) -> Result<PolicyId> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO policies
                (id, repository_id, scan_job_id, file_path, subject, resource, action, conditions, description, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&scope.repository_id)
        .bind(&scope.scan_job_id)
        .bind(&scope.file_path)
        .bind(&record.subject)
        .bind(&record.resource)
        .bind(&record.action)
        .bind(&record.conditions)
        .bind(&record.description)
        .bind(OffsetDateTime::now_utc().unix_timestamp())
        .execute(&mut *tx)
        .await?;

        for (ordinal, evidence) in record.evidence.iter().enumerate() {
            sqlx::query(
                "INSERT INTO evidence (policy_id, ordinal, file_path, line_start, line_end, snippet)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(ordinal as i64)
            .bind(&evidence.file_path)
            .bind(evidence.line_start as i64)
            .bind(evidence.line_end as i64)
            .bind(&evidence.snippet)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    async fn clear_policies(&self, repository_id: &str, file_path: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM evidence WHERE policy_id IN
                (SELECT id FROM policies WHERE repository_id = ? AND file_path = ?)",
        )
        .bind(repository_id)
        .bind(file_path)
        .execute(&mut *tx)
        .await?;
        let removed = sqlx::query("DELETE FROM policies WHERE repository_id = ? AND file_path = ?")
            .bind(repository_id)
            .bind(file_path)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed)
    }

    async fn list_policies(&self, repository_id: &str) -> Result<Vec<StoredPolicy>> {
        let rows = sqlx::query(
            "SELECT * FROM policies WHERE repository_id = ? ORDER BY file_path, created_at, id",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;

        let mut policies = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let evidence = self.load_evidence(&id).await?;
            policies.push(StoredPolicy {
                scope: PolicyScope {
                    repository_id: row.try_get("repository_id")?,
                    scan_job_id: row.try_get("scan_job_id")?,
                    file_path: row.try_get("file_path")?,
                },
                record: ExtractedPolicyRecord {
                    subject: row.try_get("subject")?,
                    resource: row.try_get("resource")?,
                    action: row.try_get("action")?,
                    conditions: row.try_get("conditions")?,
                    description: row.try_get("description")?,
                    evidence,
                },
                created_at: timestamp(row.try_get("created_at")?, "policies")?,
                id,
            });
        }
        Ok(policies)
    }

    async fn count_policies(&self, repository_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM policies WHERE repository_id = ?")
            .bind(repository_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn save_progress(&self, job: &ScanJob) -> Result<()> {
        let data = serde_json::to_string(job)?;
        sqlx::query(
            "INSERT INTO scan_jobs
                (id, repository_id, bulk_scan_id, status, files_scanned, batches_processed,
                 policies_extracted, errors_count, created_at, data)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                files_scanned = excluded.files_scanned,
                batches_processed = excluded.batches_processed,
                policies_extracted = excluded.policies_extracted,
                errors_count = excluded.errors_count,
                data = excluded.data",
        )
        .bind(&job.id)
        .bind(&job.repository_id)
        .bind(&job.bulk_scan_id)
        .bind(job.status.as_str())
        .bind(job.files_scanned as i64)
        .bind(job.batches_processed as i64)
        .bind(job.policies_extracted as i64)
        .bind(job.errors_count as i64)
        .bind(job.created_at.unix_timestamp())
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_scan_job(&self, id: &str) -> Result<Option<ScanJob>> {
        let data: Option<String> = sqlx::query_scalar("SELECT data FROM scan_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(data.map(|d| serde_json::from_str(&d)).transpose()?)
    }

    async fn list_scan_jobs(&self, repository_id: &str) -> Result<Vec<ScanJob>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT data FROM scan_jobs WHERE repository_id = ? ORDER BY created_at, id",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|d| serde_json::from_str(d).map_err(StorageError::from))
            .collect()
    }

    async fn save_bulk_job(&self, job: &BulkScanJob) -> Result<()> {
        let data = serde_json::to_string(job)?;
        sqlx::query(
            "INSERT INTO bulk_scan_jobs (id, tenant_id, status, data) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, data = excluded.data",
        )
        .bind(&job.id)
        .bind(&job.tenant_id)
        .bind(job.status.as_str())
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_bulk_job(&self, id: &str) -> Result<Option<BulkScanJob>> {
        let data: Option<String> = sqlx::query_scalar("SELECT data FROM bulk_scan_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(data.map(|d| serde_json::from_str(&d)).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authscan_core::{BatchProgress, ScanStatus};

    #[tokio::test]
    async fn test_repository_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut repo = RepositorySource::new("t1", "ledger", SourceKind::ProcedureCatalog, "json:/x.json");
        repo.advance_checkpoint(Some("2024-06-01T00:00:00Z".to_string()));
        store.save_repository(&repo).await.unwrap();

        let loaded = store.get_repository(&repo.id).await.unwrap().unwrap();
        assert_eq!(loaded.kind, SourceKind::ProcedureCatalog);
        assert_eq!(loaded.checkpoint.as_deref(), Some("2024-06-01T00:00:00Z"));
        assert_eq!(loaded.status, RepositoryStatus::Ready);
        assert!(store.get_repository("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_policy_with_evidence() {
        let store = SqliteStore::in_memory().await.unwrap();
        let scope = PolicyScope {
            repository_id: "r1".to_string(),
            scan_job_id: "j1".to_string(),
            file_path: "app/views.py".to_string(),
        };
        let record = ExtractedPolicyRecord {
            subject: "staff".to_string(),
            resource: "invoice".to_string(),
            action: "export".to_string(),
            conditions: Some("user.is_staff".to_string()),
            description: "Staff may export invoices".to_string(),
            evidence: vec![Evidence {
                file_path: "app/views.py".to_string(),
                line_start: 10,
                line_end: 14,
                snippet: "@staff_member_required".to_string(),
            }],
        };

        let id = store.save_policy(&scope, &record).await.unwrap();
        let policies = store.list_policies("r1").await.unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].id, id);
        assert_eq!(policies[0].record, record);

        assert_eq!(store.clear_policies("r1", "app/views.py").await.unwrap(), 1);
        assert_eq!(store.count_policies("r1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_progress_upsert() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut job = ScanJob::new("r1", true);
        store.save_progress(&job).await.unwrap();

        job.transition(ScanStatus::Cloning).unwrap();
        job.transition(ScanStatus::Enumerating).unwrap();
        job.set_totals(3, 2).unwrap();
        job.transition(ScanStatus::Processing).unwrap();
        job.record_batch(&BatchProgress {
            files: 2,
            policies: 4,
            ..Default::default()
        })
        .unwrap();
        store.save_progress(&job).await.unwrap();

        let loaded = store.get_scan_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ScanStatus::Processing);
        assert_eq!(loaded.files_scanned, 2);
        assert_eq!(loaded.total_batches, 2);
        assert_eq!(store.list_scan_jobs("r1").await.unwrap().len(), 1);
    }
}
