//! PostgreSQL record store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::DeployError;
use crate::models::{Deployment, LogEntry, NewProject, Project};
use crate::store::{line_timestamps, DeploymentStore};
use crate::utils::generate_uuid;

const UNIQUE_VIOLATION: &str = "23505";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS "Project" (
        "id" TEXT PRIMARY KEY,
        "name" TEXT NOT NULL,
        "repoUrl" TEXT NOT NULL,
        "branch" TEXT NOT NULL DEFAULT 'main',
        "subdomain" TEXT NOT NULL UNIQUE,
        "artifactRoot" TEXT,
        "createdAt" TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS "Deployment" (
        "id" TEXT PRIMARY KEY,
        "projectId" TEXT NOT NULL REFERENCES "Project"("id"),
        "status" TEXT NOT NULL,
        "createdAt" TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS "Log" (
        "id" TEXT PRIMARY KEY,
        "projectId" TEXT NOT NULL,
        "deploymentId" TEXT,
        "log" TEXT NOT NULL,
        "createdAt" TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"CREATE INDEX IF NOT EXISTS "Deployment_projectId_idx" ON "Deployment"("projectId")"#,
    r#"CREATE INDEX IF NOT EXISTS "Log_projectId_createdAt_idx" ON "Log"("projectId", "createdAt")"#,
];

/// Store backed by the `"Project"`, `"Deployment"` and `"Log"` tables
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool to `url`
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, DeployError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        info!("Connected to database");
        Ok(Self::new(pool))
    }

    /// Create missing tables. Safe to run repeatedly.
    pub async fn migrate(&self) -> Result<(), DeployError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Database schema is up to date");
        Ok(())
    }

    fn project_from_row(row: &PgRow) -> Result<Project, DeployError> {
        Ok(Project {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            repo_url: row.try_get("repoUrl")?,
            branch: row.try_get("branch")?,
            subdomain: row.try_get("subdomain")?,
            artifact_root: row.try_get("artifactRoot")?,
            created_at: row.try_get("createdAt")?,
        })
    }

    fn deployment_from_row(row: &PgRow) -> Result<Deployment, DeployError> {
        let status: String = row.try_get("status")?;
        Ok(Deployment {
            id: row.try_get("id")?,
            project_id: row.try_get("projectId")?,
            status: status.parse().map_err(DeployError::StorageError)?,
            created_at: row.try_get("createdAt")?,
        })
    }

    fn log_from_row(row: &PgRow) -> Result<LogEntry, DeployError> {
        Ok(LogEntry {
            id: row.try_get("id")?,
            project_id: row.try_get("projectId")?,
            deployment_id: row.try_get("deploymentId")?,
            message: row.try_get("log")?,
            created_at: row.try_get("createdAt")?,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

#[async_trait]
impl DeploymentStore for PostgresStore {
    async fn insert_project(&self, project: NewProject) -> Result<Project, DeployError> {
        let row = sqlx::query(
            r#"
            INSERT INTO "Project" ("id", "name", "repoUrl", "branch", "subdomain", "createdAt")
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING *
            "#,
        )
        .bind(generate_uuid())
        .bind(&project.name)
        .bind(&project.repo_url)
        .bind(&project.branch)
        .bind(&project.subdomain)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DeployError::Conflict(format!("Subdomain {} is already taken", project.subdomain))
            } else {
                DeployError::DatabaseError(e)
            }
        })?;

        Self::project_from_row(&row)
    }

    async fn find_project(&self, id: &str) -> Result<Option<Project>, DeployError> {
        let row = sqlx::query(r#"SELECT * FROM "Project" WHERE "id" = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::project_from_row).transpose()
    }

    async fn find_project_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Option<Project>, DeployError> {
        let row = sqlx::query(r#"SELECT * FROM "Project" WHERE "subdomain" = $1"#)
            .bind(subdomain)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::project_from_row).transpose()
    }

    async fn subdomain_exists(&self, subdomain: &str) -> Result<bool, DeployError> {
        let row = sqlx::query(r#"SELECT 1 FROM "Project" WHERE "subdomain" = $1"#)
            .bind(subdomain)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn set_artifact_root(&self, project_id: &str, root: &str) -> Result<(), DeployError> {
        let result = sqlx::query(r#"UPDATE "Project" SET "artifactRoot" = $2 WHERE "id" = $1"#)
            .bind(project_id)
            .bind(root)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DeployError::NotFound(format!("Project {project_id}")));
        }
        Ok(())
    }

    async fn create_deployment(&self, project_id: &str) -> Result<Deployment, DeployError> {
        if self.find_project(project_id).await?.is_none() {
            return Err(DeployError::NotFound(format!("Project {project_id}")));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO "Deployment" ("id", "projectId", "status", "createdAt")
            VALUES ($1, $2, $3, NOW())
            RETURNING *
            "#,
        )
        .bind(generate_uuid())
        .bind(project_id)
        .bind(DeploymentStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        Self::deployment_from_row(&row)
    }

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, DeployError> {
        let row = sqlx::query(r#"SELECT * FROM "Deployment" WHERE "id" = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::deployment_from_row).transpose()
    }

    async fn list_deployments(&self, project_id: &str) -> Result<Vec<Deployment>, DeployError> {
        let rows = sqlx::query(
            r#"SELECT * FROM "Deployment" WHERE "projectId" = $1 ORDER BY "createdAt" DESC"#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::deployment_from_row).collect()
    }

    async fn update_deployment_status(
        &self,
        id: &str,
        status: DeploymentStatus,
    ) -> Result<Deployment, DeployError> {
        let allowed: Vec<String> = status
            .predecessors()
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let updated = sqlx::query(
            r#"
            UPDATE "Deployment"
            SET "status" = $2
            WHERE "id" = $1
              AND "status" = ANY($3)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(&allowed)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return Self::deployment_from_row(&row);
        }

        match self.get_deployment(id).await? {
            Some(current) => Err(DeployError::InvalidTransition {
                from: current.status,
                to: status,
            }),
            None => Err(DeployError::NotFound(format!("Deployment {id}"))),
        }
    }

    async fn append_logs(
        &self,
        project_id: &str,
        deployment_id: Option<&str>,
        lines: &[String],
    ) -> Result<usize, DeployError> {
        if lines.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = lines.iter().map(|_| generate_uuid()).collect();
        let stamps: Vec<DateTime<Utc>> = line_timestamps(Utc::now(), lines.len());

        let result = sqlx::query(
            r#"
            INSERT INTO "Log" ("id", "projectId", "deploymentId", "log", "createdAt")
            SELECT t.id, $1, $2, t.log, t.created_at
            FROM UNNEST($3::text[], $4::text[], $5::timestamptz[]) AS t(id, log, created_at)
            "#,
        )
        .bind(project_id)
        .bind(deployment_id)
        .bind(&ids)
        .bind(lines)
        .bind(&stamps)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn list_logs(&self, project_id: &str) -> Result<Vec<LogEntry>, DeployError> {
        let rows = sqlx::query(
            r#"SELECT * FROM "Log" WHERE "projectId" = $1 ORDER BY "createdAt" ASC"#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::log_from_row).collect()
    }
}
