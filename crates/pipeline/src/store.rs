//! Durable project store seam.
//!
//! The orchestrator, supervisor and HTTP layer only see [`ProjectStore`].
//! [`PgProjectStore`] is the production implementation over
//! [`ProjectRepo`]; [`MemoryProjectStore`] applies the same transition
//! rules in memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use orthoflow_core::status::ProcessingStatus;
use orthoflow_db::models::project::{CreateProject, Project, ProjectUpdate};
use orthoflow_db::repositories::project_repo::MAX_LIST_LIMIT;
use orthoflow_db::repositories::ProjectRepo;
use orthoflow_db::DbPool;
use tokio::sync::RwLock;

/// Errors from a [`ProjectStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record with the same task id already exists.
    #[error("Project {0} already exists")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Get/update/delete of project records by task id.
///
/// `update` applies a [`ProjectUpdate`] only when the record is in the
/// status that update requires and reports whether it did.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, task_id: &str) -> Result<Option<Project>, StoreError>;

    /// Newest first; `limit` is capped at 100.
    async fn list(&self, skip: i64, limit: i64) -> Result<Vec<Project>, StoreError>;

    async fn list_by_status(&self, status: ProcessingStatus) -> Result<Vec<Project>, StoreError>;

    async fn create(&self, input: &CreateProject) -> Result<Project, StoreError>;

    async fn update(&self, task_id: &str, update: &ProjectUpdate) -> Result<bool, StoreError>;

    async fn delete(&self, task_id: &str) -> Result<bool, StoreError>;

    /// Confirm the backing store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// [`ProjectStore`] over the `projects` table.
#[derive(Clone)]
pub struct PgProjectStore {
    pool: DbPool,
}

impl PgProjectStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl ProjectStore for PgProjectStore {
    async fn get(&self, task_id: &str) -> Result<Option<Project>, StoreError> {
        Ok(ProjectRepo::find_by_task_id(&self.pool, task_id).await?)
    }

    async fn list(&self, skip: i64, limit: i64) -> Result<Vec<Project>, StoreError> {
        Ok(ProjectRepo::list(&self.pool, skip, limit).await?)
    }

    async fn list_by_status(&self, status: ProcessingStatus) -> Result<Vec<Project>, StoreError> {
        Ok(ProjectRepo::list_by_status(&self.pool, status).await?)
    }

    async fn create(&self, input: &CreateProject) -> Result<Project, StoreError> {
        ProjectRepo::create(&self.pool, input)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    StoreError::Conflict(input.task_id.clone())
                }
                other => StoreError::Database(other),
            })
    }

    async fn update(&self, task_id: &str, update: &ProjectUpdate) -> Result<bool, StoreError> {
        Ok(ProjectRepo::apply(&self.pool, task_id, update).await?)
    }

    async fn delete(&self, task_id: &str) -> Result<bool, StoreError> {
        Ok(ProjectRepo::delete(&self.pool, task_id).await?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(orthoflow_db::health_check(&self.pool).await?)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// [`ProjectStore`] held in process memory.
#[derive(Default)]
pub struct MemoryProjectStore {
    projects: RwLock<HashMap<String, Project>>,
    next_id: AtomicI64,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record as is.
    pub async fn insert(&self, project: Project) {
        self.projects
            .write()
            .await
            .insert(project.task_id.clone(), project);
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn get(&self, task_id: &str) -> Result<Option<Project>, StoreError> {
        Ok(self.projects.read().await.get(task_id).cloned())
    }

    async fn list(&self, skip: i64, limit: i64) -> Result<Vec<Project>, StoreError> {
        let mut all: Vec<Project> = self.projects.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.clamp(0, MAX_LIST_LIMIT) as usize)
            .collect())
    }

    async fn list_by_status(&self, status: ProcessingStatus) -> Result<Vec<Project>, StoreError> {
        let mut matching: Vec<Project> = self
            .projects
            .read()
            .await
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn create(&self, input: &CreateProject) -> Result<Project, StoreError> {
        let mut projects = self.projects.write().await;
        if projects.contains_key(&input.task_id) {
            return Err(StoreError::Conflict(input.task_id.clone()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let project = Project::pending(id, input, Utc::now());
        projects.insert(input.task_id.clone(), project.clone());
        Ok(project)
    }

    async fn update(&self, task_id: &str, update: &ProjectUpdate) -> Result<bool, StoreError> {
        let mut projects = self.projects.write().await;
        Ok(projects
            .get_mut(task_id)
            .is_some_and(|project| project.apply(update, Utc::now())))
    }

    async fn delete(&self, task_id: &str) -> Result<bool, StoreError> {
        Ok(self.projects.write().await.remove(task_id).is_some())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
