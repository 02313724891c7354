//! Quarter-scoped composite view over the query cache.
//!
//! This is the surface the planning screens talk to: per-resource cached
//! reads, a combined quarter load, and the mutation service.

use std::collections::HashMap;
use std::sync::Arc;

use api::client::{PlanningApi, PlanningApiClient, PlanningApiError};
use api::models::deadline_task::DeadlineTask;
use api::models::planning_task::PlanningTask;
use api::models::project::Project;
use api::models::quarter::Quarter;
use api::models::user::User;
use tracing::debug;

use crate::services::assignments::{BlockAssignment, BlockKey, block_assignments};
use crate::services::cache::{CacheValue, QueryCache, QueryKey, QueryStatus};
use crate::services::config::PlanningConfig;
use crate::services::task_mutation::TaskMutationService;

/// Everything a quarter screen renders.
#[derive(Debug, Clone, PartialEq)]
pub struct QuarterPlanning {
    pub users: Vec<User>,
    pub projects: Vec<Project>,
    pub tasks: Vec<PlanningTask>,
    pub deadlines: Vec<DeadlineTask>,
    pub assignments: HashMap<BlockKey, BlockAssignment>,
}

/// Combined view across the quarter's constituent cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombinedStatus {
    /// True while any entry is loading with nothing to show yet.
    pub is_loading: bool,
    /// True if any entry's last load failed.
    pub has_error: bool,
}

/// Entry point for consumers.
#[derive(Clone)]
pub struct PlanningDataService {
    api: Arc<dyn PlanningApi>,
    cache: QueryCache,
    mutations: TaskMutationService,
}

impl PlanningDataService {
    pub fn new(api: Arc<dyn PlanningApi>, config: PlanningConfig) -> Self {
        let cache = QueryCache::new(config);
        let mutations = TaskMutationService::new(Arc::clone(&api), cache.clone());
        Self {
            api,
            cache,
            mutations,
        }
    }

    /// Build a service backed by an HTTP client for `base_url`, using the
    /// config's call timeouts.
    pub fn connect(
        base_url: impl Into<String>,
        config: PlanningConfig,
    ) -> Result<Self, PlanningApiError> {
        let client = PlanningApiClient::with_timeouts(base_url, config.timeouts)?;
        Ok(Self::new(Arc::new(client), config))
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn mutations(&self) -> &TaskMutationService {
        &self.mutations
    }

    pub async fn users(&self) -> Result<Vec<User>, PlanningApiError> {
        let api = Arc::clone(&self.api);
        let value = self
            .cache
            .get_or_fetch(QueryKey::Users, move || {
                let api = Arc::clone(&api);
                async move { api.fetch_users().await.map(CacheValue::Users) }
            })
            .await?;
        Ok(match value {
            CacheValue::Users(users) => users,
            _ => Vec::new(),
        })
    }

    pub async fn projects(&self) -> Result<Vec<Project>, PlanningApiError> {
        let api = Arc::clone(&self.api);
        let value = self
            .cache
            .get_or_fetch(QueryKey::Projects, move || {
                let api = Arc::clone(&api);
                async move { api.fetch_projects().await.map(CacheValue::Projects) }
            })
            .await?;
        Ok(match value {
            CacheValue::Projects(projects) => projects,
            _ => Vec::new(),
        })
    }

    pub async fn planning_tasks(
        &self,
        quarter: Quarter,
    ) -> Result<Vec<PlanningTask>, PlanningApiError> {
        let api = Arc::clone(&self.api);
        let range = quarter.date_range();
        let value = self
            .cache
            .get_or_fetch(QueryKey::PlanningTasks(quarter), move || {
                let api = Arc::clone(&api);
                async move {
                    api.fetch_planning_tasks(&range)
                        .await
                        .map(CacheValue::PlanningTasks)
                }
            })
            .await?;
        Ok(match value {
            CacheValue::PlanningTasks(tasks) => tasks,
            _ => Vec::new(),
        })
    }

    pub async fn deadline_tasks(
        &self,
        quarter: Quarter,
    ) -> Result<Vec<DeadlineTask>, PlanningApiError> {
        let api = Arc::clone(&self.api);
        let range = quarter.date_range();
        let value = self
            .cache
            .get_or_fetch(QueryKey::DeadlineTasks(quarter), move || {
                let api = Arc::clone(&api);
                async move {
                    api.fetch_deadline_tasks(&range)
                        .await
                        .map(CacheValue::DeadlineTasks)
                }
            })
            .await?;
        Ok(match value {
            CacheValue::DeadlineTasks(deadlines) => deadlines,
            _ => Vec::new(),
        })
    }

    pub async fn user_setting(&self, name: &str) -> Result<Option<String>, PlanningApiError> {
        let api = Arc::clone(&self.api);
        let key = name.to_string();
        let value = self
            .cache
            .get_or_fetch(QueryKey::UserSetting(key.clone()), move || {
                let api = Arc::clone(&api);
                let key = key.clone();
                async move { api.fetch_user_setting(&key).await.map(CacheValue::Setting) }
            })
            .await?;
        Ok(match value {
            CacheValue::Setting(setting) => setting,
            _ => None,
        })
    }

    pub async fn app_setting(&self, name: &str) -> Result<Option<String>, PlanningApiError> {
        let api = Arc::clone(&self.api);
        let key = name.to_string();
        let value = self
            .cache
            .get_or_fetch(QueryKey::AppSetting(key.clone()), move || {
                let api = Arc::clone(&api);
                let key = key.clone();
                async move { api.fetch_app_setting(&key).await.map(CacheValue::Setting) }
            })
            .await?;
        Ok(match value {
            CacheValue::Setting(setting) => setting,
            _ => None,
        })
    }

    /// Load the full quarter: four independent cache entries fetched
    /// concurrently, then the derived per-cell assignment map.
    pub async fn load_quarter(&self, quarter: Quarter) -> Result<QuarterPlanning, PlanningApiError> {
        let (users, projects, tasks, deadlines) = tokio::join!(
            self.users(),
            self.projects(),
            self.planning_tasks(quarter),
            self.deadline_tasks(quarter),
        );
        let (users, projects, tasks, deadlines) = (users?, projects?, tasks?, deadlines?);

        let assignments = block_assignments(&tasks);
        debug!(
            year = quarter.year,
            quarter = quarter.number,
            blocks = assignments.len(),
            "quarter loaded"
        );
        Ok(QuarterPlanning {
            users,
            projects,
            tasks,
            deadlines,
            assignments,
        })
    }

    /// Logical OR of the loading and error flags across the quarter's
    /// entries.
    pub async fn quarter_status(&self, quarter: Quarter) -> CombinedStatus {
        let keys = [
            QueryKey::Users,
            QueryKey::Projects,
            QueryKey::PlanningTasks(quarter),
            QueryKey::DeadlineTasks(quarter),
        ];
        let mut combined = CombinedStatus {
            is_loading: false,
            has_error: false,
        };
        for key in keys {
            let state = self.cache.state(&key).await;
            combined.is_loading |= state.status == QueryStatus::Loading;
            combined.has_error |= state.status == QueryStatus::Error;
        }
        combined
    }

    /// Mark every entry behind the quarter stale, so the next reads
    /// revalidate against the server.
    pub async fn refresh_quarter(&self, quarter: Quarter) {
        let keys = [
            QueryKey::Users,
            QueryKey::Projects,
            QueryKey::PlanningTasks(quarter),
            QueryKey::DeadlineTasks(quarter),
        ];
        for key in &keys {
            self.cache.invalidate(key).await;
        }
    }
}
