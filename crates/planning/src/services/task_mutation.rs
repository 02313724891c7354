//! Optimistic create, update and delete for planning tasks.
//!
//! Every mutation follows the same lifecycle: cancel in-flight loads for
//! the target quarter, snapshot the cached value, install the optimistic
//! value, call the server, roll back on failure, and always finish by
//! invalidating the entry so the next read converges on server truth.

use std::sync::Arc;

use api::client::{PlanningApi, PlanningApiError};
use api::models::planning_task::{CreatePlanningTask, PlanningTask, UpdatePlanningTask};
use api::models::quarter::Quarter;
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::cache::{CacheValue, QueryCache, QueryKey};

#[derive(Debug, Error)]
pub enum TaskMutationError {
    #[error("api error: {0}")]
    Api(#[from] PlanningApiError),
}

/// Local-first writes against the planning-task cache.
#[derive(Clone)]
pub struct TaskMutationService {
    api: Arc<dyn PlanningApi>,
    cache: QueryCache,
}

impl TaskMutationService {
    pub fn new(api: Arc<dyn PlanningApi>, cache: QueryCache) -> Self {
        Self { api, cache }
    }

    pub async fn create_task(
        &self,
        quarter: Quarter,
        input: CreatePlanningTask,
    ) -> Result<PlanningTask, TaskMutationError> {
        let key = QueryKey::PlanningTasks(quarter);
        let provisional = input.to_provisional();
        let snapshot = self
            .apply_optimistic(&key, |mut tasks| {
                tasks.push(provisional);
                tasks
            })
            .await;

        let result = self.api.create_planning_task(&input).await;
        if let Ok(task) = &result {
            info!(task_id = ?task.id, user_id = %task.user_id, "planning task created");
        }
        self.settle(&key, snapshot, result).await
    }

    pub async fn update_task(
        &self,
        quarter: Quarter,
        id: Uuid,
        patch: UpdatePlanningTask,
    ) -> Result<PlanningTask, TaskMutationError> {
        let key = QueryKey::PlanningTasks(quarter);
        let optimistic = patch.clone();
        let snapshot = self
            .apply_optimistic(&key, |mut tasks| {
                for task in tasks.iter_mut() {
                    if task.id == Some(id) {
                        let merged = optimistic.apply_to(task);
                        *task = merged;
                    }
                }
                tasks
            })
            .await;

        let result = self.api.update_planning_task(id, &patch).await;
        if result.is_ok() {
            debug!(task_id = %id, "planning task updated");
        }
        self.settle(&key, snapshot, result).await
    }

    pub async fn delete_task(
        &self,
        quarter: Quarter,
        id: Uuid,
    ) -> Result<(), TaskMutationError> {
        let key = QueryKey::PlanningTasks(quarter);
        let snapshot = self
            .apply_optimistic(&key, |mut tasks| {
                tasks.retain(|task| task.id != Some(id));
                tasks
            })
            .await;

        let result = self.api.delete_planning_task(id).await;
        if result.is_ok() {
            info!(task_id = %id, "planning task deleted");
        }
        self.settle(&key, snapshot, result).await
    }

    /// Update several tasks as one optimistic step. The remote calls run
    /// concurrently; if any of them fails the whole batch's optimistic
    /// state is rolled back, including members whose calls landed. The
    /// settle-triggered refetch brings those back on the next read.
    pub async fn update_tasks(
        &self,
        quarter: Quarter,
        patches: Vec<(Uuid, UpdatePlanningTask)>,
    ) -> Result<Vec<PlanningTask>, TaskMutationError> {
        let key = QueryKey::PlanningTasks(quarter);
        let optimistic = patches.clone();
        let snapshot = self
            .apply_optimistic(&key, |mut tasks| {
                for (id, patch) in &optimistic {
                    for task in tasks.iter_mut() {
                        if task.id == Some(*id) {
                            let merged = patch.apply_to(task);
                            *task = merged;
                        }
                    }
                }
                tasks
            })
            .await;

        let calls = patches
            .iter()
            .map(|(id, patch)| self.api.update_planning_task(*id, patch));
        let outcomes = join_all(calls).await;

        let mut updated = Vec::with_capacity(patches.len());
        let mut first_error = None;
        for ((id, _), outcome) in patches.iter().zip(outcomes) {
            match outcome {
                Ok(task) => updated.push(task),
                Err(error) => {
                    warn!(task_id = %id, %error, "batch member failed");
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }

        let result = match first_error {
            Some(error) => Err(error),
            None => Ok(updated),
        };
        self.settle(&key, snapshot, result).await
    }

    /// Optimistic write of a user setting, same lifecycle as task writes.
    pub async fn save_user_setting(
        &self,
        name: &str,
        value: &str,
    ) -> Result<(), TaskMutationError> {
        let key = QueryKey::UserSetting(name.to_string());
        self.cache.cancel_inflight(&key).await;
        let snapshot = self.cache.data(&key).await;
        self.cache
            .overwrite(key.clone(), CacheValue::Setting(Some(value.to_string())))
            .await;

        let result = self.api.save_user_setting(name, value).await;
        self.settle(&key, snapshot, result).await
    }

    /// Steps one through three of the lifecycle: cancel the in-flight load
    /// for `key`, snapshot it, and install the edited task list.
    async fn apply_optimistic<F>(&self, key: &QueryKey, edit: F) -> Option<CacheValue>
    where
        F: FnOnce(Vec<PlanningTask>) -> Vec<PlanningTask>,
    {
        self.cache.cancel_inflight(key).await;
        let snapshot = self.cache.data(key).await;
        let tasks = match &snapshot {
            Some(CacheValue::PlanningTasks(tasks)) => tasks.clone(),
            _ => Vec::new(),
        };
        self.cache
            .overwrite(key.clone(), CacheValue::PlanningTasks(edit(tasks)))
            .await;
        snapshot
    }

    /// Steps four and five: roll back on failure, then invalidate no matter
    /// what so the next read refetches server truth.
    async fn settle<T>(
        &self,
        key: &QueryKey,
        snapshot: Option<CacheValue>,
        result: Result<T, PlanningApiError>,
    ) -> Result<T, TaskMutationError> {
        if let Err(error) = &result {
            warn!(key = key.label(), %error, "mutation failed, rolling back optimistic state");
            self.cache.restore(key.clone(), snapshot).await;
        }
        self.cache.invalidate(key).await;
        result.map_err(TaskMutationError::from)
    }
}

#[cfg(test)]
mod tests {
    use api::models::deadline_task::DeadlineTask;
    use api::models::project::Project;
    use api::models::quarter::DateRange;
    use api::models::user::User;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    use super::*;
    use crate::services::config::PlanningConfig;

    #[derive(Default)]
    struct ScriptedApi {
        fail_writes: bool,
        fail_ids: Vec<Uuid>,
    }

    fn server_error() -> PlanningApiError {
        PlanningApiError::Http {
            status: 500,
            message: "boom".to_string(),
        }
    }

    #[async_trait]
    impl PlanningApi for ScriptedApi {
        async fn fetch_users(&self) -> Result<Vec<User>, PlanningApiError> {
            Ok(Vec::new())
        }

        async fn fetch_projects(&self) -> Result<Vec<Project>, PlanningApiError> {
            Ok(Vec::new())
        }

        async fn fetch_planning_tasks(
            &self,
            _range: &DateRange,
        ) -> Result<Vec<PlanningTask>, PlanningApiError> {
            Ok(Vec::new())
        }

        async fn fetch_deadline_tasks(
            &self,
            _range: &DateRange,
        ) -> Result<Vec<DeadlineTask>, PlanningApiError> {
            Ok(Vec::new())
        }

        async fn fetch_user_setting(
            &self,
            _key: &str,
        ) -> Result<Option<String>, PlanningApiError> {
            Ok(None)
        }

        async fn fetch_app_setting(
            &self,
            _key: &str,
        ) -> Result<Option<String>, PlanningApiError> {
            Ok(None)
        }

        async fn save_user_setting(
            &self,
            _key: &str,
            _value: &str,
        ) -> Result<(), PlanningApiError> {
            if self.fail_writes {
                Err(server_error())
            } else {
                Ok(())
            }
        }

        async fn create_planning_task(
            &self,
            input: &CreatePlanningTask,
        ) -> Result<PlanningTask, PlanningApiError> {
            if self.fail_writes {
                return Err(server_error());
            }
            let mut task = input.to_provisional();
            task.id = Some(Uuid::new_v4());
            Ok(task)
        }

        async fn update_planning_task(
            &self,
            id: Uuid,
            patch: &UpdatePlanningTask,
        ) -> Result<PlanningTask, PlanningApiError> {
            if self.fail_writes || self.fail_ids.contains(&id) {
                return Err(server_error());
            }
            Ok(PlanningTask {
                id: Some(id),
                user_id: patch.user_id.unwrap_or_else(Uuid::new_v4),
                date: patch
                    .date
                    .unwrap_or_else(|| NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()),
                block_index: patch.block_index.unwrap_or(0),
                project_id: patch.project_id,
                task: patch.task.clone(),
                span: patch.span.unwrap_or(1),
                project: None,
            })
        }

        async fn delete_planning_task(&self, _id: Uuid) -> Result<(), PlanningApiError> {
            if self.fail_writes {
                Err(server_error())
            } else {
                Ok(())
            }
        }
    }

    fn quarter() -> Quarter {
        Quarter::new(2025, 1)
    }

    fn key() -> QueryKey {
        QueryKey::PlanningTasks(quarter())
    }

    fn existing_task(note: &str) -> PlanningTask {
        PlanningTask {
            id: Some(Uuid::new_v4()),
            user_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
            block_index: 0,
            project_id: None,
            task: Some(note.to_string()),
            span: 1,
            project: None,
        }
    }

    fn create_input() -> CreatePlanningTask {
        CreatePlanningTask {
            user_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2025, 2, 4).unwrap(),
            block_index: 1,
            project_id: None,
            task: Some("Conference".to_string()),
            span: 1,
        }
    }

    fn build(api: ScriptedApi) -> (TaskMutationService, QueryCache) {
        let cache = QueryCache::new(PlanningConfig::default());
        let service = TaskMutationService::new(Arc::new(api), cache.clone());
        (service, cache)
    }

    async fn cached_tasks(cache: &QueryCache) -> Vec<PlanningTask> {
        match cache.data(&key()).await {
            Some(CacheValue::PlanningTasks(tasks)) => tasks,
            other => panic!("expected planning tasks in cache, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_returns_the_canonical_record_but_converges_via_refetch() {
        let (service, cache) = build(ScriptedApi::default());
        cache
            .overwrite(key(), CacheValue::PlanningTasks(vec![existing_task("old")]))
            .await;

        let created = service.create_task(quarter(), create_input()).await.unwrap();
        assert!(created.id.is_some());

        // The cache still holds the provisional record; the settle step
        // marked the entry stale instead of patching the response in.
        let tasks = cached_tasks(&cache).await;
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].id, None);
        assert!(cache.is_stale(&key()).await);
    }

    #[tokio::test]
    async fn failed_create_rolls_back_to_the_snapshot() {
        let (service, cache) = build(ScriptedApi {
            fail_writes: true,
            ..Default::default()
        });
        let before = existing_task("keep me");
        cache
            .overwrite(key(), CacheValue::PlanningTasks(vec![before.clone()]))
            .await;

        let result = service.create_task(quarter(), create_input()).await;
        assert!(matches!(
            result,
            Err(TaskMutationError::Api(PlanningApiError::Http { status: 500, .. }))
        ));

        assert_eq!(cached_tasks(&cache).await, vec![before]);
        assert!(cache.is_stale(&key()).await);
    }

    #[tokio::test]
    async fn failed_create_on_an_empty_cache_restores_the_empty_state() {
        let (service, cache) = build(ScriptedApi {
            fail_writes: true,
            ..Default::default()
        });

        let result = service.create_task(quarter(), create_input()).await;
        assert!(result.is_err());
        assert_eq!(cache.data(&key()).await, None);
    }

    #[tokio::test]
    async fn update_patches_the_cached_record_in_place() {
        let (service, cache) = build(ScriptedApi::default());
        let before = existing_task("old note");
        let id = before.id.unwrap();
        cache
            .overwrite(key(), CacheValue::PlanningTasks(vec![before.clone()]))
            .await;

        let patch = UpdatePlanningTask {
            task: Some("new note".to_string()),
            ..Default::default()
        };
        service.update_task(quarter(), id, patch).await.unwrap();

        let tasks = cached_tasks(&cache).await;
        assert_eq!(tasks[0].task.as_deref(), Some("new note"));
        assert_eq!(tasks[0].user_id, before.user_id, "untouched fields survive");
    }

    #[tokio::test]
    async fn delete_removes_the_record_and_restores_it_on_failure() {
        let kept = existing_task("kept");
        let doomed = existing_task("doomed");
        let doomed_id = doomed.id.unwrap();

        let (service, cache) = build(ScriptedApi::default());
        cache
            .overwrite(
                key(),
                CacheValue::PlanningTasks(vec![kept.clone(), doomed.clone()]),
            )
            .await;
        service.delete_task(quarter(), doomed_id).await.unwrap();
        assert_eq!(cached_tasks(&cache).await, vec![kept.clone()]);

        let (service, cache) = build(ScriptedApi {
            fail_writes: true,
            ..Default::default()
        });
        cache
            .overwrite(
                key(),
                CacheValue::PlanningTasks(vec![kept.clone(), doomed.clone()]),
            )
            .await;
        let result = service.delete_task(quarter(), doomed_id).await;
        assert!(result.is_err());
        assert_eq!(cached_tasks(&cache).await, vec![kept, doomed]);
    }

    #[tokio::test]
    async fn batch_failure_rolls_back_every_member() {
        let stable = existing_task("stable");
        let doomed = existing_task("doomed");
        let stable_id = stable.id.unwrap();
        let doomed_id = doomed.id.unwrap();

        let (service, cache) = build(ScriptedApi {
            fail_ids: vec![doomed_id],
            ..Default::default()
        });
        cache
            .overwrite(
                key(),
                CacheValue::PlanningTasks(vec![stable.clone(), doomed.clone()]),
            )
            .await;

        let patch = |note: &str| UpdatePlanningTask {
            task: Some(note.to_string()),
            ..Default::default()
        };
        let result = service
            .update_tasks(
                quarter(),
                vec![(stable_id, patch("stable v2")), (doomed_id, patch("doomed v2"))],
            )
            .await;
        assert!(matches!(result, Err(TaskMutationError::Api(_))));

        // Uniform rollback: the member whose call landed is rolled back
        // locally too, until the refetch brings the server copy in.
        assert_eq!(cached_tasks(&cache).await, vec![stable, doomed]);
        assert!(cache.is_stale(&key()).await);
    }

    #[tokio::test]
    async fn batch_success_returns_every_update() {
        let first = existing_task("first");
        let second = existing_task("second");

        let (service, cache) = build(ScriptedApi::default());
        cache
            .overwrite(
                key(),
                CacheValue::PlanningTasks(vec![first.clone(), second.clone()]),
            )
            .await;

        let patch = UpdatePlanningTask {
            span: Some(2),
            ..Default::default()
        };
        let updated = service
            .update_tasks(
                quarter(),
                vec![
                    (first.id.unwrap(), patch.clone()),
                    (second.id.unwrap(), patch),
                ],
            )
            .await
            .unwrap();
        assert_eq!(updated.len(), 2);

        let tasks = cached_tasks(&cache).await;
        assert!(tasks.iter().all(|task| task.span == 2));
    }

    #[tokio::test]
    async fn failed_setting_save_rolls_back() {
        let (service, cache) = build(ScriptedApi {
            fail_writes: true,
            ..Default::default()
        });
        let setting_key = QueryKey::UserSetting("theme".to_string());
        cache
            .overwrite(
                setting_key.clone(),
                CacheValue::Setting(Some("dark".to_string())),
            )
            .await;

        let result = service.save_user_setting("theme", "light").await;
        assert!(result.is_err());
        assert_eq!(
            cache.data(&setting_key).await,
            Some(CacheValue::Setting(Some("dark".to_string())))
        );
    }

    #[tokio::test]
    async fn setting_save_is_visible_immediately() {
        let (service, cache) = build(ScriptedApi::default());
        let setting_key = QueryKey::UserSetting("theme".to_string());

        service.save_user_setting("theme", "light").await.unwrap();
        assert_eq!(
            cache.data(&setting_key).await,
            Some(CacheValue::Setting(Some("light".to_string())))
        );
        assert!(cache.is_stale(&setting_key).await);
    }
}
