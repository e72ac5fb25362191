// Catalog update tasks
// A catalog update is tracked as a task record owned by its connection. Running
// tasks live in `catalog_updates_running` and move to `catalog_updates_finished`
// exactly once, when they reach a terminal status.

use std::sync::Arc;
use std::time::Instant;

use crate::connection::ConnectionState;
use crate::error::Error;
use crate::query::QueryId;
use crate::sync::CancelToken;

/// Catalog task identifier, unique within the process
pub type CatalogTaskId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogUpdateTaskStatus {
    Started,
    Succeeded,
    Failed,
    Cancelled,
}

impl CatalogUpdateTaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CatalogUpdateTaskStatus::Started)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogUpdateVariant {
    /// Re-read every schema of the connection
    FullCatalogRefresh,
}

/// State of one catalog update
#[derive(Debug, Clone)]
pub struct CatalogUpdateTaskState {
    pub task_id: CatalogTaskId,
    pub variant: CatalogUpdateVariant,
    pub status: CatalogUpdateTaskStatus,
    pub cancellation: CancelToken,
    /// Queries issued to fetch the metadata
    pub queries: Vec<QueryId>,
    pub error: Option<Arc<Error>>,
    pub tables_loaded: usize,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
}

impl CatalogUpdateTaskState {
    pub fn new(task_id: CatalogTaskId, cancellation: CancelToken) -> Self {
        Self {
            task_id,
            variant: CatalogUpdateVariant::FullCatalogRefresh,
            status: CatalogUpdateTaskStatus::Started,
            cancellation,
            queries: Vec::new(),
            error: None,
            tables_loaded: 0,
            started_at: Instant::now(),
            finished_at: None,
        }
    }
}

#[derive(Debug)]
pub enum CatalogAction {
    UpdateStarted(CatalogUpdateTaskState),
    RegisterQuery(CatalogTaskId, QueryId),
    UpdateSucceeded(CatalogTaskId, usize),
    UpdateFailed(CatalogTaskId, Arc<Error>),
    UpdateCancelled(CatalogTaskId),
}

/// Apply a catalog task action. Returns None for unknown or finished tasks.
pub fn reduce_catalog_action(state: &ConnectionState, action: CatalogAction) -> Option<ConnectionState> {
    match action {
        CatalogAction::UpdateStarted(task) => {
            if state.catalog_update(task.task_id).is_some() {
                return None;
            }
            let mut next = state.clone();
            next.catalog_updates_running.insert(task.task_id, Arc::new(task));
            Some(next)
        }
        CatalogAction::RegisterQuery(task_id, query_id) => {
            let task = state.catalog_updates_running.get(&task_id)?;
            let mut updated = CatalogUpdateTaskState::clone(task);
            updated.queries.push(query_id);
            let mut next = state.clone();
            next.catalog_updates_running.insert(task_id, Arc::new(updated));
            Some(next)
        }
        CatalogAction::UpdateSucceeded(task_id, tables_loaded) => {
            let mut next = finish_task(state, task_id, CatalogUpdateTaskStatus::Succeeded, None, tables_loaded)?;
            next.last_full_refresh = next
                .catalog_updates_finished
                .get(&task_id)
                .and_then(|task| task.finished_at);
            Some(next)
        }
        CatalogAction::UpdateFailed(task_id, error) => {
            finish_task(state, task_id, CatalogUpdateTaskStatus::Failed, Some(error), 0)
        }
        CatalogAction::UpdateCancelled(task_id) => {
            finish_task(state, task_id, CatalogUpdateTaskStatus::Cancelled, None, 0)
        }
    }
}

fn finish_task(
    state: &ConnectionState,
    task_id: CatalogTaskId,
    status: CatalogUpdateTaskStatus,
    error: Option<Arc<Error>>,
    tables_loaded: usize,
) -> Option<ConnectionState> {
    let task = state.catalog_updates_running.get(&task_id)?;
    let mut finished = CatalogUpdateTaskState::clone(task);
    finished.status = status;
    finished.error = error;
    finished.tables_loaded = tables_loaded;
    finished.finished_at = Some(Instant::now());

    let mut next = state.clone();
    next.catalog_updates_running.remove(&task_id);
    next.catalog_updates_finished.insert(task_id, Arc::new(finished));
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionDetails;

    fn started() -> ConnectionState {
        let state = ConnectionState::new(1, ConnectionDetails::Serverless);
        reduce_catalog_action(
            &state,
            CatalogAction::UpdateStarted(CatalogUpdateTaskState::new(3, CancelToken::new())),
        )
        .unwrap()
    }

    #[test]
    fn test_task_moves_to_finished_once() {
        let state = started();
        let state = reduce_catalog_action(&state, CatalogAction::RegisterQuery(3, 42)).unwrap();
        assert_eq!(state.catalog_updates_running[&3].queries, vec![42]);

        let state = reduce_catalog_action(&state, CatalogAction::UpdateSucceeded(3, 5)).unwrap();
        assert!(state.catalog_updates_running.is_empty());
        let task = &state.catalog_updates_finished[&3];
        assert_eq!(task.status, CatalogUpdateTaskStatus::Succeeded);
        assert_eq!(task.tables_loaded, 5);
        assert_eq!(state.last_full_refresh, task.finished_at);

        assert!(reduce_catalog_action(&state, CatalogAction::UpdateCancelled(3)).is_none());
    }

    #[test]
    fn test_failed_task_keeps_error() {
        let state = started();
        let state = reduce_catalog_action(
            &state,
            CatalogAction::UpdateFailed(3, Arc::new(Error::Query("no such table".into()))),
        )
        .unwrap();
        let task = &state.catalog_updates_finished[&3];
        assert_eq!(task.status, CatalogUpdateTaskStatus::Failed);
        assert!(task.error.is_some());
        assert!(state.last_full_refresh.is_none());
    }

    #[test]
    fn test_duplicate_start_is_ignored() {
        let state = started();
        let again = reduce_catalog_action(
            &state,
            CatalogAction::UpdateStarted(CatalogUpdateTaskState::new(3, CancelToken::new())),
        );
        assert!(again.is_none());
    }
}
