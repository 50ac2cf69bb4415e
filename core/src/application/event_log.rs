// Copyright (c) 2026 Conduit Systems
// SPDX-License-Identifier: AGPL-3.0

//! Authoritative ordered audit trail per task. A thin wrapper
//! around `EventRepository`: the whole public contract is the single
//! `publish` operation, sequence assignment is the repository's job.

use std::sync::Arc;

use crate::domain::event::{EventPayload, TaskEvent};
use crate::domain::ids::TaskId;
use crate::domain::repository::{EventRepository, RepositoryError};

#[derive(Clone)]
pub struct EventLog {
    repository: Arc<dyn EventRepository>,
}

impl EventLog {
    pub fn new(repository: Arc<dyn EventRepository>) -> Self {
        Self { repository }
    }

    /// Persist one event, returning it with its assigned sequence.
    pub async fn publish(&self, task_id: TaskId, payload: EventPayload) -> Result<TaskEvent, RepositoryError> {
        self.repository.append_task_event(task_id, payload).await
    }

    pub async fn list(&self, task_id: TaskId) -> Result<Vec<TaskEvent>, RepositoryError> {
        self.repository.list_task_events(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::WorkspaceId;
    use crate::infrastructure::repositories::in_memory::InMemoryEventRepository;
    use std::collections::HashMap;

    #[tokio::test]
    async fn publish_assigns_contiguous_sequences() {
        let log = EventLog::new(Arc::new(InMemoryEventRepository::new()));
        let task_id = TaskId::new();
        let e1 = log
            .publish(
                task_id,
                EventPayload::TaskCreated {
                    task_id,
                    status: "queued".into(),
                    runtime_id: "python3.11".into(),
                    timeout_ms: 1000,
                    workspace_id: WorkspaceId::new(),
                    actor_id: "a".into(),
                    client_id: "c".into(),
                    created_at: chrono::Utc::now(),
                    extra: HashMap::new(),
                },
            )
            .await
            .unwrap();
        let e2 = log
            .publish(
                task_id,
                EventPayload::TaskQueued {
                    task_id,
                    status: "queued".into(),
                    extra: HashMap::new(),
                },
            )
            .await
            .unwrap();
        assert_eq!(e1.sequence, 1);
        assert_eq!(e2.sequence, 2);
        assert_eq!(log.list(task_id).await.unwrap().len(), 2);
    }
}
