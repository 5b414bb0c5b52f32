//! Fakes shared by the unit tests: an in-memory registry database, a chat
//! that records calls and a backend serving fixed snapshots.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::time::Instant;

use crate::db::{MessageId, Project};
use crate::error::{AppError, AppResult, DeliveryError};
use crate::services::backend::GovernanceBackend;
use crate::services::telegram::ChatDelivery;

/// Single connection pool so every query sees the same in-memory database.
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite should open");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations should apply");
    pool
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DeliveryCall {
    Send {
        chat_id: i64,
        text: String,
    },
    Edit {
        chat_id: i64,
        message_id: MessageId,
        text: String,
    },
    Delete {
        chat_id: i64,
        message_id: MessageId,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub at: Instant,
    pub call: DeliveryCall,
}

/// Chat fake. Every call is recorded, including failed ones; queued failures
/// are consumed one per call. Successful sends get ids 1, 2, 3...
#[derive(Default)]
pub(crate) struct RecordingDelivery {
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<VecDeque<DeliveryError>>,
    next_id: Mutex<MessageId>,
}

impl RecordingDelivery {
    pub fn fail_next(&self, failures: Vec<DeliveryError>) {
        self.failures.lock().unwrap().extend(failures);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ops(&self) -> Vec<DeliveryCall> {
        self.calls().into_iter().map(|c| c.call).collect()
    }

    fn record(&self, call: DeliveryCall) -> Result<(), DeliveryError> {
        self.calls.lock().unwrap().push(RecordedCall {
            at: Instant::now(),
            call,
        });
        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatDelivery for RecordingDelivery {
    async fn send(&self, chat_id: i64, text: &str) -> Result<MessageId, DeliveryError> {
        self.record(DeliveryCall::Send {
            chat_id,
            text: text.to_string(),
        })?;
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        Ok(*next_id)
    }

    async fn edit(
        &self,
        chat_id: i64,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), DeliveryError> {
        self.record(DeliveryCall::Edit {
            chat_id,
            message_id,
            text: text.to_string(),
        })
    }

    async fn delete(&self, chat_id: i64, message_id: MessageId) -> Result<(), DeliveryError> {
        self.record(DeliveryCall::Delete {
            chat_id,
            message_id,
        })
    }
}

/// Backend fake holding the current project snapshots. `active-projects`
/// returns all of them.
#[derive(Default)]
pub(crate) struct StaticBackend {
    projects: Mutex<HashMap<String, Project>>,
    unavailable: Mutex<bool>,
}

impl StaticBackend {
    pub fn with_projects(projects: Vec<Project>) -> Self {
        let backend = StaticBackend::default();
        for project in projects {
            backend.put(project);
        }
        backend
    }

    pub fn put(&self, project: Project) {
        self.projects
            .lock()
            .unwrap()
            .insert(project.id.clone(), project);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    fn check_available(&self) -> AppResult<()> {
        if *self.unavailable.lock().unwrap() {
            return Err(AppError::BackendTimeout(Duration::from_secs(1)));
        }
        Ok(())
    }
}

#[async_trait]
impl GovernanceBackend for StaticBackend {
    async fn fetch_projects_by_ids(&self, ids: &[String]) -> AppResult<HashMap<String, Project>> {
        self.check_available()?;
        let projects = self.projects.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| projects.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }

    async fn fetch_active_projects(&self) -> AppResult<HashMap<String, Project>> {
        self.check_available()?;
        Ok(self.projects.lock().unwrap().clone())
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub(crate) async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
