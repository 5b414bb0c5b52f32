//! Reactions to backend events: which chat messages to post, edit or remove,
//! and bookkeeping of the message registry around them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::{
    projects_needing_votes, status_left_active, MessageId, MessageRegistryRepository, Project,
    SingletonSlot,
};
use crate::error::{AppError, AppResult};
use crate::services::backend::GovernanceBackend;
use crate::services::events::{
    HandleEvent, ManualSend, PhaseNew, PhaseStatusUpdate, PhaseUpdate, PhaseVotesUpdate,
    PillarRate, ProjectNew, ProjectStatusUpdate, ProjectVotesUpdate, RelayEvent,
};
use crate::services::format;
use crate::services::scheduler::{OnDelivered, Scheduler};

pub struct NotificationHandlers {
    pool: SqlitePool,
    backend: Arc<dyn GovernanceBackend>,
    scheduler: Scheduler,
    /// Projects whose message is queued but not delivered yet. The flag is
    /// set when the project leaves the active state in the meantime, and the
    /// message is then deleted on delivery instead of being registered.
    pending_posts: Arc<Mutex<HashMap<String, bool>>>,
}

impl NotificationHandlers {
    pub fn new(pool: SqlitePool, backend: Arc<dyn GovernanceBackend>, scheduler: Scheduler) -> Self {
        NotificationHandlers {
            pool,
            backend,
            scheduler,
            pending_posts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Rebuild the overview digest from the backend's active set and post or
    /// edit it. Returns the active projects for callers that need them.
    pub async fn refresh_overview(&self) -> AppResult<HashMap<String, Project>> {
        let active = self.backend.fetch_active_projects().await?;
        if active.is_empty() {
            tracing::info!("Backend reported no active projects; overview left as is");
            return Ok(active);
        }

        let voting = projects_needing_votes(active.values());
        let text = format::overview_text(&voting);

        match MessageRegistryRepository::singleton_message_id(&self.pool, SingletonSlot::Overview)
            .await?
        {
            Some(message_id) => {
                tracing::info!("Updating overview message {}", message_id);
                self.scheduler.edit(message_id, text);
            }
            None => {
                tracing::info!("Creating new overview message");
                self.scheduler
                    .send(text, Some(self.remember_singleton(SingletonSlot::Overview)));
            }
        }

        Ok(active)
    }

    /// Overview refresh as a side step of another update: failures are only
    /// logged so the entity update still goes out.
    async fn refresh_overview_quietly(&self) {
        if let Err(e) = self.refresh_overview().await {
            tracing::warn!("Failed to refresh overview message: {}", e);
        }
    }

    async fn fetch_project(&self, project_id: &str) -> AppResult<Project> {
        let mut projects = self
            .backend
            .fetch_projects_by_ids(&[project_id.to_string()])
            .await?;

        projects
            .remove(project_id)
            .ok_or_else(|| AppError::NotFound(format!("project {}", project_id)))
    }

    /// Edit the registered message of `project`. Returns the message id, or
    /// `None` when the project has no message to edit.
    async fn edit_project_message(&self, project: &Project) -> AppResult<Option<MessageId>> {
        let message_id = MessageRegistryRepository::project_message_id(&self.pool, &project.id).await?;
        match message_id {
            Some(message_id) => self.scheduler.edit(message_id, format::project_text(project)),
            None => tracing::error!(
                "No message registered for project {} ({}); skipping edit",
                project.id,
                project.name
            ),
        }
        Ok(message_id)
    }

    /// Post the project message if the project has none yet, else edit it.
    async fn post_or_edit_project_message(&self, project: &Project, text: String) -> AppResult<()> {
        match MessageRegistryRepository::project_message_id(&self.pool, &project.id).await? {
            Some(message_id) => self.scheduler.edit(message_id, format::project_text(project)),
            None => self.post_project_message(&project.id, text),
        }
        Ok(())
    }

    fn post_project_message(&self, project_id: &str, text: String) {
        lock(&self.pending_posts).insert(project_id.to_string(), false);
        self.scheduler
            .send(text, Some(self.remember_project(project_id)));
    }

    /// Retire the project message if there is one, or have it deleted on
    /// delivery if it is still queued.
    async fn retire_or_defer(&self, project: &Project, message_id: Option<MessageId>) -> AppResult<()> {
        if let Some(message_id) = message_id {
            return self.retire_project_message(project, message_id).await;
        }

        let queued = match lock(&self.pending_posts).get_mut(&project.id) {
            Some(retire) => {
                *retire = true;
                true
            }
            None => false,
        };
        if queued {
            tracing::info!(
                "Message of project {} is still queued; deleting it on delivery",
                project.id
            );
        }
        Ok(())
    }

    /// Delete a project message that no longer tracks anything live and
    /// forget its id.
    async fn retire_project_message(&self, project: &Project, message_id: MessageId) -> AppResult<()> {
        tracing::info!(
            "Retiring message {} of project {} with status {}",
            message_id,
            project.id,
            project.status
        );
        self.scheduler.delete(message_id);
        MessageRegistryRepository::remove_project_message_id(&self.pool, &project.id).await?;
        Ok(())
    }

    fn remember_project(&self, project_id: &str) -> OnDelivered {
        let pool = self.pool.clone();
        let scheduler = self.scheduler.clone();
        let pending_posts = self.pending_posts.clone();
        let project_id = project_id.to_string();
        OnDelivered::new(move |message_id| async move {
            let retire = lock(&pending_posts).remove(&project_id).unwrap_or(false);
            if retire {
                tracing::info!(
                    "Project {} left the active state before message {} was delivered; deleting it",
                    project_id,
                    message_id
                );
                scheduler.delete(message_id);
                return;
            }

            if let Err(e) =
                MessageRegistryRepository::store_project_message_id(&pool, &project_id, message_id)
                    .await
            {
                tracing::error!(
                    "Failed to store message {} for project {}: {}",
                    message_id,
                    project_id,
                    e
                );
            }
        })
    }

    fn remember_singleton(&self, slot: SingletonSlot) -> OnDelivered {
        let pool = self.pool.clone();
        OnDelivered::new(move |message_id| async move {
            if let Err(e) =
                MessageRegistryRepository::set_singleton_message_id(&pool, slot, message_id).await
            {
                tracing::error!(
                    "Failed to store {} message id {}: {}",
                    slot.as_str(),
                    message_id,
                    e
                );
            }
        })
    }

    async fn on_project_new(&self, event: ProjectNew) -> AppResult<()> {
        tracing::info!("New project {} ({})", event.data.name, event.id);
        self.refresh_overview_quietly().await;
        let text = format::new_project_text(&event.data);
        self.post_or_edit_project_message(&event.data, text).await
    }

    async fn on_project_votes(&self, event: ProjectVotesUpdate) -> AppResult<()> {
        let project = self.fetch_project(&event.id).await?;
        self.refresh_overview_quietly().await;
        self.edit_project_message(&project).await?;
        Ok(())
    }

    async fn on_project_status(&self, event: ProjectStatusUpdate) -> AppResult<()> {
        tracing::info!(
            "Project {} status changed {} -> {}",
            event.id,
            event.old,
            event.new
        );
        let project = self.fetch_project(&event.id).await?;
        self.refresh_overview_quietly().await;
        let message_id = self.edit_project_message(&project).await?;

        if status_left_active(event.new) || project.has_left_active_state() {
            self.retire_or_defer(&project, message_id).await?;
        }
        self.scheduler
            .send(format::project_status_notice(&project, event.new), None);
        Ok(())
    }

    async fn on_phase_new(&self, event: PhaseNew) -> AppResult<()> {
        let project = self.fetch_project(&event.data.pid).await?;
        tracing::info!("New phase {} for project {}", event.data.name, project.name);
        self.refresh_overview_quietly().await;
        self.post_or_edit_project_message(&project, format::project_text(&project))
            .await?;
        self.scheduler
            .send(format::new_phase_notice(&project, &event.data), None);
        Ok(())
    }

    async fn on_phase_reset(&self, event: PhaseUpdate) -> AppResult<()> {
        let project = self.fetch_project(&event.data.pid).await?;
        tracing::info!("Phase {} of project {} was reset", event.old, project.name);
        self.refresh_overview_quietly().await;
        self.edit_project_message(&project).await?;
        self.scheduler
            .send(format::phase_reset_notice(&project, &event.data), None);
        Ok(())
    }

    async fn on_phase_votes(&self, event: PhaseVotesUpdate) -> AppResult<()> {
        let project = self.fetch_project(&event.pid).await?;
        self.refresh_overview_quietly().await;
        self.edit_project_message(&project).await?;
        Ok(())
    }

    async fn on_phase_status(&self, event: PhaseStatusUpdate) -> AppResult<()> {
        tracing::info!(
            "Phase {} of project {} status changed {} -> {}",
            event.id,
            event.pid,
            event.old,
            event.new
        );
        let project = self.fetch_project(&event.pid).await?;
        self.refresh_overview_quietly().await;
        let message_id = self.edit_project_message(&project).await?;

        if status_left_active(event.new) || project.has_left_active_state() {
            self.retire_or_defer(&project, message_id).await?;
        }
        self.scheduler
            .send(format::phase_status_notice(&project, event.new), None);
        Ok(())
    }

    async fn on_pillar_stats(&self, rates: Vec<PillarRate>) -> AppResult<()> {
        tracing::info!("New participation rates received for {} pillars", rates.len());
        let text = format::rates_text(&rates);

        match MessageRegistryRepository::singleton_message_id(&self.pool, SingletonSlot::Rates)
            .await?
        {
            Some(message_id) => self.scheduler.edit(message_id, text),
            None => self
                .scheduler
                .send(text, Some(self.remember_singleton(SingletonSlot::Rates))),
        }
        Ok(())
    }

    fn on_manual_send(&self, event: ManualSend) {
        tracing::info!("Sending manual update");
        self.scheduler.send(event.text, None);
    }

    /// Startup pass: refresh the overview and, when `sync_projects` is set,
    /// reconcile project messages with the backend's active set.
    pub async fn startup_refresh(&self, sync_projects: bool) -> AppResult<()> {
        let active = self.refresh_overview().await?;
        if sync_projects {
            self.sync_project_messages(&active, true).await?;
        }
        Ok(())
    }

    /// Post messages for active projects without one, delete messages of
    /// projects no longer active and optionally edit the rest.
    pub async fn sync_project_messages(
        &self,
        active: &HashMap<String, Project>,
        update_existing: bool,
    ) -> AppResult<()> {
        let mut projects: Vec<&Project> = active.values().collect();
        projects.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        let ids: Vec<&str> = projects.iter().map(|p| p.id.as_str()).collect();

        let diff = MessageRegistryRepository::projects_diff(&self.pool, &ids).await?;
        tracing::info!(
            "Project messages: {} new, {} to delete",
            diff.new.len(),
            diff.removed.len()
        );

        for project in projects.iter().filter(|p| diff.new.contains(&p.id)) {
            self.post_project_message(&project.id, format::project_text(project));
        }

        for project_id in &diff.removed {
            if let Some(message_id) =
                MessageRegistryRepository::remove_project_message_id(&self.pool, project_id).await?
            {
                self.scheduler.delete(message_id);
            }
        }

        if update_existing {
            for project in projects.iter().filter(|p| !diff.new.contains(&p.id)) {
                self.edit_project_message(project).await?;
            }
        }

        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl HandleEvent for NotificationHandlers {
    async fn handle(&self, event: RelayEvent) -> AppResult<()> {
        match event {
            RelayEvent::ProjectNew(e) => self.on_project_new(e).await,
            RelayEvent::ProjectVotesUpdate(e) => self.on_project_votes(e).await,
            RelayEvent::ProjectStatusUpdate(e) => self.on_project_status(e).await,
            RelayEvent::PhaseNew(e) => self.on_phase_new(e).await,
            RelayEvent::PhaseUpdate(e) => self.on_phase_reset(e).await,
            RelayEvent::PhaseVotesUpdate(e) => self.on_phase_votes(e).await,
            RelayEvent::PhaseStatusUpdate(e) => self.on_phase_status(e).await,
            RelayEvent::PillarStats(rates) => self.on_pillar_stats(rates).await,
            RelayEvent::ManualSend(e) => {
                self.on_manual_send(e);
                Ok(())
            }
        }
    }
}
