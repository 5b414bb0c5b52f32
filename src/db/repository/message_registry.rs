use std::collections::HashMap;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

/// Repository for the chat message registry.
///
/// Every mutation is a single statement against sqlite, so the registry is
/// durable as soon as the call returns. A stored id of `0` is treated the
/// same as a missing row.
pub struct MessageRegistryRepository;

impl MessageRegistryRepository {
    /// Message currently representing `project_id`, if any.
    pub async fn project_message_id(
        pool: &SqlitePool,
        project_id: &str,
    ) -> AppResult<Option<MessageId>> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT message_id FROM project_messages WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(id.and_then(to_message_id))
    }

    pub async fn store_project_message_id(
        pool: &SqlitePool,
        project_id: &str,
        message_id: MessageId,
    ) -> AppResult<()> {
        tracing::info!("Storing message {} for project {}", message_id, project_id);
        sqlx::query(
            r#"
            INSERT INTO project_messages (project_id, message_id, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(project_id) DO UPDATE SET
                message_id = excluded.message_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id)
        .bind(message_id as i64)
        .bind(Utc::now().naive_utc())
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Drop the registration of `project_id` and return the message it pointed to.
    pub async fn remove_project_message_id(
        pool: &SqlitePool,
        project_id: &str,
    ) -> AppResult<Option<MessageId>> {
        let removed = sqlx::query_scalar::<_, i64>(
            "DELETE FROM project_messages WHERE project_id = ? RETURNING message_id",
        )
        .bind(project_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        match removed {
            Some(message_id) => {
                tracing::info!(
                    "Removed message {} of project {} from registry",
                    message_id,
                    project_id
                );
            }
            None => {
                tracing::warn!(
                    "Attempt to remove message for unregistered project {}",
                    project_id
                );
            }
        }

        Ok(removed.and_then(to_message_id))
    }

    pub async fn list_project_messages(pool: &SqlitePool) -> AppResult<Vec<ProjectMessage>> {
        let rows = sqlx::query_as::<_, ProjectMessage>(
            r#"
            SELECT project_id, message_id, updated_at
            FROM project_messages
            ORDER BY project_id
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Compare the registry against the ids the backend currently reports.
    pub async fn projects_diff<S: AsRef<str>>(
        pool: &SqlitePool,
        current_ids: &[S],
    ) -> AppResult<ProjectsDiff> {
        let registered: HashMap<String, MessageId> = Self::list_project_messages(pool)
            .await?
            .into_iter()
            .map(|row| (row.project_id, to_message_id(row.message_id).unwrap_or(0)))
            .collect();

        Ok(ProjectsDiff::compute(&registered, current_ids))
    }

    pub async fn singleton_message_id(
        pool: &SqlitePool,
        slot: SingletonSlot,
    ) -> AppResult<Option<MessageId>> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT message_id FROM singleton_messages WHERE slot = ?",
        )
        .bind(slot.as_str())
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(id.and_then(to_message_id))
    }

    pub async fn set_singleton_message_id(
        pool: &SqlitePool,
        slot: SingletonSlot,
        message_id: MessageId,
    ) -> AppResult<()> {
        tracing::info!("Storing {} message id {}", slot.as_str(), message_id);
        sqlx::query(
            r#"
            INSERT INTO singleton_messages (slot, message_id, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(slot) DO UPDATE SET
                message_id = excluded.message_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(slot.as_str())
        .bind(message_id as i64)
        .bind(Utc::now().naive_utc())
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    pub async fn is_empty(pool: &SqlitePool) -> AppResult<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT (SELECT COUNT(*) FROM project_messages)
                 + (SELECT COUNT(*) FROM singleton_messages)
            "#,
        )
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(count == 0)
    }

    /// Copy the ids of a legacy state file into the registry.
    ///
    /// Zero ids are skipped. Returns the number of imported project messages.
    pub async fn import_legacy(pool: &SqlitePool, state: &LegacyState) -> AppResult<usize> {
        let ids = &state.message_ids;
        if ids.overview != 0 {
            Self::set_singleton_message_id(pool, SingletonSlot::Overview, ids.overview).await?;
        }
        if ids.rates != 0 {
            Self::set_singleton_message_id(pool, SingletonSlot::Rates, ids.rates).await?;
        }

        let mut imported = 0;
        for (project_id, message_id) in &ids.projects {
            if *message_id == 0 {
                continue;
            }
            Self::store_project_message_id(pool, project_id, *message_id).await?;
            imported += 1;
        }

        Ok(imported)
    }
}

fn to_message_id(raw: i64) -> Option<MessageId> {
    MessageId::try_from(raw).ok().filter(|id| *id != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::memory_pool;

    #[tokio::test]
    async fn store_lookup_and_remove_project_message() {
        let pool = memory_pool().await;

        assert_eq!(
            MessageRegistryRepository::project_message_id(&pool, "p1").await.unwrap(),
            None
        );

        MessageRegistryRepository::store_project_message_id(&pool, "p1", 42)
            .await
            .unwrap();
        assert_eq!(
            MessageRegistryRepository::project_message_id(&pool, "p1").await.unwrap(),
            Some(42)
        );

        // Overwrite keeps a single row.
        MessageRegistryRepository::store_project_message_id(&pool, "p1", 43)
            .await
            .unwrap();
        assert_eq!(
            MessageRegistryRepository::list_project_messages(&pool)
                .await
                .unwrap()
                .len(),
            1
        );

        let removed = MessageRegistryRepository::remove_project_message_id(&pool, "p1")
            .await
            .unwrap();
        assert_eq!(removed, Some(43));
        assert_eq!(
            MessageRegistryRepository::remove_project_message_id(&pool, "p1")
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn zero_id_reads_as_missing() {
        let pool = memory_pool().await;
        MessageRegistryRepository::store_project_message_id(&pool, "p1", 0)
            .await
            .unwrap();
        assert_eq!(
            MessageRegistryRepository::project_message_id(&pool, "p1").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn projects_diff_against_registry() {
        let pool = memory_pool().await;
        MessageRegistryRepository::store_project_message_id(&pool, "A", 1)
            .await
            .unwrap();
        MessageRegistryRepository::store_project_message_id(&pool, "B", 2)
            .await
            .unwrap();

        let diff = MessageRegistryRepository::projects_diff(&pool, &["B", "C"])
            .await
            .unwrap();
        assert_eq!(diff.new, vec!["C".to_string()]);
        assert_eq!(diff.removed, vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn singleton_slots_are_independent() {
        let pool = memory_pool().await;
        MessageRegistryRepository::set_singleton_message_id(&pool, SingletonSlot::Overview, 7)
            .await
            .unwrap();

        assert_eq!(
            MessageRegistryRepository::singleton_message_id(&pool, SingletonSlot::Overview)
                .await
                .unwrap(),
            Some(7)
        );
        assert_eq!(
            MessageRegistryRepository::singleton_message_id(&pool, SingletonSlot::Rates)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn import_legacy_skips_zero_ids() {
        let pool = memory_pool().await;
        assert!(MessageRegistryRepository::is_empty(&pool).await.unwrap());

        let state: LegacyState = serde_json::from_str(
            r#"{"message-ids": {"overview": 5, "rates": 0, "projects": {"p1": 9, "p2": 0}}}"#,
        )
        .unwrap();
        let imported = MessageRegistryRepository::import_legacy(&pool, &state)
            .await
            .unwrap();

        assert_eq!(imported, 1);
        assert!(!MessageRegistryRepository::is_empty(&pool).await.unwrap());
        assert_eq!(
            MessageRegistryRepository::singleton_message_id(&pool, SingletonSlot::Overview)
                .await
                .unwrap(),
            Some(5)
        );
        assert_eq!(
            MessageRegistryRepository::singleton_message_id(&pool, SingletonSlot::Rates)
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            MessageRegistryRepository::project_message_id(&pool, "p2").await.unwrap(),
            None
        );
    }
}
