use anyhow::Result;

use super::{ActionLogRecord, DbClient, NewActionLog, ACTION_LOG_LIMIT_CEILING};

#[allow(clippy::missing_errors_doc)]
impl DbClient {
    pub async fn insert_action_log(&self, entry: &NewActionLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO action_logs (id, owner_id, action, instance_name, details, status) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&entry.id)
        .bind(&entry.owner_id)
        .bind(&entry.action)
        .bind(&entry.instance_name)
        .bind(&entry.details)
        .bind(&entry.status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent first; `limit` is clamped to `1..=200`.
    pub async fn list_action_logs(
        &self,
        owner_id: &str,
        instance_name: &str,
        limit: i64,
    ) -> Result<Vec<ActionLogRecord>> {
        let rows = sqlx::query_as::<_, (String, String, String, String, String, String)>(
            "SELECT id, action, instance_name, details, status, created_at FROM action_logs WHERE owner_id = ?1 AND instance_name = ?2 ORDER BY created_at DESC, rowid DESC LIMIT ?3",
        )
        .bind(owner_id)
        .bind(instance_name)
        .bind(limit.clamp(1, ACTION_LOG_LIMIT_CEILING))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, action, instance_name, details, status, created_at)| ActionLogRecord {
                    id,
                    action,
                    instance_name,
                    details,
                    status,
                    created_at,
                },
            )
            .collect())
    }
}
