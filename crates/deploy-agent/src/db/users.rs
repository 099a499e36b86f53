use anyhow::Result;

use super::{DbClient, NewUser, UserRecord};

#[allow(clippy::missing_errors_doc)]
impl DbClient {
    pub async fn users_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    pub async fn insert_user(&self, user: &NewUser) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, role) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.role)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT id, username, password_hash, role FROM users WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(user_from_row))
    }

    pub async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT id, username, password_hash, role FROM users WHERE id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(user_from_row))
    }
}

fn user_from_row((id, username, password_hash, role): (String, String, String, String)) -> UserRecord {
    UserRecord {
        id,
        username,
        password_hash,
        role,
    }
}
