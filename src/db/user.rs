use super::DBClient;
use crate::models::User;
use chrono::Utc;
use uuid::Uuid;

const USER_COLUMNS: &str =
    "id, username, first_name, last_name, email, password, created_at, updated_at";

/// User database operations trait
pub trait UserExt {
    /// Get single user by ID or username
    /// Returns Option - Some(user) if found, None if not found
    async fn get_user(
        &self,
        user_id: Option<Uuid>,
        username: Option<&str>,
    ) -> Result<Option<User>, sqlx::Error>;

    /// Create new user; `password` must already be hashed
    async fn save_user(
        &self,
        username: &str,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &str,
    ) -> Result<User, sqlx::Error>;

    /// Update the editable profile fields
    async fn update_user_profile(
        &self,
        user_id: Uuid,
        username: &str,
        first_name: &str,
        last_name: &str,
        email: &str,
    ) -> Result<User, sqlx::Error>;

    /// Update user's password hash
    async fn update_user_password(
        &self,
        user_id: Uuid,
        password: &str,
    ) -> Result<User, sqlx::Error>;

    /// Whether `username` is taken by someone other than `except`
    async fn username_taken(
        &self,
        username: &str,
        except: Option<Uuid>,
    ) -> Result<bool, sqlx::Error>;
}

impl UserExt for DBClient {
    async fn get_user(
        &self,
        user_id: Option<Uuid>,
        username: Option<&str>,
    ) -> Result<Option<User>, sqlx::Error> {
        let mut user: Option<User> = None;

        if let Some(user_id) = user_id {
            user = sqlx::query_as::<_, User>(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
            ))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        } else if let Some(username) = username {
            user = sqlx::query_as::<_, User>(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
            ))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        }

        Ok(user)
    }

    async fn save_user(
        &self,
        username: &str,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &str,
    ) -> Result<User, sqlx::Error> {
        let now = Utc::now();
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, username, first_name, last_name, email, password, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(first_name)
        .bind(last_name)
        .bind(email)
        .bind(password)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn update_user_profile(
        &self,
        user_id: Uuid,
        username: &str,
        first_name: &str,
        last_name: &str,
        email: &str,
    ) -> Result<User, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET username = ?, first_name = ?, last_name = ?, email = ?, updated_at = ?
            WHERE id = ?
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(username)
        .bind(first_name)
        .bind(last_name)
        .bind(email)
        .bind(Utc::now())
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn update_user_password(
        &self,
        user_id: Uuid,
        password: &str,
    ) -> Result<User, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET password = ?, updated_at = ?
            WHERE id = ?
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(password)
        .bind(Utc::now())
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn username_taken(
        &self,
        username: &str,
        except: Option<Uuid>,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 = match except {
            Some(user_id) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ? AND id != ?")
                    .bind(username)
                    .bind(user_id)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?")
                    .bind(username)
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        Ok(count > 0)
    }
}
