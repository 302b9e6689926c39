use super::DBClient;
use crate::dtos::CommentDto;
use crate::models::Comment;
use chrono::Utc;
use uuid::Uuid;

const COMMENT_SELECT: &str = r#"
    SELECT r.id, r.text, r.post_id, r.author_id, u.username AS author_username, r.created_at
    FROM comment r
    INNER JOIN users u ON r.author_id = u.id
"#;

/// Comment database operations trait
pub trait CommentExt {
    /// All comments of a post, oldest first
    async fn get_comments(&self, post_id: i64) -> Result<Vec<CommentDto>, sqlx::Error>;

    /// Comment by id, only if it belongs to `post_id`
    async fn get_comment(
        &self,
        post_id: i64,
        comment_id: i64,
    ) -> Result<Option<CommentDto>, sqlx::Error>;

    /// Create new comment on a post
    async fn create_comment(
        &self,
        author_id: Uuid,
        post_id: i64,
        text: &str,
    ) -> Result<Comment, sqlx::Error>;

    /// Update comment (user must own the comment)
    async fn edit_comment(
        &self,
        author_id: Uuid,
        comment_id: i64,
        text: &str,
    ) -> Result<Comment, sqlx::Error>;

    /// Delete comment (user must own the comment)
    async fn delete_comment(&self, author_id: Uuid, comment_id: i64) -> Result<(), sqlx::Error>;
}

impl CommentExt for DBClient {
    async fn get_comments(&self, post_id: i64) -> Result<Vec<CommentDto>, sqlx::Error> {
        let comments = sqlx::query_as::<_, CommentDto>(&format!(
            "{COMMENT_SELECT} WHERE r.post_id = ? ORDER BY r.created_at ASC, r.id ASC"
        ))
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(comments)
    }

    async fn get_comment(
        &self,
        post_id: i64,
        comment_id: i64,
    ) -> Result<Option<CommentDto>, sqlx::Error> {
        let comment = sqlx::query_as::<_, CommentDto>(&format!(
            "{COMMENT_SELECT} WHERE r.id = ? AND r.post_id = ?"
        ))
        .bind(comment_id)
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(comment)
    }

    async fn create_comment(
        &self,
        author_id: Uuid,
        post_id: i64,
        text: &str,
    ) -> Result<Comment, sqlx::Error> {
        let comment = sqlx::query_as::<_, Comment>(
            r#"
            INSERT INTO comment (text, post_id, author_id, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, text, post_id, author_id, created_at
            "#,
        )
        .bind(text)
        .bind(post_id)
        .bind(author_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(comment)
    }

    async fn edit_comment(
        &self,
        author_id: Uuid,
        comment_id: i64,
        text: &str,
    ) -> Result<Comment, sqlx::Error> {
        let comment = sqlx::query_as::<_, Comment>(
            r#"
            UPDATE comment
            SET text = ?
            WHERE id = ? AND author_id = ?
            RETURNING id, text, post_id, author_id, created_at
            "#,
        )
        .bind(text)
        .bind(comment_id)
        .bind(author_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(comment)
    }

    async fn delete_comment(&self, author_id: Uuid, comment_id: i64) -> Result<(), sqlx::Error> {
        let result = sqlx::query("DELETE FROM comment WHERE id = ? AND author_id = ?")
            .bind(comment_id)
            .bind(author_id)
            .execute(&self.pool)
            .await?;

        // Return RowNotFound if comment doesn't exist or user doesn't own it
        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }

        Ok(())
    }
}
