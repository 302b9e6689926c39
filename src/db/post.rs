use super::DBClient;
use crate::dtos::{PostDto, PostInput};
use crate::models::Post;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

/// Post columns joined with author, category, location and the comment count
const POST_SELECT: &str = r#"
    SELECT p.id, p.title, p.text, p.image, p.pub_date, p.is_published, p.created_at,
           p.author_id, u.username AS author_username,
           p.category_id, c.title AS category_title, c.slug AS category_slug,
           c.is_published AS category_is_published,
           p.location_id, l.name AS location_name, l.is_published AS location_is_published,
           (SELECT COUNT(*) FROM comment cm WHERE cm.post_id = p.id) AS comment_count
    FROM post p
    INNER JOIN users u ON p.author_id = u.id
    LEFT JOIN category c ON p.category_id = c.id
    LEFT JOIN location l ON p.location_id = l.id
"#;

const POST_COLUMNS: &str =
    "id, title, text, image, pub_date, is_published, author_id, category_id, location_id, created_at";

/// Which posts a listing shows
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostScope {
    /// Every post passing the publication gate
    Public,
    /// Public posts of one category
    Category(i64),
    /// One author's posts; `include_hidden` when the author is looking
    Author { author_id: Uuid, include_hidden: bool },
}

fn push_scope(builder: &mut QueryBuilder<'_, Sqlite>, scope: PostScope, now: DateTime<Utc>) {
    let public = match scope {
        PostScope::Public => true,
        PostScope::Category(category_id) => {
            builder.push(" AND p.category_id = ").push_bind(category_id);
            true
        }
        PostScope::Author {
            author_id,
            include_hidden,
        } => {
            builder.push(" AND p.author_id = ").push_bind(author_id);
            !include_hidden
        }
    };

    if public {
        builder
            .push(" AND p.is_published = 1 AND c.is_published = 1 AND p.pub_date <= ")
            .push_bind(now);
    }
}

pub trait PostExt {
    /// Single post regardless of visibility; callers apply the gate
    async fn get_post(&self, post_id: i64) -> Result<Option<PostDto>, sqlx::Error>;

    /// One page of a listing, newest first
    async fn get_posts(
        &self,
        scope: PostScope,
        now: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PostDto>, sqlx::Error>;

    async fn get_post_count(&self, scope: PostScope, now: DateTime<Utc>)
    -> Result<i64, sqlx::Error>;

    async fn create_post(&self, author_id: Uuid, input: &PostInput) -> Result<Post, sqlx::Error>;

    /// Update post (user must own the post)
    async fn edit_post(
        &self,
        author_id: Uuid,
        post_id: i64,
        input: &PostInput,
    ) -> Result<Post, sqlx::Error>;

    /// Delete post and, through the foreign key, its comments
    async fn delete_post(&self, author_id: Uuid, post_id: i64) -> Result<(), sqlx::Error>;
}

impl PostExt for DBClient {
    async fn get_post(&self, post_id: i64) -> Result<Option<PostDto>, sqlx::Error> {
        sqlx::query_as::<_, PostDto>(&format!("{POST_SELECT} WHERE p.id = ?"))
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn get_posts(
        &self,
        scope: PostScope,
        now: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PostDto>, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new(POST_SELECT);
        builder.push(" WHERE 1 = 1");
        push_scope(&mut builder, scope, now);
        builder
            .push(" ORDER BY p.pub_date DESC, p.id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let posts = builder
            .build_query_as::<PostDto>()
            .fetch_all(&self.pool)
            .await?;

        Ok(posts)
    }

    async fn get_post_count(
        &self,
        scope: PostScope,
        now: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            r#"
            SELECT COUNT(*)
            FROM post p
            LEFT JOIN category c ON p.category_id = c.id
            WHERE 1 = 1
            "#,
        );
        push_scope(&mut builder, scope, now);

        let count: i64 = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn create_post(&self, author_id: Uuid, input: &PostInput) -> Result<Post, sqlx::Error> {
        let post = sqlx::query_as::<_, Post>(&format!(
            r#"
            INSERT INTO post (title, text, image, pub_date, is_published, author_id, category_id, location_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(&input.title)
        .bind(&input.text)
        .bind(&input.image)
        .bind(input.pub_date)
        .bind(input.is_published)
        .bind(author_id)
        .bind(input.category_id)
        .bind(input.location_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(post)
    }

    async fn edit_post(
        &self,
        author_id: Uuid,
        post_id: i64,
        input: &PostInput,
    ) -> Result<Post, sqlx::Error> {
        let post = sqlx::query_as::<_, Post>(&format!(
            r#"
            UPDATE post
            SET title = ?, text = ?, image = ?, pub_date = ?, is_published = ?,
                category_id = ?, location_id = ?
            WHERE id = ? AND author_id = ?
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(&input.title)
        .bind(&input.text)
        .bind(&input.image)
        .bind(input.pub_date)
        .bind(input.is_published)
        .bind(input.category_id)
        .bind(input.location_id)
        .bind(post_id)
        .bind(author_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(post)
    }

    async fn delete_post(&self, author_id: Uuid, post_id: i64) -> Result<(), sqlx::Error> {
        let result = sqlx::query("DELETE FROM post WHERE id = ? AND author_id = ?")
            .bind(post_id)
            .bind(author_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }

        Ok(())
    }
}
