use super::DBClient;
use crate::models::Category;

pub trait CategoryExt {
    /// Published category by slug; unpublished ones are treated as missing
    async fn get_published_category(&self, slug: &str) -> Result<Option<Category>, sqlx::Error>;

    /// Every category, for the post form's select box
    async fn get_categories(&self) -> Result<Vec<Category>, sqlx::Error>;
}

impl CategoryExt for DBClient {
    async fn get_published_category(&self, slug: &str) -> Result<Option<Category>, sqlx::Error> {
        sqlx::query_as::<_, Category>(
            r#"
            SELECT id, title, description, slug, is_published, created_at
            FROM category
            WHERE slug = ? AND is_published = 1
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_categories(&self) -> Result<Vec<Category>, sqlx::Error> {
        sqlx::query_as::<_, Category>(
            "SELECT id, title, description, slug, is_published, created_at FROM category ORDER BY title",
        )
        .fetch_all(&self.pool)
        .await
    }
}
