use super::DBClient;
use crate::models::Location;

pub trait LocationExt {
    async fn get_locations(&self) -> Result<Vec<Location>, sqlx::Error>;
}

impl LocationExt for DBClient {
    async fn get_locations(&self) -> Result<Vec<Location>, sqlx::Error> {
        sqlx::query_as::<_, Location>(
            "SELECT id, name, is_published, created_at FROM location ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
    }
}
