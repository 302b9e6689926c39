use sqlx::SqlitePool;

mod user;
pub use user::UserExt;

mod post;
pub use post::{PostExt, PostScope};

mod comment;
pub use comment::CommentExt;

mod category;
pub use category::CategoryExt;

mod location;
pub use location::LocationExt;

#[derive(Debug, Clone)]
pub struct DBClient {
    pool: SqlitePool,
}
impl DBClient {
    pub fn new(pool: SqlitePool) -> Self {
        DBClient { pool }
    }
}
