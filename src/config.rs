use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_maxage: i64,
    pub port: u16,
    pub media_root: PathBuf,
    pub max_upload_size: usize,
}

/// Two weeks, the usual browser-session lifetime
const DEFAULT_JWT_MAXAGE: i64 = 60 * 60 * 24 * 14;
const DEFAULT_MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

impl Config {
    pub fn init() -> Config {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let jwt_secret = std::env::var("JWT_SECRET_KEY").expect("JWT_SECRET_KEY must be set");
        let jwt_maxage = env_or("JWT_MAXAGE", DEFAULT_JWT_MAXAGE);
        let port = env_or("PORT", 8000);
        let media_root = std::env::var("MEDIA_ROOT").unwrap_or_else(|_| "./media".to_string());
        let max_upload_size = env_or("MAX_UPLOAD_SIZE", DEFAULT_MAX_UPLOAD_SIZE);

        Config {
            database_url,
            jwt_secret,
            jwt_maxage,
            port,
            media_root: PathBuf::from(media_root),
            max_upload_size,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => value.parse::<T>().unwrap_or_else(|_| {
            tracing::warn!("{} has an invalid value {:?}, using the default", key, value);
            default
        }),
        Err(_) => default,
    }
}
