mod config;
mod db;
mod dtos;
mod error;
mod handler;
mod middleware;
mod models;
mod routes;
mod templates;
mod tracing_config;
mod utils;

#[cfg(test)]
mod test_utils;

use config::Config;
use db::DBClient;
use dotenv::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AppState {
    pub env: Arc<Config>,
    pub db_client: DBClient,
}

#[tokio::main]
async fn main() {
    let _guard = tracing_config::init_tracing();

    dotenv().ok();

    let config = Config::init();

    let options = match SqliteConnectOptions::from_str(&config.database_url) {
        Ok(options) => options.create_if_missing(true).foreign_keys(true),
        Err(err) => {
            tracing::error!("Invalid DATABASE_URL {}: {}", config.database_url, err);
            std::process::exit(1);
        }
    };

    let pool = match SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await
    {
        Ok(pool) => {
            tracing::info!("Connection to the database is successful");
            pool
        }
        Err(err) => {
            tracing::error!("Failed to connect to the database: {:?}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = sqlx::migrate!().run(&pool).await {
        tracing::error!("Failed to run migrations: {}", err);
        std::process::exit(1);
    }

    // compile every template now rather than on the first request
    if let Err(err) = templates::check() {
        tracing::error!("Failed to load templates: {}", err);
        std::process::exit(1);
    }

    if let Err(err) = tokio::fs::create_dir_all(&config.media_root).await {
        tracing::error!(
            "Failed to create media root {}: {}",
            config.media_root.display(),
            err
        );
        std::process::exit(1);
    }

    let app_state = AppState {
        env: Arc::new(config.clone()),
        db_client: DBClient::new(pool),
    };

    let app = routes::create_router(app_state);

    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("Failed to bind port {}: {}", config.port, err);
            std::process::exit(1);
        }
    };

    tracing::info!("Server is running on http://localhost:{}", config.port);

    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", err);
    }
}
