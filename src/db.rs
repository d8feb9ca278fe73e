use sqlx::postgres::PgPoolOptions;

use crate::config::Config;

pub async fn get_db_pool(config: &Config) -> Result<sqlx::Pool<sqlx::Postgres>, sqlx::Error> {
    info!("connecting to {}", config.redacted_database_url());
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(config.database_url.as_str())
        .await
}
