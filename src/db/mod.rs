pub mod migrations;
pub mod models;
pub mod repository;

pub use migrations::run_migrations;
pub use repository::{BattleQuery, Repository};

use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::error::AppError;

pub async fn connect(database_url: &str) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}
