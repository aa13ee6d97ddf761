use std::sync::Arc;

use poise::serenity_prelude::{self as serenity, GatewayIntents};
use tracing::{info, warn};

use crate::clash::{ClashClient, RequestMetrics};
use crate::config::Config;
use crate::db::Repository;
use crate::discord::Data;
use crate::error::AppError;
use crate::gsheets::SheetsClient;
use crate::logging::LogConfig;
use crate::wars::poster::PosterGenerator;

mod clash;
mod config;
mod db;
mod discord;
mod error;
mod gsheets;
mod logging;
mod time;
mod tracking;
mod wars;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    logging::init(&LogConfig::from_env());

    info!("⚔️ Starting clashtrack...");

    let config = Arc::new(Config::from_env()?);

    let pool = db::connect(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    let db = Repository::new(pool);

    let metrics = RequestMetrics::new("clash");
    let clash = Arc::new(ClashClient::from_config(&config, metrics.clone()).await?);
    tokio::spawn(metrics.log_loop());

    let sheets = config
        .sheets
        .as_ref()
        .map(|cfg| Arc::new(SheetsClient::new(cfg)));
    if sheets.is_none() {
        info!("📄 Google Sheets not configured, sheet export disabled");
    }

    let posters = match PosterGenerator::new() {
        Ok(generator) => Some(Arc::new(generator)),
        Err(e) => {
            warn!(error = ?e, "🖼️ ⚠️ Poster generator unavailable, war posters disabled");
            None
        }
    };

    let token = config.discord_token.clone();
    let framework = discord::create_framework(Data {
        db,
        clash,
        config,
        sheets,
        posters,
    });

    let mut client = serenity::ClientBuilder::new(token, GatewayIntents::non_privileged())
        .framework(framework)
        .await?;
    client.start().await?;

    info!("👋 Shut down");
    Ok(())
}
