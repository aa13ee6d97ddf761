use std::sync::Arc;

use poise::serenity_prelude::{self as serenity, ActivityData, GuildId, Http};
use tracing::{info, warn};

use super::{commands, report};
use crate::clash::ClashClient;
use crate::config::{Config, EmbedColors};
use crate::db::Repository;
use crate::error::AppError;
use crate::gsheets::{self, SheetsClient};
use crate::tracking;
use crate::wars::{self, WarContext, poster::PosterGenerator};

/// Commands registered in trusted guilds only.
const GUILD_ONLY_COMMANDS: [&str; 1] = ["dev"];

/// Shared data accessible in all commands
pub struct Data {
    pub db: Repository,
    pub clash: Arc<ClashClient>,
    pub config: Arc<Config>,
    pub sheets: Option<Arc<SheetsClient>>,
    pub posters: Option<Arc<PosterGenerator>>,
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("db", &self.db)
            .field("clash", &self.clash)
            .field("sheets", &self.sheets.is_some())
            .field("posters", &self.posters.is_some())
            .finish()
    }
}

impl Data {
    pub fn colors(&self) -> &EmbedColors {
        &self.config.settings.embed_colors
    }
}

pub type Context<'a> = poise::Context<'a, Data, AppError>;

pub fn create_framework(data: Data) -> poise::Framework<Data, AppError> {
    poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                commands::accounts(),
                commands::players(),
                commands::tracking(),
                commands::dev(),
            ],
            pre_command: |ctx| {
                Box::pin(async move {
                    info!(
                        command = %ctx.command().qualified_name,
                        user_id = %ctx.author().id,
                        guild_id = ?ctx.guild_id().map(|id| id.get()),
                        "🎮 Command invoked"
                    );
                    if let Err(e) = ctx.defer().await {
                        warn!(error = ?e, "🎮 ⚠️ Failed to defer command response");
                    }
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    report::handle_error(error).await;
                })
            },
            ..Default::default()
        })
        .setup(|ctx, ready, framework| {
            Box::pin(async move {
                register_commands(ctx, &framework.options().commands, &data.config).await?;
                ctx.set_activity(Some(ActivityData::listening("SlashCommands (/)")));
                spawn_jobs(ctx.http.clone(), &data);
                info!(
                    bot_name = %ready.user.name,
                    guild_count = ready.guilds.len(),
                    "🎮 Bot is ready"
                );
                Ok(data)
            })
        })
        .build()
}

/// Registers every command globally, except `/dev` which only exists in trusted guilds.
pub async fn register_commands(
    http: impl AsRef<Http>,
    commands: &[poise::Command<Data, AppError>],
    config: &Config,
) -> Result<(), AppError> {
    let http = http.as_ref();
    let global: Vec<_> = global_commands(commands).collect();
    let guild_only: Vec<_> = commands
        .iter()
        .filter(|c| GUILD_ONLY_COMMANDS.contains(&c.name.as_str()))
        .collect();

    let global_count = global.len();
    serenity::Command::set_global_commands(http, application_commands(global)).await?;

    for guild_id in &config.trusted_guild_ids {
        let guild = GuildId::new(*guild_id);
        if let Err(e) = guild
            .set_commands(http, application_commands(guild_only.iter().copied()))
            .await
        {
            warn!(error = ?e, guild_id, "🎮 ⚠️ Failed to register guild commands");
        }
    }

    info!(
        global_count,
        trusted_guilds = config.trusted_guild_ids.len(),
        "🎮 Commands registered"
    );
    Ok(())
}

/// Commands registered for every guild.
pub fn global_commands(
    commands: &[poise::Command<Data, AppError>],
) -> impl Iterator<Item = &poise::Command<Data, AppError>> {
    commands
        .iter()
        .filter(|c| !GUILD_ONLY_COMMANDS.contains(&c.name.as_str()))
}

fn application_commands<'a>(
    commands: impl IntoIterator<Item = &'a poise::Command<Data, AppError>>,
) -> Vec<serenity::CreateCommand> {
    commands
        .into_iter()
        .filter_map(|c| c.create_as_slash_command())
        .collect()
}

fn spawn_jobs(http: Arc<Http>, data: &Data) {
    tokio::spawn(tracking::run_tracking(
        data.db.clone(),
        data.clash.clone(),
        data.config.clone(),
    ));

    let war_ctx = Arc::new(WarContext {
        db: data.db.clone(),
        clash: data.clash.clone(),
        http,
        config: data.config.clone(),
        posters: data.posters.clone(),
    });
    tokio::spawn(wars::run_war_polling(war_ctx));

    if let (Some(sheets), Some(cfg)) = (&data.sheets, &data.config.sheets) {
        tokio::spawn(gsheets::run_export(
            data.db.clone(),
            sheets.clone(),
            cfg.export_sheet_id.clone(),
            cfg.export_interval_secs,
        ));
    }
}
