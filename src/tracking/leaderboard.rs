//! Builder base leaderboard storage and the attack log posted after every tracking cycle.

use chrono::Utc;
use poise::serenity_prelude::{CreateEmbed, ExecuteWebhook, Http, Webhook};
use tracing::{debug, info, instrument, warn};

use crate::clash::ClashClient;
use crate::config::{Config, EmbedColors};
use crate::db::Repository;
use crate::db::models::LeaderboardMatch;
use crate::discord::embeds::escape_markdown;
use crate::error::AppError;
use crate::time::{TimestampStyle, to_discord};

const MAX_FIELDS: usize = 24;
const EMBEDS_PER_MESSAGE: usize = 5;

/// All losers matched against one winner in the last cycle.
#[derive(Debug, Clone)]
pub struct WinnerGroup {
    pub label: String,
    pub winner_id: Option<i32>,
    pub matches: Vec<LeaderboardMatch>,
}

/// A rendered attack log entry, converted into a Discord embed before sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEmbed {
    pub title: String,
    pub description: Option<String>,
    pub fields: Vec<(String, String)>,
    pub same_player: bool,
}

pub async fn run_cycle(db: &Repository, clash: &ClashClient, config: &Config) -> Result<(), AppError> {
    if config.leaderboard_tracking {
        store_rankings(db, clash, &config.settings.tracking.leaderboard_location).await?;
    }
    post_process_leaderboard(db, config).await
}

#[instrument(skip(db, clash))]
async fn store_rankings(db: &Repository, clash: &ClashClient, location: &str) -> Result<(), AppError> {
    let rankings = clash.get_builder_base_rankings(location).await?;
    let inserted = db.insert_leaderboard(&rankings.data.items, Utc::now()).await?;
    debug!(inserted, "📈 Stored builder base rankings");
    Ok(())
}

/// Matches winners and losers of the last cycle and posts them to the leaderboard log webhook.
#[instrument(skip_all, fields(match_count))]
pub async fn post_process_leaderboard(db: &Repository, config: &Config) -> Result<(), AppError> {
    let matches = db.leaderboard_matches().await?;
    if matches.is_empty() {
        return Ok(());
    }
    tracing::Span::current().record("match_count", matches.len());

    let groups = group_by_winner(matches);

    let mut player_names = Vec::new();
    for group in &groups {
        for m in group.matches.iter().filter(|m| is_same_player(m)) {
            if let Some(id) = m.winner_id {
                player_names.push((id, db.get_player(id).await?.player_name));
            }
        }
    }
    let lookup = |id: i32| {
        player_names
            .iter()
            .find(|(pid, _)| *pid == id)
            .map(|(_, name)| name.clone())
    };

    let embeds = build_embeds(&groups, lookup);
    info!(
        winners = groups.len(),
        embeds = embeds.len(),
        "📈 Leaderboard matches processed"
    );

    let Some(url) = &config.leaderboard_webhook_url else {
        return Ok(());
    };
    send_embeds(url, &embeds, &config.settings.embed_colors).await
}

fn is_same_player(m: &LeaderboardMatch) -> bool {
    matches!((m.winner_id, m.loser_id), (Some(w), Some(l)) if w == l)
}

/// Groups matches per winner, keeping the order of the query.
pub fn group_by_winner(matches: Vec<LeaderboardMatch>) -> Vec<WinnerGroup> {
    let mut groups: Vec<WinnerGroup> = Vec::new();
    for m in matches {
        let label = format!("{} ({})", escape_markdown(&m.winner_name), m.winner_tag);
        match groups.iter_mut().find(|g| g.label == label) {
            Some(group) => group.matches.push(m),
            None => groups.push(WinnerGroup {
                label,
                winner_id: m.winner_id,
                matches: vec![m],
            }),
        }
    }
    groups
}

pub fn build_embeds(groups: &[WinnerGroup], player_name: impl Fn(i32) -> Option<String>) -> Vec<LogEmbed> {
    let mut embeds = Vec::new();

    for group in groups {
        let title = match group.winner_id {
            Some(id) => format!("{} ID {id}", group.label),
            None => group.label.clone(),
        };
        let new_page = || LogEmbed {
            title: title.clone(),
            description: None,
            fields: Vec::new(),
            same_player: false,
        };
        let mut page = new_page();

        for m in &group.matches {
            let loser = format!("{} ({})", escape_markdown(&m.loser_name), m.loser_tag);
            let window = format!(
                "Attack happened between {} and {}.",
                to_discord(m.second_last_request, TimestampStyle::Combined),
                to_discord(m.last_request, TimestampStyle::Combined)
            );

            if is_same_player(m) {
                let owner = m
                    .winner_id
                    .map(|id| {
                        let name = player_name(id).unwrap_or_default();
                        format!("{} ({id})", escape_markdown(&name))
                    })
                    .unwrap_or_default();
                embeds.push(LogEmbed {
                    title: title.clone(),
                    description: Some(format!(
                        "vs {loser}\nBoth accounts belong to the same player {owner}.\n{window}"
                    )),
                    fields: Vec::new(),
                    same_player: true,
                });
                continue;
            }

            if page.fields.len() == MAX_FIELDS {
                embeds.push(std::mem::replace(&mut page, new_page()));
            }
            let name = match m.loser_id {
                Some(id) => format!("vs {loser} ID {id}"),
                None => format!("vs {loser}"),
            };
            page.fields
                .push((name, format!("{} trophies\n{window}", m.diff)));
        }

        if !page.fields.is_empty() {
            embeds.push(page);
        }
    }
    embeds
}

impl LogEmbed {
    fn to_embed(&self, colors: &EmbedColors) -> CreateEmbed {
        let color = if self.same_player {
            colors.error
        } else {
            colors.warning
        };
        let mut embed = CreateEmbed::new().title(&self.title).color(color);
        if let Some(description) = &self.description {
            embed = embed.description(description);
        }
        for (name, value) in &self.fields {
            embed = embed.field(name, value, false);
        }
        embed
    }
}

async fn send_embeds(url: &str, embeds: &[LogEmbed], colors: &EmbedColors) -> Result<(), AppError> {
    let http = Http::new("");
    let webhook = Webhook::from_url(&http, url).await?;

    for batch in embeds.chunks(EMBEDS_PER_MESSAGE) {
        let message =
            ExecuteWebhook::new().embeds(batch.iter().map(|e| e.to_embed(colors)).collect());
        if let Err(e) = webhook.execute(&http, false, message).await {
            warn!(error = ?e, "📈 ⚠️ Failed to send leaderboard log");
        }
    }
    Ok(())
}
