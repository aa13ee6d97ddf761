//! Polling of tracked clans' current wars into matches, attacks and results.

pub mod outcome;
pub mod poster;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use poise::serenity_prelude::{ChannelId, CreateAttachment, CreateMessage, Http};
use tokio::time::interval;
use tracing::{Span, debug, error, info, instrument, warn};

use crate::clash::ClashClient;
use crate::clash::types::{ClanWarDto, WarClanDto};
use crate::config::Config;
use crate::db::Repository;
use crate::db::models::{LineupClan, MatchRecord, NewMatch, TrackedClan};
use crate::error::AppError;
use outcome::{attack_records, war_outcome};
use poster::PosterGenerator;
use state::{WarState, WarTimes, is_of_interest, next_check};

/// Clans claimed per polling cycle.
const CLAIM_LIMIT: i64 = 50;
/// How long a claimed clan is hidden from other pollers.
const CLAIM_LEASE_SECS: f64 = 300.0;

#[derive(Debug, thiserror::Error)]
enum WarPollError {
    #[error(transparent)]
    App(#[from] AppError),
    #[error("War of {clan_tag} has no preparation start")]
    MissingTimes { clan_tag: String },
}

/// Everything a war check needs besides the clan itself.
pub struct WarContext {
    pub db: Repository,
    pub clash: Arc<ClashClient>,
    pub http: Arc<Http>,
    pub config: Arc<Config>,
    pub posters: Option<Arc<PosterGenerator>>,
}

/// What a single check decided for a clan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub state: WarState,
    pub match_id: Option<i32>,
    pub next_check: DateTime<Utc>,
}

pub async fn run_war_polling(ctx: Arc<WarContext>) {
    let interval_secs = ctx.config.war_poll_interval_secs;
    let mut interval = interval(Duration::from_secs(interval_secs));

    info!(interval_secs, "⚔️ War poller started");

    loop {
        interval.tick().await;

        if let Err(e) = poll_clans(&ctx).await {
            error!(error = ?e, "⚔️ ❌ War polling cycle failed");
        }
    }
}

#[instrument(skip_all, fields(clan_count))]
async fn poll_clans(ctx: &WarContext) -> Result<(), AppError> {
    let synced = ctx.db.sync_tracked_clans().await?;
    if synced > 0 {
        debug!(synced, "⚔️ Tracked clans synced with active teams");
    }

    let clans = ctx.db.claim_due_clans(CLAIM_LIMIT, CLAIM_LEASE_SECS).await?;
    if clans.is_empty() {
        return Ok(());
    }
    Span::current().record("clan_count", clans.len());

    for clan in clans {
        if let Err(e) = check_clan(ctx, &clan).await {
            warn!(error = ?e, clan_tag = %clan.clantag, "⚔️ ⚠️ Failed to check clan");
        }
    }
    Ok(())
}

/// Polls the clan's current war and records it when it matches the war filter.
#[instrument(skip(ctx, clan), fields(clan_tag = %clan.clantag))]
pub async fn check_clan(ctx: &WarContext, clan: &TrackedClan) -> Result<CheckReport, AppError> {
    let now = Utc::now();
    let team_id = ctx.db.team_for_clan(&clan.clantag).await?.or(clan.team_id);

    let war = match ctx.clash.get_current_war(&clan.clantag).await {
        Ok(fetched) => Some(fetched.data),
        Err(AppError::PrivateWarLog) => None,
        Err(e) => {
            warn!(error = ?e, "⚔️ ⚠️ Current war unavailable");
            let report = CheckReport {
                state: WarState::ApiError,
                match_id: clan.match_id,
                next_check: next_check(WarState::ApiError, None, false, now),
            };
            store_report(ctx, clan, team_id, &report, now).await?;
            return Ok(report);
        }
    };

    let report = match &war {
        None => CheckReport {
            state: WarState::PrivateLog,
            match_id: None,
            next_check: next_check(WarState::PrivateLog, None, false, now),
        },
        Some(war) => {
            let state = WarState::of_war(war, now);
            let times = WarTimes::from_war(war);
            let of_interest = is_of_interest(war, &ctx.config.settings.war_filter);

            let match_id = if of_interest {
                match record_war(ctx, war, team_id, state).await {
                    Ok(id) => Some(id),
                    Err(WarPollError::App(e)) => return Err(e),
                    Err(e) => {
                        warn!(error = %e, "⚔️ ⚠️ War could not be recorded");
                        None
                    }
                }
            } else {
                None
            };

            CheckReport {
                state,
                match_id,
                next_check: next_check(state, times.as_ref(), of_interest, now),
            }
        }
    };

    store_report(ctx, clan, team_id, &report, now).await?;

    if let Some(war) = &war
        && report.state.is_running()
    {
        ctx.db
            .set_clan_match(&war.opponent.tag, report.match_id, report.state.as_str())
            .await?;
    }

    debug!(state = %report.state, match_id = report.match_id, next_check = %report.next_check, "⚔️ Clan checked");
    Ok(report)
}

async fn store_report(
    ctx: &WarContext,
    clan: &TrackedClan,
    team_id: Option<i32>,
    report: &CheckReport,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    ctx.db
        .update_tracked_clan(
            &clan.clantag,
            team_id,
            report.state.as_str(),
            now,
            report.next_check,
            report.match_id,
        )
        .await
}

/// Stores the war as a match with its attacks and results. Returns the match id.
async fn record_war(
    ctx: &WarContext,
    war: &ClanWarDto,
    team_id: Option<i32>,
    state: WarState,
) -> Result<i32, WarPollError> {
    let times = WarTimes::from_war(war).ok_or_else(|| WarPollError::MissingTimes {
        clan_tag: war.clan.tag.clone(),
    })?;

    let record = match ctx
        .db
        .find_match(&war.clan.tag, &war.opponent.tag, times.preparation_start)
        .await?
    {
        Some(record) => record,
        None => create_match(ctx, war, team_id, &times).await?,
    };

    let inserted = ctx
        .db
        .insert_attacks(record.match_id, &attack_records(war))
        .await?;
    ctx.db
        .save_results(record.match_id, &war_outcome(war))
        .await?;
    if inserted > 0 {
        debug!(match_id = record.match_id, inserted, "⚔️ New attacks stored");
    }

    if state == WarState::WarEnded && !record.scored {
        load_hit_stats(ctx, record.match_id, war).await?;
    }

    Ok(record.match_id)
}

async fn create_match(
    ctx: &WarContext,
    war: &ClanWarDto,
    team_id: Option<i32>,
    times: &WarTimes,
) -> Result<MatchRecord, AppError> {
    let season_id = ctx.db.current_season(Utc::now()).await?;
    let opponent_team = ctx.db.team_for_clan(&war.opponent.tag).await?;

    let new = NewMatch {
        season_id,
        team_id1: team_id,
        clantag_team1: war.clan.tag.clone(),
        team_id2: opponent_team,
        clantag_team2: war.opponent.tag.clone(),
        prep_start: times.preparation_start,
        prep_duration_secs: (times.start - times.preparation_start).num_seconds() as i32,
        war_duration_secs: (times.end - times.start).num_seconds() as i32,
    };
    let lineups = [
        lineup(&war.clan, team_id),
        lineup(&war.opponent, opponent_team),
    ];
    let match_id = ctx.db.create_match(&new, &lineups).await?;
    info!(match_id, opponent = %war.opponent.tag, "⚔️ ✅ New match created");

    Ok(MatchRecord {
        match_id,
        season_id,
        team_id1: new.team_id1,
        clantag_team1: new.clantag_team1,
        team_id2: new.team_id2,
        clantag_team2: new.clantag_team2,
        prep_start: new.prep_start,
        active: true,
        scored: false,
    })
}

fn lineup(clan: &WarClanDto, team_id: Option<i32>) -> LineupClan {
    LineupClan {
        clan_tag: clan.tag.clone(),
        clan_name: clan.name.clone(),
        team_id,
        players: clan
            .members
            .iter()
            .map(|m| (m.tag.clone(), m.name.clone()))
            .collect(),
    }
}

/// Marks a finished match as scored and posts its result poster.
async fn load_hit_stats(ctx: &WarContext, match_id: i32, war: &ClanWarDto) -> Result<(), AppError> {
    if !ctx.db.mark_scored(match_id).await? {
        return Ok(());
    }
    let record = ctx.db.get_match(match_id).await?;
    info!(
        match_id,
        team1 = %record.clantag_team1,
        team2 = %record.clantag_team2,
        season_id = record.season_id,
        "⚔️ ✅ Match scored"
    );

    let (Some(channel_id), Some(posters)) = (ctx.config.war_results_channel_id, &ctx.posters) else {
        return Ok(());
    };

    let image = match posters.generate(match_id, war).await {
        Ok(data) => data,
        Err(e) => {
            error!(error = ?e, "🖼️ ❌ Failed to generate war poster");
            return Err(e);
        }
    };

    let attachment = CreateAttachment::bytes(image, format!("match_{match_id}.png"));
    let message = CreateMessage::new().add_file(attachment);
    if let Err(e) = ChannelId::new(channel_id)
        .send_message(&ctx.http, message)
        .await
    {
        error!(error = ?e, channel_id, "🎮 ❌ Failed to send war poster");
    }
    Ok(())
}
