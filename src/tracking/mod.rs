//! Periodic builder base snapshots of every tracked account.

pub mod delta;
pub mod leaderboard;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use tokio::time::interval;
use tracing::{Span, debug, error, info, instrument, warn};

use crate::clash::ClashClient;
use crate::clash::types::PlayerDto;
use crate::config::Config;
use crate::db::Repository;
use crate::db::models::BuilderBaseStats;
use crate::error::AppError;
use delta::parse_delta;

/// Player data is cached by the API for this many seconds.
const API_CACHE_SECS: i64 = 60;
const MIN_REQUEST_AGE_SECS: i64 = 5;

const HALLS_DESTROYED_ACHIEVEMENT: &str = "Un-Build It";
const TROPHIES_ACHIEVEMENT: &str = "Champion Builder";

#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error(transparent)]
    App(#[from] AppError),
    #[error("Account {tag} returned no builder base trophies")]
    MissingTrophies { tag: String },
}

/// What one tracking pass did with an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Stored,
    Unchanged,
}

pub fn stats_from_player(player: &PlayerDto) -> BuilderBaseStats {
    let seasons = player.legend_statistics.as_ref();
    let best = seasons.and_then(|s| s.best_builder_base_season.as_ref());
    let previous = seasons.and_then(|s| s.previous_builder_base_season.as_ref());

    BuilderBaseStats {
        builder_hall_level: player.builder_hall_level,
        builder_base_trophies: player.builder_base_trophies,
        best_builder_base_trophies: player.best_builder_base_trophies,
        builder_base_league: player.builder_base_league.as_ref().map(|l| l.id),
        best_builder_base_season_id: best.map(|s| s.id.clone()),
        best_builder_base_season_rank: best.and_then(|s| s.rank),
        best_builder_base_season_trophies: best.and_then(|s| s.trophies),
        previous_builder_base_season_id: previous.map(|s| s.id.clone()),
        previous_builder_base_season_rank: previous.and_then(|s| s.rank),
        previous_builder_base_season_trophies: previous.and_then(|s| s.trophies),
        builder_base_trophies_achievement: Some(player.achievement(TROPHIES_ACHIEVEMENT)),
        builder_base_halls_destroyed: Some(player.achievement(HALLS_DESTROYED_ACHIEVEMENT)),
    }
}

/// Estimates when the API actually produced the data, from the remaining cache lifetime.
pub fn requested_at(now: DateTime<Utc>, max_age: Option<u64>) -> DateTime<Utc> {
    let max_age = max_age.map_or(0, |secs| i64::try_from(secs).unwrap_or(i64::MAX));
    let age = API_CACHE_SECS
        .saturating_sub(max_age)
        .max(MIN_REQUEST_AGE_SECS);
    now - TimeDelta::seconds(age)
}

pub async fn run_tracking(
    db: Repository,
    clash: Arc<ClashClient>,
    config: Arc<Config>,
) {
    let interval_secs = config.tracking_interval_secs;
    let mut interval = interval(Duration::from_secs(interval_secs));

    info!(interval_secs, "📈 Account tracking started");

    loop {
        interval.tick().await;

        if let Err(e) = track_accounts(&db, &clash, &config).await {
            error!(error = ?e, "📈 ❌ Tracking cycle failed");
        }

        if let Err(e) = leaderboard::run_cycle(&db, &clash, &config).await {
            error!(error = ?e, "📈 ❌ Leaderboard processing failed");
        }
    }
}

#[instrument(skip_all, fields(account_count))]
async fn track_accounts(
    db: &Repository,
    clash: &ClashClient,
    config: &Config,
) -> Result<(), AppError> {
    let accounts = db.tracked_accounts().await?;

    if accounts.is_empty() {
        debug!("📈 No accounts tracked, skipping cycle");
        return Ok(());
    }

    Span::current().record("account_count", accounts.len());
    debug!(count = accounts.len(), "📈 Tracking {} account(s)", accounts.len());

    let concurrency = config.settings.tracking.concurrency.max(1);
    stream::iter(accounts)
        .for_each_concurrent(concurrency, |account| async move {
            if let Err(e) = track_account(db, clash, &account.account_tag).await {
                warn!(
                    error = ?e,
                    account_tag = %account.account_tag,
                    "📈 ⚠️ Failed to track account"
                );
            }
        })
        .await;

    Ok(())
}

#[instrument(skip(db, clash))]
pub async fn track_account(
    db: &Repository,
    clash: &ClashClient,
    account_tag: &str,
) -> Result<TrackOutcome, TrackingError> {
    let fetched = clash.get_player(account_tag).await?;
    let player = fetched.data;
    let requested_at = requested_at(Utc::now(), fetched.max_age);

    let trophies = player
        .builder_base_trophies
        .ok_or_else(|| TrackingError::MissingTrophies {
            tag: account_tag.to_string(),
        })?;
    db.insert_trophy_snapshot(account_tag, &player.name, requested_at, trophies)
        .await?;

    let stats = stats_from_player(&player);
    let latest = db.latest_snapshot(account_tag).await?;
    let delta = parse_delta(latest.as_ref().map(|s| &s.stats), &stats);

    let outcome = match latest {
        Some(previous) if !delta.is_significant() => {
            db.bump_snapshot(account_tag, previous.requested_at, requested_at)
                .await?;
            TrackOutcome::Unchanged
        }
        _ => {
            if delta.messed_up_record {
                warn!(account_tag, "📈 ⚠️ Stored record is ahead of the API, flagging snapshot");
            }
            db.insert_snapshot(account_tag, requested_at, &stats, delta.messed_up_record)
                .await?;
            debug!(
                trophies_diff = delta.get("builder_base_trophies"),
                "📈 Stored new snapshot"
            );
            TrackOutcome::Stored
        }
    };

    db.touch_account(account_tag, &player.name, requested_at)
        .await?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn requested_at_uses_remaining_cache_lifetime() {
        assert_eq!(requested_at(now(), Some(20)), now() - TimeDelta::seconds(40));
        assert_eq!(requested_at(now(), None), now() - TimeDelta::seconds(60));
    }

    #[test]
    fn requested_at_is_at_least_a_few_seconds_old() {
        assert_eq!(requested_at(now(), Some(58)), now() - TimeDelta::seconds(5));
        assert_eq!(requested_at(now(), Some(600)), now() - TimeDelta::seconds(5));
    }

    #[test]
    fn stats_are_read_from_player() {
        let player: PlayerDto = serde_json::from_value(json!({
            "tag": "#2PP",
            "name": "Builder",
            "builderHallLevel": 10,
            "builderBaseTrophies": 5123,
            "bestBuilderBaseTrophies": 5400,
            "builderBaseLeague": {"id": 44000036, "name": "Emerald League I"},
            "legendStatistics": {
                "previousBuilderBaseSeason": {"id": "2024-04", "rank": 812, "trophies": 5300}
            },
            "achievements": [
                {"name": "Un-Build It", "value": 12000},
                {"name": "Champion Builder", "value": 5400}
            ]
        }))
        .unwrap();

        let stats = stats_from_player(&player);
        assert_eq!(stats.builder_base_trophies, Some(5123));
        assert_eq!(stats.builder_base_league, Some(44000036));
        assert_eq!(stats.previous_builder_base_season_id.as_deref(), Some("2024-04"));
        assert_eq!(stats.previous_builder_base_season_rank, Some(812));
        assert_eq!(stats.best_builder_base_season_id, None);
        assert_eq!(stats.builder_base_halls_destroyed, Some(12000));
        assert_eq!(stats.builder_base_trophies_achievement, Some(5400));
    }

    #[tokio::test]
    #[ignore = "Postgres required"]
    async fn tracking_twice_bumps_the_snapshot() {
        use crate::clash::client::tests::test_client;
        use httpmock::prelude::*;

        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = crate::db::connect(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        let db = Repository::new(pool);
        let _ = db.insert_account("#TRACK1", "Tracked", true).await;

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path_contains("/players/");
                then.status(200)
                    .header("cache-control", "public max-age=30")
                    .json_body(json!({
                        "tag": "#TRACK1",
                        "name": "Tracked",
                        "builderHallLevel": 9,
                        "builderBaseTrophies": 4000,
                        "bestBuilderBaseTrophies": 4100
                    }));
            })
            .await;
        let clash = test_client(&server.base_url());

        track_account(&db, &clash, "#TRACK1").await.unwrap();
        let second = track_account(&db, &clash, "#TRACK1").await.unwrap();
        assert_eq!(second, TrackOutcome::Unchanged);
    }
}
