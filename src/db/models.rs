use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::Repository;
use crate::error::AppError;

#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub account_tag: String,
    pub account_name: String,
    pub tracking_active: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Account {
    /// Finds an account by tag or exact name.
    pub async fn resolve(db: &Repository, input: &str) -> Result<Self, AppError> {
        db.resolve_account(input).await
    }

    pub fn tracking_label(&self) -> &'static str {
        if self.tracking_active {
            "Active"
        } else {
            "Inactive"
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Player {
    pub player_id: i32,
    pub player_name: String,
    pub player_discord_id: Option<i64>,
}

impl Player {
    /// Finds a player by id or exact name.
    pub async fn resolve(db: &Repository, input: &str) -> Result<Self, AppError> {
        db.resolve_player(input).await
    }

    pub fn discord_id(&self) -> Option<u64> {
        self.player_discord_id.map(|id| id as u64)
    }
}

#[derive(Debug, Clone, Default, FromRow)]
pub struct AccountStats {
    pub entries: Option<i64>,
    pub first_tracked: Option<DateTime<Utc>>,
}

/// Builder base statistics of an account at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow)]
pub struct BuilderBaseStats {
    pub builder_hall_level: Option<i32>,
    pub builder_base_trophies: Option<i32>,
    pub best_builder_base_trophies: Option<i32>,
    pub builder_base_league: Option<i32>,
    pub best_builder_base_season_id: Option<String>,
    pub best_builder_base_season_rank: Option<i32>,
    pub best_builder_base_season_trophies: Option<i32>,
    pub previous_builder_base_season_id: Option<String>,
    pub previous_builder_base_season_rank: Option<i32>,
    pub previous_builder_base_season_trophies: Option<i32>,
    pub builder_base_trophies_achievement: Option<i32>,
    pub builder_base_halls_destroyed: Option<i32>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TrackingSnapshot {
    pub account_tag: String,
    pub first_observed: DateTime<Utc>,
    pub requested_at: DateTime<Utc>,
    pub times_observed: i32,
    pub messed_up_record: bool,
    #[sqlx(flatten)]
    pub stats: BuilderBaseStats,
}

/// One trophy change of an account, joined with the account that changed by
/// the opposite amount in the same minute, if any.
#[derive(Debug, Clone, FromRow)]
pub struct BattleRow {
    pub p_name: String,
    pub p_tag: String,
    pub requested_at: DateTime<Utc>,
    pub p_trophies: i32,
    pub p_trophies_diff: Option<i32>,
    pub s_name: Option<String>,
    pub s_tag: Option<String>,
    pub s_trophies: Option<i32>,
}

#[derive(Debug, Clone, FromRow)]
pub struct LeaderboardMatch {
    pub winner_tag: String,
    pub winner_name: String,
    pub winner_id: Option<i32>,
    pub loser_tag: String,
    pub loser_name: String,
    pub loser_id: Option<i32>,
    pub last_request: DateTime<Utc>,
    pub second_last_request: DateTime<Utc>,
    pub diff: i32,
}

#[derive(Debug, Clone, FromRow)]
pub struct TrackedClan {
    pub clantag: String,
    pub team_id: Option<i32>,
    pub state: Option<String>,
    pub api_state: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    pub next_check: DateTime<Utc>,
    pub match_id: Option<i32>,
}

#[derive(Debug, Clone, FromRow)]
pub struct MatchRecord {
    pub match_id: i32,
    pub season_id: Option<i32>,
    pub team_id1: Option<i32>,
    pub clantag_team1: String,
    pub team_id2: Option<i32>,
    pub clantag_team2: String,
    pub prep_start: DateTime<Utc>,
    pub active: bool,
    pub scored: bool,
}

/// A new match row, created the first time a war of interest is seen.
#[derive(Debug, Clone)]
pub struct NewMatch {
    pub season_id: Option<i32>,
    pub team_id1: Option<i32>,
    pub clantag_team1: String,
    pub team_id2: Option<i32>,
    pub clantag_team2: String,
    pub prep_start: DateTime<Utc>,
    pub prep_duration_secs: i32,
    pub war_duration_secs: i32,
}

#[derive(Debug, Clone)]
pub struct LineupClan {
    pub clan_tag: String,
    pub clan_name: String,
    pub team_id: Option<i32>,
    pub players: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackRecord {
    pub attack_order: i32,
    pub attacker_tag: String,
    pub attacker_th: i32,
    pub defender_tag: String,
    pub defender_th: i32,
    pub stars: i32,
    pub destruction: i32,
    pub fresh: bool,
    pub duration: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub clan_tag: String,
    pub stars: i32,
    pub destruction: f64,
    pub duration: f64,
    pub result: String,
    pub attacks_used: i32,
}

#[derive(Debug, Clone, FromRow)]
pub struct AccountExportRow {
    pub account_tag: String,
    pub account_name: String,
    pub player_name: Option<String>,
    pub tracking_active: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub builder_hall_level: Option<i32>,
    pub builder_base_trophies: Option<i32>,
    pub best_builder_base_trophies: Option<i32>,
    pub builder_base_halls_destroyed: Option<i32>,
    pub attacks: i64,
    pub three_stars: i64,
    pub one_stars: i64,
    pub defenses: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct TableColumn {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: String,
}
