use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::models::{
    Account, AccountExportRow, AccountStats, AttackRecord, BattleRow, BuilderBaseStats,
    LeaderboardMatch, LineupClan, MatchRecord, MatchResult, NewMatch, Player, TableColumn,
    TrackedClan, TrackingSnapshot,
};
use crate::clash::tag;
use crate::clash::types::RankedPlayer;
use crate::error::AppError;

const ACCOUNT_COLUMNS: &str = "account_tag, account_name, tracking_active, last_updated";
const PLAYER_COLUMNS: &str = "player_id, player_name, player_discord_id";
const TRACKED_CLAN_COLUMNS: &str =
    "clantag, team_id, state, api_state, last_checked, next_check, match_id";

const SNAPSHOT_COLUMN_NAMES: [&str; 17] = [
    "account_tag",
    "first_observed",
    "requested_at",
    "times_observed",
    "messed_up_record",
    "builder_hall_level",
    "builder_base_trophies",
    "best_builder_base_trophies",
    "builder_base_league",
    "best_builder_base_season_id",
    "best_builder_base_season_rank",
    "best_builder_base_season_trophies",
    "previous_builder_base_season_id",
    "previous_builder_base_season_rank",
    "previous_builder_base_season_trophies",
    "builder_base_trophies_achievement",
    "builder_base_halls_destroyed",
];

fn prefixed_columns(columns: &str, alias: Option<&str>) -> String {
    let prefix = alias.map(|a| format!("{a}.")).unwrap_or_default();
    columns
        .split(',')
        .map(|col| format!("{prefix}{}", col.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn snapshot_columns() -> String {
    SNAPSHOT_COLUMN_NAMES.join(", ")
}

/// Filter for the battle log. `opponent` restricts it to battles against one account.
#[derive(Debug, Clone)]
pub struct BattleQuery<'a> {
    pub account_tag: &'a str,
    pub after: DateTime<Utc>,
    pub before: DateTime<Utc>,
    pub limit: i64,
    pub opponent: Option<&'a str>,
}

#[derive(Clone, Debug)]
pub struct Repository {
    pool: PgPool,
}

impl Repository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // === Account operations ===

    pub async fn find_account(&self, account_tag: &str) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_tag = $1"
        ))
        .bind(account_tag)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    pub async fn accounts_by_name(&self, name: &str) -> Result<Vec<Account>, AppError> {
        let accounts = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE lower(account_name) = lower($1) ORDER BY account_tag"
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    /// Resolves user input to an account, by tag first and then by exact name.
    pub async fn resolve_account(&self, input: &str) -> Result<Account, AppError> {
        let input = input.trim();
        if tag::looks_like_tag(input)
            && let Some(account) = self.find_account(&tag::normalize(input)).await?
        {
            return Ok(account);
        }

        let mut by_name = self.accounts_by_name(input).await?;
        match by_name.len() {
            0 => Err(AppError::Conversion(format!(
                "No account for `{input}` found. Please check your input."
            ))),
            1 => Ok(by_name.remove(0)),
            _ => Err(AppError::Conversion(format!(
                "Multiple accounts are named `{input}`: {}. Please use the tag instead.",
                by_name
                    .iter()
                    .map(|a| a.account_tag.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    pub async fn insert_account(
        &self,
        account_tag: &str,
        account_name: &str,
        tracking_active: bool,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO accounts (account_tag, account_name, tracking_active) VALUES ($1, $2, $3)",
        )
        .bind(account_tag)
        .bind(account_name)
        .bind(tracking_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_account_tracking(
        &self,
        account_tag: &str,
        tracking_active: bool,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE accounts SET tracking_active = $1 WHERE account_tag = $2")
            .bind(tracking_active)
            .bind(account_tag)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_accounts(
        &self,
        tracking_active: Option<bool>,
        search: &str,
    ) -> Result<Vec<Account>, AppError> {
        let accounts = sqlx::query_as::<_, Account>(&format!(
            r#"
            SELECT {ACCOUNT_COLUMNS} FROM accounts
            WHERE ($1::bool IS NULL OR tracking_active = $1)
              AND ($2::text = '' OR account_name ILIKE '%' || $2 || '%' OR account_tag ILIKE '%' || $2 || '%')
            ORDER BY account_name
            "#
        ))
        .bind(tracking_active)
        .bind(search)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    pub async fn account_stats(&self, account_tag: &str) -> Result<AccountStats, AppError> {
        let stats = sqlx::query_as::<_, AccountStats>(
            r#"
            SELECT sum(times_observed)::bigint AS entries, min(first_observed) AS first_tracked
            FROM account_tracking
            WHERE account_tag = $1
            "#,
        )
        .bind(account_tag)
        .fetch_optional(&self.pool)
        .await?;
        Ok(stats.unwrap_or_default())
    }

    pub async fn account_player(&self, account_tag: &str) -> Result<Option<Player>, AppError> {
        let columns = prefixed_columns(PLAYER_COLUMNS, Some("p"));
        let player = sqlx::query_as::<_, Player>(&format!(
            r#"
            SELECT {columns}
            FROM players p
            INNER JOIN player_accounts pa ON pa.player_id = p.player_id
            WHERE pa.account_tag = $1
            "#
        ))
        .bind(account_tag)
        .fetch_optional(&self.pool)
        .await?;
        Ok(player)
    }

    /// Fuzzy account search for autocomplete, optionally restricted to one player.
    pub async fn search_accounts(
        &self,
        input: &str,
        player_id: Option<i32>,
    ) -> Result<Vec<Account>, AppError> {
        let columns = prefixed_columns(ACCOUNT_COLUMNS, Some("a"));
        let accounts = sqlx::query_as::<_, Account>(&format!(
            r#"
            SELECT {columns}
            FROM accounts a
            LEFT JOIN player_accounts pa ON pa.account_tag = a.account_tag
            WHERE ($2::int IS NULL OR pa.player_id = $2)
            ORDER BY greatest(similarity(a.account_name, $1), similarity(a.account_tag, $1)) DESC,
                     least(levenshtein(lower(left(a.account_name, 255)), lower(left($1, 255))),
                           levenshtein(lower(a.account_tag), lower(left($1, 255)))),
                     a.account_name
            LIMIT 25
            "#
        ))
        .bind(input)
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    pub async fn tracked_accounts(&self) -> Result<Vec<Account>, AppError> {
        let accounts = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE tracking_active ORDER BY account_tag"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    pub async fn touch_account(
        &self,
        account_tag: &str,
        account_name: &str,
        requested_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE accounts SET last_updated = $2, account_name = $3 WHERE account_tag = $1",
        )
        .bind(account_tag)
        .bind(requested_at)
        .bind(account_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // === Player operations ===

    pub async fn get_player(&self, player_id: i32) -> Result<Player, AppError> {
        let query = format!("SELECT {PLAYER_COLUMNS} FROM players WHERE player_id = $1");
        sqlx::query_as::<_, Player>(&query)
            .bind(player_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(&query, &[&player_id]))
    }

    pub async fn players_by_name(&self, name: &str) -> Result<Vec<Player>, AppError> {
        let players = sqlx::query_as::<_, Player>(&format!(
            "SELECT {PLAYER_COLUMNS} FROM players WHERE lower(player_name) = lower($1) ORDER BY player_id"
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(players)
    }

    /// Resolves user input to a player, by id first and then by exact name.
    pub async fn resolve_player(&self, input: &str) -> Result<Player, AppError> {
        let input = input.trim();
        if let Ok(player_id) = input.trim_start_matches('#').parse::<i32>() {
            match self.get_player(player_id).await {
                Ok(player) => return Ok(player),
                Err(e) if !e.is_not_found() => return Err(e),
                Err(_) => {}
            }
        }

        let mut by_name = self.players_by_name(input).await?;
        match by_name.len() {
            0 => Err(AppError::Conversion(format!(
                "No player for `{input}` found. Please check your input."
            ))),
            1 => Ok(by_name.remove(0)),
            _ => Err(AppError::Conversion(format!(
                "Multiple players are named `{input}`: {}. Please use the id instead.",
                by_name
                    .iter()
                    .map(|p| format!("#{}", p.player_id))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    pub async fn players_by_discord(&self, discord_id: u64) -> Result<Vec<Player>, AppError> {
        let players = sqlx::query_as::<_, Player>(&format!(
            "SELECT {PLAYER_COLUMNS} FROM players WHERE player_discord_id = $1 ORDER BY player_id"
        ))
        .bind(discord_id as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(players)
    }

    pub async fn players_like(&self, name: &str) -> Result<Vec<Player>, AppError> {
        let players = sqlx::query_as::<_, Player>(&format!(
            "SELECT {PLAYER_COLUMNS} FROM players WHERE player_name ILIKE '%' || $1 || '%' ORDER BY player_name"
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(players)
    }

    pub async fn insert_player(&self, name: &str, discord_id: Option<u64>) -> Result<i32, AppError> {
        let player_id = sqlx::query_scalar::<_, i32>(
            "INSERT INTO players (player_name, player_discord_id) VALUES ($1, $2) RETURNING player_id",
        )
        .bind(name)
        .bind(discord_id.map(|id| id as i64))
        .fetch_one(&self.pool)
        .await?;
        Ok(player_id)
    }

    pub async fn set_player_discord(
        &self,
        player_id: i32,
        discord_id: Option<u64>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE players SET player_discord_id = $1 WHERE player_id = $2")
            .bind(discord_id.map(|id| id as i64))
            .bind(player_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_players(
        &self,
        has_discord: Option<bool>,
        search: &str,
    ) -> Result<Vec<Player>, AppError> {
        let players = sqlx::query_as::<_, Player>(&format!(
            r#"
            SELECT {PLAYER_COLUMNS} FROM players
            WHERE ($1::bool IS NULL OR (player_discord_id IS NOT NULL) = $1)
              AND player_name ILIKE '%' || $2 || '%'
            ORDER BY player_name
            "#
        ))
        .bind(has_discord)
        .bind(search)
        .fetch_all(&self.pool)
        .await?;
        Ok(players)
    }

    pub async fn player_accounts(
        &self,
        player_id: i32,
        tracking_active: Option<bool>,
    ) -> Result<Vec<Account>, AppError> {
        let columns = prefixed_columns(ACCOUNT_COLUMNS, Some("a"));
        let accounts = sqlx::query_as::<_, Account>(&format!(
            r#"
            SELECT {columns}
            FROM accounts a
            INNER JOIN player_accounts pa ON pa.account_tag = a.account_tag
            WHERE pa.player_id = $1 AND ($2::bool IS NULL OR a.tracking_active = $2)
            ORDER BY a.account_name
            "#
        ))
        .bind(player_id)
        .bind(tracking_active)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    pub async fn add_account_to_player(
        &self,
        player_id: i32,
        account_tag: &str,
    ) -> Result<(), AppError> {
        sqlx::query("INSERT INTO player_accounts (player_id, account_tag) VALUES ($1, $2)")
            .bind(player_id)
            .bind(account_tag)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_account_from_player(
        &self,
        player_id: i32,
        account_tag: &str,
    ) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM player_accounts WHERE player_id = $1 AND account_tag = $2")
                .bind(player_id)
                .bind(account_tag)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fuzzy player search for autocomplete, optionally restricted to the owner of an account.
    pub async fn search_players(
        &self,
        input: &str,
        account_tag: Option<&str>,
    ) -> Result<Vec<Player>, AppError> {
        let columns = prefixed_columns(PLAYER_COLUMNS, Some("p"));
        let players = sqlx::query_as::<_, Player>(&format!(
            r#"
            SELECT {columns}
            FROM players p
            WHERE ($2::text IS NULL OR EXISTS (
                SELECT 1 FROM player_accounts pa
                WHERE pa.player_id = p.player_id AND pa.account_tag = $2
            ))
            ORDER BY similarity(p.player_name, $1) DESC,
                     levenshtein(lower(left(p.player_name, 255)), lower(left($1, 255))),
                     p.player_name
            LIMIT 25
            "#
        ))
        .bind(input)
        .bind(account_tag)
        .fetch_all(&self.pool)
        .await?;
        Ok(players)
    }

    // === Tracking operations ===

    pub async fn latest_snapshot(
        &self,
        account_tag: &str,
    ) -> Result<Option<TrackingSnapshot>, AppError> {
        let columns = snapshot_columns();
        let snapshot = sqlx::query_as::<_, TrackingSnapshot>(&format!(
            "SELECT {columns} FROM account_tracking WHERE account_tag = $1 ORDER BY requested_at DESC LIMIT 1"
        ))
        .bind(account_tag)
        .fetch_optional(&self.pool)
        .await?;
        Ok(snapshot)
    }

    /// Stores the minute-truncated trophy count. Returns false if the minute was already recorded.
    pub async fn insert_trophy_snapshot(
        &self,
        account_tag: &str,
        account_name: &str,
        requested_at: DateTime<Utc>,
        trophies: i32,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO account_tracking_v2 (account_tag, account_name, requested_at, builder_base_trophies)
            VALUES ($1, $2, date_trunc('minute', $3::timestamptz), $4)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(account_tag)
        .bind(account_name)
        .bind(requested_at)
        .bind(trophies)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_snapshot(
        &self,
        account_tag: &str,
        requested_at: DateTime<Utc>,
        stats: &BuilderBaseStats,
        messed_up_record: bool,
    ) -> Result<(), AppError> {
        let columns = snapshot_columns();
        let placeholders = (1..=SNAPSHOT_COLUMN_NAMES.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(&format!(
            "INSERT INTO account_tracking ({columns}) VALUES ({placeholders}) ON CONFLICT DO NOTHING"
        ))
        .bind(account_tag)
        .bind(requested_at)
        .bind(requested_at)
        .bind(1_i32)
        .bind(messed_up_record)
        .bind(stats.builder_hall_level)
        .bind(stats.builder_base_trophies)
        .bind(stats.best_builder_base_trophies)
        .bind(stats.builder_base_league)
        .bind(&stats.best_builder_base_season_id)
        .bind(stats.best_builder_base_season_rank)
        .bind(stats.best_builder_base_season_trophies)
        .bind(&stats.previous_builder_base_season_id)
        .bind(stats.previous_builder_base_season_rank)
        .bind(stats.previous_builder_base_season_trophies)
        .bind(stats.builder_base_trophies_achievement)
        .bind(stats.builder_base_halls_destroyed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marks the latest snapshot as observed once more, without storing a new row.
    pub async fn bump_snapshot(
        &self,
        account_tag: &str,
        previous_requested_at: DateTime<Utc>,
        requested_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE account_tracking
            SET requested_at = $3, times_observed = times_observed + 1
            WHERE account_tag = $1 AND requested_at = $2
            "#,
        )
        .bind(account_tag)
        .bind(previous_requested_at)
        .bind(requested_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Trophy changes of an account joined with the account that changed by the
    /// opposite amount in the same minute.
    pub async fn battle_log(&self, query: &BattleQuery<'_>) -> Result<Vec<BattleRow>, AppError> {
        let battles = sqlx::query_as::<_, BattleRow>(
            r#"
            WITH data AS (
                SELECT account_tag, account_name, date_trunc('minute', requested_at) AS requested_at,
                       builder_base_trophies_new AS trophies_new, trophies_difference AS trophies_diff
                FROM account_tracking_v3
                WHERE requested_at >= $2 AND requested_at < $3
            )
            SELECT w1.account_name AS p_name, w1.account_tag AS p_tag, w1.requested_at,
                   w1.trophies_new AS p_trophies, w1.trophies_diff AS p_trophies_diff,
                   w2.account_name AS s_name, w2.account_tag AS s_tag, w2.trophies_new AS s_trophies
            FROM data w1
            LEFT OUTER JOIN data w2
                ON w1.requested_at = w2.requested_at
               AND w1.account_tag != w2.account_tag
               AND w1.trophies_diff + w2.trophies_diff = 0
            WHERE w1.account_tag = $1
              AND ($5::text IS NULL OR w2.account_tag = $5)
            ORDER BY w1.requested_at DESC
            LIMIT $4
            "#,
        )
        .bind(query.account_tag)
        .bind(query.after)
        .bind(query.before)
        .bind(query.limit)
        .bind(query.opponent)
        .fetch_all(&self.pool)
        .await?;
        Ok(battles)
    }

    /// Winners and losers with equal and opposite trophy changes between the two
    /// most recent minute snapshots.
    pub async fn leaderboard_matches(&self) -> Result<Vec<LeaderboardMatch>, AppError> {
        let matches = sqlx::query_as::<_, LeaderboardMatch>(
            r#"
            WITH requested AS (
                SELECT DISTINCT date_trunc('minute', requested_at) AS requested_at
                FROM account_tracking_v2
                ORDER BY 1 DESC
                LIMIT 2
            ),
            snapshots AS (
                SELECT l.account_tag, l.account_name, r.requested_at, l.builder_base_trophies
                FROM account_tracking_v2 l
                JOIN requested r ON date_trunc('minute', l.requested_at) = r.requested_at
            ),
            changes AS (
                SELECT s1.account_tag, s1.account_name,
                       s1.requested_at AS last_request, s2.requested_at AS second_last_request,
                       s1.builder_base_trophies - s2.builder_base_trophies AS diff
                FROM snapshots s1
                JOIN snapshots s2 ON s1.account_tag = s2.account_tag AND s1.requested_at > s2.requested_at
            )
            SELECT w.account_tag AS winner_tag, w.account_name AS winner_name, pw.player_id AS winner_id,
                   l.account_tag AS loser_tag, l.account_name AS loser_name, pl.player_id AS loser_id,
                   w.last_request, w.second_last_request, w.diff
            FROM changes w
            JOIN changes l
                ON l.diff = -w.diff
               AND l.last_request = w.last_request
               AND l.second_last_request = w.second_last_request
            LEFT JOIN player_accounts pw ON pw.account_tag = w.account_tag
            LEFT JOIN player_accounts pl ON pl.account_tag = l.account_tag
            WHERE w.diff > 0
            ORDER BY w.account_tag, l.account_tag, w.diff
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(matches)
    }

    pub async fn insert_leaderboard(
        &self,
        players: &[RankedPlayer],
        requested_at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for player in players {
            let result = sqlx::query(
                r#"
                INSERT INTO leaderboards
                    (account_tag, account_name, requested_at, current_rank, previous_rank, builder_base_trophies)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&player.tag)
            .bind(&player.name)
            .bind(requested_at)
            .bind(player.rank)
            .bind(player.previous_rank)
            .bind(player.builder_base_trophies)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn export_rows(&self) -> Result<Vec<AccountExportRow>, AppError> {
        let rows = sqlx::query_as::<_, AccountExportRow>(
            r#"
            SELECT a.account_tag, a.account_name, p.player_name, a.tracking_active, a.last_updated,
                   s.builder_hall_level, s.builder_base_trophies, s.best_builder_base_trophies,
                   s.builder_base_halls_destroyed,
                   coalesce(atk.attacks, 0) AS attacks,
                   coalesce(atk.three_stars, 0) AS three_stars,
                   coalesce(atk.one_stars, 0) AS one_stars,
                   coalesce(def.defenses, 0) AS defenses
            FROM accounts a
            LEFT JOIN player_accounts pa ON pa.account_tag = a.account_tag
            LEFT JOIN players p ON p.player_id = pa.player_id
            LEFT JOIN LATERAL (
                SELECT t.builder_hall_level, t.builder_base_trophies, t.best_builder_base_trophies,
                       t.builder_base_halls_destroyed
                FROM account_tracking t
                WHERE t.account_tag = a.account_tag
                ORDER BY t.requested_at DESC
                LIMIT 1
            ) s ON TRUE
            LEFT JOIN (
                SELECT attacker_tag,
                       count(*) AS attacks,
                       count(*) FILTER (WHERE stars = 3) AS three_stars,
                       count(*) FILTER (WHERE stars = 1) AS one_stars
                FROM attack
                GROUP BY attacker_tag
            ) atk ON atk.attacker_tag = a.account_tag
            LEFT JOIN (
                SELECT defender_tag, count(*) FILTER (WHERE stars != 3) AS defenses
                FROM attack
                GROUP BY defender_tag
            ) def ON def.defender_tag = a.account_tag
            ORDER BY p.player_name NULLS LAST, a.account_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // === War operations ===

    /// Makes sure every clan of an active team is tracked.
    pub async fn sync_tracked_clans(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO tracked_clans (clantag, team_id)
            SELECT DISTINCT ON (tc.clantag) tc.clantag, tc.team_id
            FROM team t
            JOIN team_clan tc ON t.team_id = tc.team_id
            WHERE t.active
            ORDER BY tc.clantag, tc.team_id
            ON CONFLICT (clantag) DO UPDATE SET team_id = EXCLUDED.team_id
            WHERE tracked_clans.team_id IS DISTINCT FROM EXCLUDED.team_id
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Claims clans whose next check is due.
    ///
    /// Claimed rows get their `next_check` pushed out by `lease_secs`, so a
    /// concurrent poller skips them until the owner writes the real schedule.
    pub async fn claim_due_clans(
        &self,
        limit: i64,
        lease_secs: f64,
    ) -> Result<Vec<TrackedClan>, AppError> {
        let columns = prefixed_columns(TRACKED_CLAN_COLUMNS, Some("tc"));
        let clans = sqlx::query_as::<_, TrackedClan>(&format!(
            r#"
            UPDATE tracked_clans tc
            SET next_check = now() + make_interval(secs => $2)
            FROM (
                SELECT clantag FROM tracked_clans
                WHERE next_check <= now()
                ORDER BY next_check
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            ) due
            WHERE tc.clantag = due.clantag
            RETURNING {columns}
            "#
        ))
        .bind(limit)
        .bind(lease_secs)
        .fetch_all(&self.pool)
        .await?;
        Ok(clans)
    }

    pub async fn list_tracked_clans(&self) -> Result<Vec<TrackedClan>, AppError> {
        let clans = sqlx::query_as::<_, TrackedClan>(&format!(
            "SELECT {TRACKED_CLAN_COLUMNS} FROM tracked_clans ORDER BY next_check, clantag"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(clans)
    }

    pub async fn team_for_clan(&self, clan_tag: &str) -> Result<Option<i32>, AppError> {
        let team_id = sqlx::query_scalar::<_, i32>(
            r#"
            SELECT t.team_id FROM team_clan tc
            JOIN team t ON t.team_id = tc.team_id
            WHERE tc.clantag = $1 AND t.active
            ORDER BY t.team_id
            LIMIT 1
            "#,
        )
        .bind(clan_tag)
        .fetch_optional(&self.pool)
        .await?;
        Ok(team_id)
    }

    pub async fn current_season(&self, at: DateTime<Utc>) -> Result<Option<i32>, AppError> {
        let season_id = sqlx::query_scalar::<_, i32>(
            "SELECT season_id FROM season WHERE season_start <= $1 AND season_end >= $1 ORDER BY season_start DESC LIMIT 1",
        )
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(season_id)
    }

    pub async fn get_match(&self, match_id: i32) -> Result<MatchRecord, AppError> {
        const QUERY: &str = r#"
            SELECT match_id, season_id, team_id1, clantag_team1, team_id2, clantag_team2,
                   prep_start, active, scored
            FROM match
            WHERE match_id = $1
            "#;
        sqlx::query_as::<_, MatchRecord>(QUERY)
            .bind(match_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(QUERY, &[&match_id]))
    }

    pub async fn find_match(
        &self,
        clan_tag: &str,
        opponent_tag: &str,
        prep_start: DateTime<Utc>,
    ) -> Result<Option<MatchRecord>, AppError> {
        let record = sqlx::query_as::<_, MatchRecord>(
            r#"
            SELECT match_id, season_id, team_id1, clantag_team1, team_id2, clantag_team2,
                   prep_start, active, scored
            FROM match
            WHERE $1 IN (clantag_team1, clantag_team2)
              AND $2 IN (clantag_team1, clantag_team2)
              AND prep_start = $3
            ORDER BY match_id
            LIMIT 1
            "#,
        )
        .bind(clan_tag)
        .bind(opponent_tag)
        .bind(prep_start)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Creates a match with both lineups and empty result rows.
    pub async fn create_match(
        &self,
        new: &NewMatch,
        lineups: &[LineupClan],
    ) -> Result<i32, AppError> {
        let mut tx = self.pool.begin().await?;

        // The no-op update makes RETURNING yield the existing id on a race.
        let match_id = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO match (season_id, team_id1, clantag_team1, team_id2, clantag_team2,
                               prep_start, prep_duration_secs, war_duration_secs, active, scored)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, FALSE)
            ON CONFLICT (clantag_team1, clantag_team2, prep_start)
                DO UPDATE SET active = match.active
            RETURNING match_id
            "#,
        )
        .bind(new.season_id)
        .bind(new.team_id1)
        .bind(&new.clantag_team1)
        .bind(new.team_id2)
        .bind(&new.clantag_team2)
        .bind(new.prep_start)
        .bind(new.prep_duration_secs)
        .bind(new.war_duration_secs)
        .fetch_one(&mut *tx)
        .await?;

        for clan in lineups {
            sqlx::query(
                "INSERT INTO lineup_clan (match_id, clan_tag, clan_name, team_id) VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
            )
            .bind(match_id)
            .bind(&clan.clan_tag)
            .bind(&clan.clan_name)
            .bind(clan.team_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO match_results (match_id, clan_tag) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(match_id)
            .bind(&clan.clan_tag)
            .execute(&mut *tx)
            .await?;

            for (player_tag, player_name) in &clan.players {
                sqlx::query(
                    r#"
                    INSERT INTO lineup_player (match_id, clan_tag, player_tag, player_name, team_id)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(match_id)
                .bind(&clan.clan_tag)
                .bind(player_tag)
                .bind(player_name)
                .bind(clan.team_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(match_id)
    }

    /// Stores attacks not seen before. Returns how many were new.
    pub async fn insert_attacks(
        &self,
        match_id: i32,
        attacks: &[AttackRecord],
    ) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for attack in attacks {
            let result = sqlx::query(
                r#"
                INSERT INTO attack (match_id, attack_order, attacker_tag, attacker_th, defender_tag,
                                    defender_th, stars, destruction, fresh, duration)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(match_id)
            .bind(attack.attack_order)
            .bind(&attack.attacker_tag)
            .bind(attack.attacker_th)
            .bind(&attack.defender_tag)
            .bind(attack.defender_th)
            .bind(attack.stars)
            .bind(attack.destruction)
            .bind(attack.fresh)
            .bind(attack.duration)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn save_results(
        &self,
        match_id: i32,
        results: &[MatchResult],
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        for result in results {
            sqlx::query(
                r#"
                INSERT INTO match_results (match_id, clan_tag, stars, perc, duration, result, attacks_used)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (match_id, clan_tag) DO UPDATE SET
                    stars = EXCLUDED.stars,
                    perc = EXCLUDED.perc,
                    duration = EXCLUDED.duration,
                    result = EXCLUDED.result,
                    attacks_used = EXCLUDED.attacks_used
                "#,
            )
            .bind(match_id)
            .bind(&result.clan_tag)
            .bind(result.stars)
            .bind(result.destruction)
            .bind(result.duration)
            .bind(&result.result)
            .bind(result.attacks_used)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Flags a match as scored. Returns false if it already was.
    pub async fn mark_scored(&self, match_id: i32) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE match SET scored = TRUE WHERE match_id = $1 AND NOT scored")
            .bind(match_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_tracked_clan(
        &self,
        clan_tag: &str,
        team_id: Option<i32>,
        state: &str,
        last_checked: DateTime<Utc>,
        next_check: DateTime<Utc>,
        match_id: Option<i32>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE tracked_clans
            SET team_id = $2, state = $3, api_state = $3, last_checked = $4, next_check = $5, match_id = $6
            WHERE clantag = $1
            "#,
        )
        .bind(clan_tag)
        .bind(team_id)
        .bind(state)
        .bind(last_checked)
        .bind(next_check)
        .bind(match_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Shares the match with the opponent if the opponent is tracked too.
    pub async fn set_clan_match(
        &self,
        clan_tag: &str,
        match_id: Option<i32>,
        state: &str,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE tracked_clans SET match_id = $2, state = $3 WHERE clantag = $1")
            .bind(clan_tag)
            .bind(match_id)
            .bind(state)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // === Permission operations ===

    pub async fn has_command_permission(
        &self,
        command: &str,
        user_id: u64,
        role_ids: &[u64],
    ) -> Result<bool, AppError> {
        let roles: Vec<i64> = role_ids.iter().map(|id| *id as i64).collect();
        let allowed = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM permissions
                WHERE name = $1 AND (user_id = $2 OR role_id = ANY($3))
            )
            "#,
        )
        .bind(command)
        .bind(user_id as i64)
        .bind(roles)
        .fetch_one(&self.pool)
        .await?;
        Ok(allowed)
    }

    // === Developer operations ===

    pub async fn table_columns(&self) -> Result<Vec<TableColumn>, AppError> {
        let columns = sqlx::query_as::<_, TableColumn>(
            r#"
            SELECT table_name::text AS table_name, column_name::text AS column_name,
                   data_type::text AS data_type, is_nullable::text AS is_nullable
            FROM information_schema.columns
            WHERE table_schema = 'public'
            ORDER BY table_name, ordinal_position
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(columns)
    }

    /// Runs a read query and returns every row as a JSON object.
    pub async fn query_json(&self, query: &str) -> Result<Vec<String>, AppError> {
        let query = query.trim().trim_end_matches(';');
        let wrapped = format!("SELECT row_to_json(t)::text FROM ({query}) t");
        let rows = sqlx::query_scalar::<_, String>(&wrapped)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn execute_raw(&self, statement: &str) -> Result<u64, AppError> {
        let result = sqlx::raw_sql(statement).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_columns_adds_alias() {
        assert_eq!(
            prefixed_columns(PLAYER_COLUMNS, Some("p")),
            "p.player_id, p.player_name, p.player_discord_id"
        );
        assert_eq!(prefixed_columns(PLAYER_COLUMNS, None), PLAYER_COLUMNS);
    }

    #[test]
    fn snapshot_columns_match_insert_arity() {
        assert_eq!(snapshot_columns().split(", ").count(), 17);
        assert!(snapshot_columns().starts_with("account_tag, first_observed, requested_at"));
    }

    async fn repository() -> Repository {
        dotenvy::dotenv().ok();
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPool::connect(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        Repository::new(pool)
    }

    #[tokio::test]
    #[ignore = "Postgres database required"]
    async fn account_can_be_resolved_by_tag_and_name() {
        let db = repository().await;
        db.execute_raw("DELETE FROM accounts WHERE account_tag = '#2PYLQ0'")
            .await
            .unwrap();
        db.insert_account("#2PYLQ0", "Resolver Test", true)
            .await
            .unwrap();

        let by_tag = db.resolve_account("2pylqo").await.unwrap();
        assert_eq!(by_tag.account_tag, "#2PYLQ0");
        let by_name = db.resolve_account("resolver test").await.unwrap();
        assert_eq!(by_name.account_tag, "#2PYLQ0");
        assert!(matches!(
            db.resolve_account("nobody-has-this-name").await,
            Err(AppError::Conversion(_))
        ));
    }

    #[tokio::test]
    #[ignore = "Postgres database required"]
    async fn missing_rows_report_the_rendered_query() {
        let db = repository().await;

        let err = db.get_player(-42).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Nothing found for query: SELECT player_id, player_name, player_discord_id FROM players WHERE player_id = '-42'"
        );

        let err = db.get_match(-42).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Nothing found for query: SELECT match_id, season_id, team_id1, clantag_team1, team_id2, \
             clantag_team2, prep_start, active, scored FROM match WHERE match_id = '-42'"
        );

        assert!(matches!(
            db.resolve_player("-42").await,
            Err(AppError::Conversion(_))
        ));
    }

    #[tokio::test]
    #[ignore = "Postgres database required"]
    async fn claimed_clans_are_not_claimed_twice() {
        let db = repository().await;
        db.execute_raw(
            "INSERT INTO tracked_clans (clantag, next_check) VALUES ('#TESTCLAN', now() - interval '1 minute') \
             ON CONFLICT (clantag) DO UPDATE SET next_check = now() - interval '1 minute'",
        )
        .await
        .unwrap();

        let first = db.claim_due_clans(100, 600.0).await.unwrap();
        assert!(first.iter().any(|c| c.clantag == "#TESTCLAN"));
        let second = db.claim_due_clans(100, 600.0).await.unwrap();
        assert!(second.iter().all(|c| c.clantag != "#TESTCLAN"));
    }
}
