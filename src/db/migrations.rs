use sqlx::PgPool;
use tracing::info;

use crate::error::AppError;

const SCHEMA: &str = r#"
CREATE EXTENSION IF NOT EXISTS pg_trgm;
CREATE EXTENSION IF NOT EXISTS fuzzystrmatch;

-- === Accounts and players ===

CREATE TABLE IF NOT EXISTS accounts (
    account_tag TEXT PRIMARY KEY,
    account_name TEXT NOT NULL,
    tracking_active BOOLEAN NOT NULL DEFAULT TRUE,
    last_updated TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS players (
    player_id SERIAL PRIMARY KEY,
    player_name TEXT NOT NULL,
    player_discord_id BIGINT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS player_accounts (
    player_id INTEGER NOT NULL REFERENCES players(player_id) ON DELETE CASCADE,
    account_tag TEXT NOT NULL UNIQUE REFERENCES accounts(account_tag) ON DELETE CASCADE,
    PRIMARY KEY (player_id, account_tag)
);

CREATE INDEX IF NOT EXISTS idx_accounts_name_trgm ON accounts USING gin (account_name gin_trgm_ops);
CREATE INDEX IF NOT EXISTS idx_players_name_trgm ON players USING gin (player_name gin_trgm_ops);
CREATE INDEX IF NOT EXISTS idx_players_discord ON players(player_discord_id);

-- === Tracking ===

CREATE TABLE IF NOT EXISTS account_tracking (
    account_tag TEXT NOT NULL REFERENCES accounts(account_tag) ON DELETE CASCADE,
    first_observed TIMESTAMPTZ NOT NULL,
    requested_at TIMESTAMPTZ NOT NULL,
    times_observed INTEGER NOT NULL DEFAULT 1,
    messed_up_record BOOLEAN NOT NULL DEFAULT FALSE,
    builder_hall_level INTEGER,
    builder_base_trophies INTEGER,
    best_builder_base_trophies INTEGER,
    builder_base_league INTEGER,
    best_builder_base_season_id TEXT,
    best_builder_base_season_rank INTEGER,
    best_builder_base_season_trophies INTEGER,
    previous_builder_base_season_id TEXT,
    previous_builder_base_season_rank INTEGER,
    previous_builder_base_season_trophies INTEGER,
    builder_base_trophies_achievement INTEGER,
    builder_base_halls_destroyed INTEGER,
    PRIMARY KEY (account_tag, first_observed)
);

CREATE INDEX IF NOT EXISTS idx_account_tracking_requested ON account_tracking(account_tag, requested_at DESC);

CREATE TABLE IF NOT EXISTS account_tracking_v2 (
    account_tag TEXT NOT NULL,
    account_name TEXT NOT NULL,
    requested_at TIMESTAMPTZ NOT NULL,
    builder_base_trophies INTEGER NOT NULL,
    PRIMARY KEY (account_tag, requested_at)
);

CREATE INDEX IF NOT EXISTS idx_account_tracking_v2_requested ON account_tracking_v2(requested_at);

CREATE OR REPLACE VIEW account_tracking_v3 AS
SELECT account_tag, account_name, requested_at, builder_base_trophies_new, trophies_difference
FROM (
    SELECT account_tag,
           account_name,
           requested_at,
           builder_base_trophies AS builder_base_trophies_new,
           builder_base_trophies - lag(builder_base_trophies)
               OVER (PARTITION BY account_tag ORDER BY requested_at) AS trophies_difference
    FROM account_tracking_v2
) t
WHERE trophies_difference IS NOT NULL AND trophies_difference <> 0;

CREATE TABLE IF NOT EXISTS leaderboards (
    account_tag TEXT NOT NULL,
    account_name TEXT NOT NULL,
    requested_at TIMESTAMPTZ NOT NULL,
    current_rank INTEGER NOT NULL,
    previous_rank INTEGER,
    builder_base_trophies INTEGER NOT NULL,
    PRIMARY KEY (account_tag, requested_at)
);

-- === Permissions ===

CREATE TABLE IF NOT EXISTS permissions (
    name TEXT NOT NULL,
    user_id BIGINT,
    role_id BIGINT,
    CHECK (user_id IS NOT NULL OR role_id IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_permissions_name ON permissions(name);

-- === Esports results ===

CREATE TABLE IF NOT EXISTS team (
    team_id SERIAL PRIMARY KEY,
    team_name TEXT NOT NULL,
    active BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS team_clan (
    team_id INTEGER NOT NULL REFERENCES team(team_id) ON DELETE CASCADE,
    clantag TEXT NOT NULL,
    PRIMARY KEY (team_id, clantag)
);

CREATE TABLE IF NOT EXISTS season (
    season_id SERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    season_start TIMESTAMPTZ NOT NULL,
    season_end TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS match (
    match_id SERIAL PRIMARY KEY,
    season_id INTEGER REFERENCES season(season_id),
    team_id1 INTEGER REFERENCES team(team_id),
    clantag_team1 TEXT NOT NULL,
    team_id2 INTEGER REFERENCES team(team_id),
    clantag_team2 TEXT NOT NULL,
    prep_start TIMESTAMPTZ NOT NULL,
    prep_duration_secs INTEGER NOT NULL,
    war_duration_secs INTEGER NOT NULL,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    scored BOOLEAN NOT NULL DEFAULT FALSE,
    UNIQUE (clantag_team1, clantag_team2, prep_start)
);

CREATE TABLE IF NOT EXISTS match_results (
    match_id INTEGER NOT NULL REFERENCES match(match_id) ON DELETE CASCADE,
    clan_tag TEXT NOT NULL,
    stars INTEGER NOT NULL DEFAULT 0,
    perc DOUBLE PRECISION NOT NULL DEFAULT 0,
    duration DOUBLE PRECISION NOT NULL DEFAULT 0,
    result TEXT NOT NULL DEFAULT 'ongoing',
    attacks_used INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (match_id, clan_tag)
);

CREATE TABLE IF NOT EXISTS lineup_clan (
    match_id INTEGER NOT NULL REFERENCES match(match_id) ON DELETE CASCADE,
    clan_tag TEXT NOT NULL,
    clan_name TEXT NOT NULL,
    team_id INTEGER REFERENCES team(team_id),
    PRIMARY KEY (match_id, clan_tag)
);

CREATE TABLE IF NOT EXISTS lineup_player (
    match_id INTEGER NOT NULL REFERENCES match(match_id) ON DELETE CASCADE,
    clan_tag TEXT NOT NULL,
    player_tag TEXT NOT NULL,
    player_name TEXT NOT NULL,
    team_id INTEGER REFERENCES team(team_id),
    PRIMARY KEY (match_id, player_tag)
);

CREATE TABLE IF NOT EXISTS attack (
    match_id INTEGER NOT NULL REFERENCES match(match_id) ON DELETE CASCADE,
    attack_order INTEGER NOT NULL,
    attacker_tag TEXT NOT NULL,
    attacker_th INTEGER NOT NULL,
    defender_tag TEXT NOT NULL,
    defender_th INTEGER NOT NULL,
    stars INTEGER NOT NULL,
    destruction INTEGER NOT NULL,
    fresh BOOLEAN NOT NULL,
    duration INTEGER NOT NULL,
    PRIMARY KEY (match_id, attack_order)
);

CREATE TABLE IF NOT EXISTS tracked_clans (
    clantag TEXT PRIMARY KEY,
    team_id INTEGER REFERENCES team(team_id),
    state TEXT,
    api_state TEXT,
    last_checked TIMESTAMPTZ,
    next_check TIMESTAMPTZ NOT NULL DEFAULT now(),
    match_id INTEGER REFERENCES match(match_id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_tracked_clans_next_check ON tracked_clans(next_check);
"#;

pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    info!("🗄️ Database migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let body = statement
                .lines()
                .filter(|l| !l.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join(" ");
            let body = body.trim();
            if body.is_empty() {
                continue;
            }
            assert!(
                body.contains("IF NOT EXISTS") || body.starts_with("CREATE OR REPLACE"),
                "statement is not idempotent: {body}"
            );
        }
    }

    #[tokio::test]
    #[ignore = "Postgres database required"]
    async fn migrations_apply_twice() {
        dotenvy::dotenv().ok();
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPool::connect(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
    }
}
