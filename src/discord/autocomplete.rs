//! Autocomplete callbacks shared by the slash commands.

use chrono::Utc;
use poise::serenity_prelude::{AutocompleteChoice, ResolvedValue};
use tracing::warn;

use super::bot::Context;
use crate::db::models::{Account, Player};
use crate::logging::truncate_chars;
use crate::time::{self, Suggestion};

/// Discord rejects more choices than this, and longer choice names.
const MAX_CHOICES: usize = 25;
const MAX_NAME_LEN: usize = 100;

type Choices = std::vec::IntoIter<AutocompleteChoice>;

/// Accounts, narrowed to the selected `player` when that leaves any match.
pub async fn account(ctx: Context<'_>, partial: &str) -> Choices {
    account_choices(ctx, partial, false).await.into_iter()
}

/// Accounts of the selected `player` only.
pub async fn player_account(ctx: Context<'_>, partial: &str) -> Choices {
    account_choices(ctx, partial, true).await.into_iter()
}

/// Players, narrowed to the owner of the selected `account` when there is one.
pub async fn player(ctx: Context<'_>, partial: &str) -> Choices {
    let db = &ctx.data().db;
    let owner_filter = match option_value(ctx, "account") {
        Some(input) => db.resolve_account(&input).await.ok(),
        None => None,
    };

    if let Some(account) = owner_filter {
        let owners = db
            .search_players(partial, Some(&account.account_tag))
            .await
            .unwrap_or_else(|e| log_failure("player", e));
        if !owners.is_empty() {
            return player_choices(owners).into_iter();
        }
    }

    let players = db
        .search_players(partial, None)
        .await
        .unwrap_or_else(|e| log_failure("player", e));
    player_choices(players).into_iter()
}

/// Datetimes, suggesting the start of recent days while empty.
pub async fn datetime_start(_ctx: Context<'_>, partial: &str) -> Choices {
    datetime_choices(partial, Suggestion::DayStart).into_iter()
}

/// Datetimes, suggesting the end of recent days while empty.
pub async fn datetime_end(_ctx: Context<'_>, partial: &str) -> Choices {
    datetime_choices(partial, Suggestion::DayEnd).into_iter()
}

async fn account_choices(ctx: Context<'_>, partial: &str, force_player: bool) -> Vec<AutocompleteChoice> {
    let db = &ctx.data().db;
    let player_filter = match option_value(ctx, "player") {
        Some(input) => db.resolve_player(&input).await.ok(),
        None => None,
    };

    if let Some(player) = player_filter {
        let owned = db
            .search_accounts(partial, Some(player.player_id))
            .await
            .unwrap_or_else(|e| log_failure("account", e));
        if !owned.is_empty() || force_player {
            return account_list(owned);
        }
    } else if force_player {
        return Vec::new();
    }

    let accounts = db
        .search_accounts(partial, None)
        .await
        .unwrap_or_else(|e| log_failure("account", e));
    account_list(accounts)
}

fn account_list(accounts: Vec<Account>) -> Vec<AutocompleteChoice> {
    accounts
        .into_iter()
        .take(MAX_CHOICES)
        .map(|a| {
            let name = account_label(&a);
            AutocompleteChoice::new(truncate_chars(&name, MAX_NAME_LEN), a.account_tag)
        })
        .collect()
}

fn account_label(account: &Account) -> String {
    format!("{} [{}]", account.account_name, account.account_tag)
}

fn player_choices(players: Vec<Player>) -> Vec<AutocompleteChoice> {
    players
        .into_iter()
        .take(MAX_CHOICES)
        .map(|p| {
            AutocompleteChoice::new(
                truncate_chars(&p.player_name, MAX_NAME_LEN),
                p.player_id.to_string(),
            )
        })
        .collect()
}

fn datetime_choices(partial: &str, suggestion: Suggestion) -> Vec<AutocompleteChoice> {
    time::choices(partial, Some(suggestion), Utc::now())
        .into_iter()
        .take(MAX_CHOICES)
        .map(|(name, value)| AutocompleteChoice::new(truncate_chars(&name, MAX_NAME_LEN), value))
        .collect()
}

/// Current value of another option of the command being completed.
fn option_value(ctx: Context<'_>, name: &str) -> Option<String> {
    let poise::Context::Application(app) = ctx else {
        return None;
    };
    let option = app.args.iter().find(|o| o.name == name)?;
    let value = match &option.value {
        ResolvedValue::String(value) => value.to_string(),
        ResolvedValue::Integer(value) => value.to_string(),
        ResolvedValue::Autocomplete { value, .. } => value.to_string(),
        _ => return None,
    };
    Some(value).filter(|v| !v.trim().is_empty())
}

fn log_failure<T>(kind: &str, error: crate::error::AppError) -> Vec<T> {
    warn!(error = ?error, kind, "🎮 ⚠️ Autocomplete lookup failed");
    Vec::new()
}
