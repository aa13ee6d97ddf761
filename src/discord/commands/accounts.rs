use chrono::{DateTime, Utc};
use poise::ChoiceParameter;
use tracing::{Span, info, instrument, warn};

use super::battles::{BattleFilter, BattleLogOptions, OpponentFilter, send_battle_log};
use crate::clash::tag;
use crate::db::models::{Account, AccountStats, Player};
use crate::discord::bot::Context;
use crate::discord::embeds::{self, Tone};
use crate::discord::paginate::paginate;
use crate::error::AppError;
use crate::time::{TimestampStyle, to_discord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ChoiceParameter)]
pub enum TrackingStatus {
    #[name = "Active"]
    Active,
    #[name = "Inactive"]
    Inactive,
}

impl TrackingStatus {
    fn is_active(self) -> bool {
        self == TrackingStatus::Active
    }

    fn label(active: bool) -> &'static str {
        if active { "active" } else { "inactive" }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ChoiceParameter)]
pub enum AccountFilter {
    #[name = "all"]
    All,
    #[name = "active"]
    Active,
    #[name = "inactive"]
    Inactive,
}

impl AccountFilter {
    fn tracking_active(self) -> Option<bool> {
        match self {
            AccountFilter::All => None,
            AccountFilter::Active => Some(true),
            AccountFilter::Inactive => Some(false),
        }
    }

    fn title(self) -> &'static str {
        match self {
            AccountFilter::All => "All",
            AccountFilter::Active => "Active",
            AccountFilter::Inactive => "Inactive",
        }
    }
}

/// Manage the accounts known to the bot
#[poise::command(
    slash_command,
    subcommands("insert", "tracking", "list", "info", "battle_log"),
    subcommand_required
)]
pub async fn accounts(_ctx: Context<'_>) -> Result<(), AppError> {
    Ok(())
}

/// Add an account to the bot
#[poise::command(slash_command, check = "crate::discord::checks::staff")]
#[instrument(skip(ctx), fields(user_id = %ctx.author().id, normalized_tag))]
pub async fn insert(
    ctx: Context<'_>,
    #[description = "Tag of the account"] account_tag: String,
    #[description = "Whether the account should be tracked"] tracking: Option<TrackingStatus>,
) -> Result<(), AppError> {
    let data = ctx.data();
    let tracking = tracking.unwrap_or(TrackingStatus::Active);
    let account_tag = tag::normalize(&account_tag);
    Span::current().record("normalized_tag", account_tag.as_str());

    if !tag::looks_like_tag(&account_tag) {
        ctx.say("Invalid account tag").await?;
        return Ok(());
    }
    let player = match data.clash.get_player(&account_tag).await {
        Ok(fetched) => fetched.data,
        Err(e) if is_unknown_tag(&e) => {
            warn!(error = %e, "🎮 ⚠️ Account lookup failed");
            ctx.say("Invalid account tag").await?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if let Some(existing) = data.db.find_account(&player.tag).await? {
        let embed = embeds::message(
            data.colors(),
            Tone::Warning,
            format!("Account {} is already in the bot.", existing.account_tag),
            format!(
                "This account is already in the bot as {} [{}]. The tracking is currently {} and the last update was {}.\n\
                 If you want to adjust the tracking status, use `/accounts tracking manage`.",
                embeds::escape_markdown(&existing.account_name),
                existing.account_tag,
                TrackingStatus::label(existing.tracking_active),
                last_update(existing.last_updated),
            ),
        );
        ctx.send(poise::CreateReply::default().embed(embed)).await?;
        return Ok(());
    }

    data.db
        .insert_account(&player.tag, &player.name, tracking.is_active())
        .await?;
    info!(name = %player.name, active = tracking.is_active(), "🎮 Account added");

    let embed = embeds::message(
        data.colors(),
        Tone::Success,
        format!("Account {} added to the bot.", player.tag),
        format!(
            "This account is now in the bot as {} [{}]. Tracking was set to {}",
            embeds::escape_markdown(&player.name),
            player.tag,
            TrackingStatus::label(tracking.is_active()),
        ),
    );
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Manage the tracking of accounts
#[poise::command(slash_command, subcommands("manage"), subcommand_required)]
pub async fn tracking(_ctx: Context<'_>) -> Result<(), AppError> {
    Ok(())
}

/// Turn the tracking of an account on or off
#[poise::command(slash_command, check = "crate::discord::checks::staff")]
#[instrument(skip(ctx), fields(user_id = %ctx.author().id))]
pub async fn manage(
    ctx: Context<'_>,
    #[description = "Account to manage"]
    #[autocomplete = "crate::discord::autocomplete::account"]
    account: String,
    #[description = "New tracking status"] tracking: Option<TrackingStatus>,
) -> Result<(), AppError> {
    let data = ctx.data();
    let account = Account::resolve(&data.db, &account).await?;
    let wanted = tracking.unwrap_or(TrackingStatus::Active).is_active();

    let embed = if account.tracking_active == wanted {
        embeds::toned(data.colors(), Tone::Warning).title(format!(
            "Tracking status of account {} is already {}.",
            account.account_tag,
            TrackingStatus::label(wanted)
        ))
    } else {
        data.db
            .set_account_tracking(&account.account_tag, wanted)
            .await?;
        info!(account_tag = %account.account_tag, active = wanted, "🎮 Tracking status changed");
        embeds::message(
            data.colors(),
            Tone::Success,
            format!("Tracking status of account {} adjusted.", account.account_tag),
            format!(
                "Tracking status of account {} is now {} instead of {}.",
                account.account_tag,
                TrackingStatus::label(wanted),
                TrackingStatus::label(account.tracking_active)
            ),
        )
    };
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// List the accounts of the bot
#[poise::command(slash_command, check = "crate::discord::checks::staff")]
pub async fn list(
    ctx: Context<'_>,
    #[description = "Filter by tracking status"] filter: Option<AccountFilter>,
    #[description = "Only accounts whose name or tag contains this"] search: Option<String>,
) -> Result<(), AppError> {
    let data = ctx.data();
    let filter = filter.unwrap_or(AccountFilter::All);
    let search = search.unwrap_or_default();

    let accounts = data
        .db
        .list_accounts(filter.tracking_active(), search.trim())
        .await?;
    if accounts.is_empty() {
        let embed = embeds::message(
            data.colors(),
            Tone::Error,
            "No accounts found",
            "Set up accounts with `/accounts insert`",
        );
        ctx.send(poise::CreateReply::default().embed(embed)).await?;
        return Ok(());
    }

    let title = list_title(filter, search.trim());
    let lines = accounts.iter().map(account_line);
    let pages = embeds::description_pages(
        data.colors(),
        Tone::Success,
        &title,
        embeds::paginate_lines(lines),
    );
    paginate(ctx, pages).await
}

/// Show what the bot knows about an account
#[poise::command(slash_command, check = "crate::discord::checks::staff")]
pub async fn info(
    ctx: Context<'_>,
    #[description = "Account to show"]
    #[autocomplete = "crate::discord::autocomplete::account"]
    account: String,
) -> Result<(), AppError> {
    let data = ctx.data();
    let account = Account::resolve(&data.db, &account).await?;
    let stats = data.db.account_stats(&account.account_tag).await?;
    let player = data.db.account_player(&account.account_tag).await?;

    let mut embed = embeds::toned(data.colors(), Tone::Success).title(format!(
        "Account {} ({})",
        account.account_tag,
        embeds::escape_markdown(&account.account_name)
    ));
    for (name, value) in info_fields(&account, &stats, player.as_ref()) {
        embed = embed.field(name, value, false);
    }
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// View the battle log of an account
#[poise::command(slash_command, check = "crate::discord::checks::staff")]
pub async fn battle_log(
    ctx: Context<'_>,
    #[description = "Account to show"]
    #[autocomplete = "crate::discord::autocomplete::account"]
    account: String,
    #[description = "Show battles after this date"]
    #[autocomplete = "crate::discord::autocomplete::datetime_start"]
    after: Option<String>,
    #[description = "Show battles before this date"]
    #[autocomplete = "crate::discord::autocomplete::datetime_end"]
    before: Option<String>,
    #[description = "Filter the battles for known opponents"]
    filter_opponent: Option<OpponentFilter>,
    #[description = "Filter the battles for attack/defense"] filter_battle: Option<BattleFilter>,
    #[description = "Limit for the shown battles"]
    #[min = 1]
    limit: Option<i64>,
) -> Result<(), AppError> {
    let db = &ctx.data().db;
    let account = Account::resolve(db, &account).await?;
    send_battle_log(
        ctx,
        db,
        &account,
        None,
        BattleLogOptions {
            after,
            before,
            filter_opponent,
            filter_battle,
            limit,
        },
    )
    .await
}

fn last_update(at: Option<DateTime<Utc>>) -> String {
    at.map(|at| to_discord(at, TimestampStyle::Combined))
        .unwrap_or_else(|| "Never".into())
}

fn list_title(filter: AccountFilter, search: &str) -> String {
    let mut title = format!("{} accounts", filter.title());
    if !search.is_empty() {
        title.push_str(&format!(" matching `{search}`"));
    }
    title
}

fn account_line(account: &Account) -> String {
    format!(
        "# {} `ID {}`\n**{}**\n",
        embeds::escape_markdown(&account.account_name),
        account.account_tag,
        account.tracking_label()
    )
}

fn info_fields(
    account: &Account,
    stats: &AccountStats,
    player: Option<&Player>,
) -> Vec<(&'static str, String)> {
    vec![
        ("Tracking status", account.tracking_label().to_string()),
        ("Last update", last_update(account.last_updated)),
        ("Tracking since", last_update(stats.first_tracked)),
        ("Number of entries", stats.entries.unwrap_or(0).to_string()),
        (
            "Player",
            player
                .map(|p| format!("{} [{}]", embeds::escape_markdown(&p.player_name), p.player_id))
                .unwrap_or_else(|| "None".into()),
        ),
    ]
}

/// API errors meaning the tag does not belong to any account.
fn is_unknown_tag(error: &AppError) -> bool {
    matches!(error, AppError::NotFound { .. } | AppError::Conversion(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(active: bool) -> Account {
        Account {
            account_tag: "#2PP".into(),
            account_name: "Builder_1".into(),
            tracking_active: active,
            last_updated: None,
        }
    }

    #[test]
    fn list_lines_show_name_tag_and_status() {
        assert_eq!(
            account_line(&account(true)),
            "# Builder\\_1 `ID #2PP`\n**Active**\n"
        );
        assert!(account_line(&account(false)).contains("**Inactive**"));
    }

    #[test]
    fn only_missing_accounts_count_as_invalid_tags() {
        assert!(is_unknown_tag(&AppError::NotFound {
            query: "/players/%232PP".into()
        }));
        assert!(is_unknown_tag(&AppError::Conversion("bad tag".into())));
        assert!(!is_unknown_tag(&AppError::Maintenance));
        assert!(!is_unknown_tag(&AppError::ClashApi {
            status: 500,
            reason: "unknownException".into(),
            message: "".into(),
        }));
    }

    #[test]
    fn list_title_mentions_search() {
        assert_eq!(list_title(AccountFilter::All, ""), "All accounts");
        assert_eq!(
            list_title(AccountFilter::Inactive, "bob"),
            "Inactive accounts matching `bob`"
        );
    }

    #[test]
    fn filters_map_to_tracking_state() {
        assert_eq!(AccountFilter::All.tracking_active(), None);
        assert_eq!(AccountFilter::Active.tracking_active(), Some(true));
        assert_eq!(AccountFilter::Inactive.tracking_active(), Some(false));
    }

    #[test]
    fn info_without_history_says_never() {
        let fields = info_fields(&account(true), &AccountStats::default(), None);
        assert_eq!(fields[1], ("Last update", "Never".to_string()));
        assert_eq!(fields[2], ("Tracking since", "Never".to_string()));
        assert_eq!(fields[3], ("Number of entries", "0".to_string()));
        assert_eq!(fields[4], ("Player", "None".to_string()));
    }

    #[test]
    fn info_names_the_owning_player() {
        let player = Player {
            player_id: 7,
            player_name: "Alice".into(),
            player_discord_id: None,
        };
        let fields = info_fields(&account(false), &AccountStats::default(), Some(&player));
        assert_eq!(fields[0].1, "Inactive");
        assert_eq!(fields[4].1, "Alice [7]");
    }
}
