use tracing::{info, instrument};

use super::battles::{BattleFilter, BattleLogOptions, OpponentFilter, send_battle_log};
use crate::db::models::{Account, TrackedClan};
use crate::discord::bot::Context;
use crate::discord::embeds::{self, Tone};
use crate::discord::paginate::paginate;
use crate::error::AppError;
use crate::gsheets;
use crate::time::{TimestampStyle, to_discord};

/// Tracking of battles, wars and the export sheet
#[poise::command(
    slash_command,
    subcommands("versus_log", "wars", "export"),
    subcommand_required
)]
pub async fn tracking(_ctx: Context<'_>) -> Result<(), AppError> {
    Ok(())
}

/// Logs between two accounts
#[poise::command(slash_command, check = "crate::discord::checks::staff")]
pub async fn versus_log(
    ctx: Context<'_>,
    #[description = "Account whose battles are shown"]
    #[autocomplete = "crate::discord::autocomplete::account"]
    account1: String,
    #[description = "Opponent of the battles"]
    #[autocomplete = "crate::discord::autocomplete::account"]
    account2: String,
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
    let account = Account::resolve(db, &account1).await?;
    let opponent = Account::resolve(db, &account2).await?;
    send_battle_log(
        ctx,
        db,
        &account,
        Some(&opponent),
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

/// Show the clans whose wars are tracked
#[poise::command(slash_command, check = "crate::discord::checks::staff")]
pub async fn wars(ctx: Context<'_>) -> Result<(), AppError> {
    let data = ctx.data();
    let clans = data.db.list_tracked_clans().await?;
    if clans.is_empty() {
        let embed = embeds::message(
            data.colors(),
            Tone::Error,
            "No clans are tracked",
            "Clans are tracked once they are part of a team.",
        );
        ctx.send(poise::CreateReply::default().embed(embed)).await?;
        return Ok(());
    }

    let pages = embeds::description_pages(
        data.colors(),
        Tone::Info,
        &format!("Tracked clans ({})", clans.len()),
        embeds::paginate_lines(clans.iter().map(clan_line)),
    );
    paginate(ctx, pages).await
}

/// Write the account stats to the export sheet now
#[poise::command(slash_command, check = "crate::discord::checks::staff")]
#[instrument(skip(ctx), fields(user_id = %ctx.author().id))]
pub async fn export(ctx: Context<'_>) -> Result<(), AppError> {
    let data = ctx.data();
    let (Some(sheets), Some(config)) = (&data.sheets, &data.config.sheets) else {
        let embed = embeds::message(
            data.colors(),
            Tone::Warning,
            "Google Sheets is not configured",
            "Set the Google credentials and the export sheet to use the export.",
        );
        ctx.send(poise::CreateReply::default().embed(embed)).await?;
        return Ok(());
    };

    let exported = gsheets::export_account_stats(&data.db, sheets, &config.export_sheet_id).await?;
    info!(accounts = exported, "🎮 Manual export done");

    let embed = embeds::message(
        data.colors(),
        Tone::Success,
        "Export done",
        format!("Exported the stats of {exported} accounts."),
    );
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

fn clan_line(clan: &TrackedClan) -> String {
    let state = clan.state.as_deref().unwrap_or("unchecked");
    let mut line = format!("**{}** `{state}`", clan.clantag);
    if let Some(api_state) = clan.api_state.as_deref() {
        line.push_str(&format!(" (API: {api_state})"));
    }
    if let Some(match_id) = clan.match_id {
        line.push_str(&format!(" match #{match_id}"));
    }
    line.push_str(&format!(
        "\nNext check {}\n",
        to_discord(clan.next_check, TimestampStyle::Relative)
    ));
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn clan(state: Option<&str>, match_id: Option<i32>) -> TrackedClan {
        TrackedClan {
            clantag: "#2Y0".into(),
            team_id: Some(3),
            state: state.map(Into::into),
            api_state: state.map(|_| "inWar".to_string()),
            last_checked: None,
            next_check: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            match_id,
        }
    }

    #[test]
    fn clan_lines_show_state_and_next_check() {
        assert_eq!(
            clan_line(&clan(Some("warstarted"), Some(9))),
            "**#2Y0** `warstarted` (API: inWar) match #9\nNext check <t:1700000000:R>\n"
        );
    }

    #[test]
    fn unchecked_clans_are_marked() {
        assert_eq!(
            clan_line(&clan(None, None)),
            "**#2Y0** `unchecked`\nNext check <t:1700000000:R>\n"
        );
    }
}
