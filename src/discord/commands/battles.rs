//! Battle log rendering shared by `/accounts battle_log` and `/tracking versus_log`.

use chrono::{DateTime, Duration, Utc};
use poise::ChoiceParameter;

use crate::db::models::{Account, BattleRow};
use crate::db::{BattleQuery, Repository};
use crate::discord::bot::Context;
use crate::discord::embeds::{self, Tone};
use crate::discord::paginate::paginate;
use crate::error::AppError;
use crate::time::{self, TimestampStyle, to_discord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ChoiceParameter)]
pub enum OpponentFilter {
    #[name = "all"]
    All,
    #[name = "known opponents"]
    Known,
    #[name = "unknown opponents"]
    Unknown,
}

impl OpponentFilter {
    fn label(self) -> &'static str {
        match self {
            OpponentFilter::All => "all",
            OpponentFilter::Known => "known opponents",
            OpponentFilter::Unknown => "unknown opponents",
        }
    }

    fn keeps(self, row: &BattleRow) -> bool {
        match self {
            OpponentFilter::All => true,
            OpponentFilter::Known => row.s_tag.is_some(),
            OpponentFilter::Unknown => row.s_tag.is_none(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ChoiceParameter)]
pub enum BattleFilter {
    #[name = "all"]
    All,
    #[name = "attacks"]
    Attacks,
    #[name = "defenses"]
    Defenses,
}

impl BattleFilter {
    fn label(self) -> &'static str {
        match self {
            BattleFilter::All => "all",
            BattleFilter::Attacks => "attacks",
            BattleFilter::Defenses => "defenses",
        }
    }
}

/// Raw options of a battle log command.
pub struct BattleLogOptions {
    pub after: Option<String>,
    pub before: Option<String>,
    pub filter_opponent: Option<OpponentFilter>,
    pub filter_battle: Option<BattleFilter>,
    pub limit: Option<i64>,
}

/// Options with defaults applied and datetimes parsed.
#[derive(Debug, Clone, Copy)]
struct Window {
    after: DateTime<Utc>,
    before: DateTime<Utc>,
    filter_opponent: OpponentFilter,
    filter_battle: BattleFilter,
    limit: i64,
}

impl BattleLogOptions {
    fn resolve(self, ctx: Context<'_>, now: DateTime<Utc>) -> Result<Window, AppError> {
        let tracking = &ctx.data().config.settings.tracking;
        let after = match self.after.as_deref() {
            Some(input) => time::parse(input, now)?,
            None => now - Duration::days(tracking.battle_log_days),
        };
        let before = match self.before.as_deref() {
            Some(input) => time::parse(input, now)?,
            None => now,
        };
        Ok(Window {
            after,
            before,
            filter_opponent: self.filter_opponent.unwrap_or(OpponentFilter::All),
            filter_battle: self.filter_battle.unwrap_or(BattleFilter::All),
            limit: self.limit.unwrap_or(tracking.battle_log_limit),
        })
    }
}

/// Sends the battle log of `account`, optionally only against `opponent`.
pub async fn send_battle_log(
    ctx: Context<'_>,
    db: &Repository,
    account: &Account,
    opponent: Option<&Account>,
    options: BattleLogOptions,
) -> Result<(), AppError> {
    let window = options.resolve(ctx, Utc::now())?;
    let colors = ctx.data().colors();

    let rows = db
        .battle_log(&BattleQuery {
            account_tag: &account.account_tag,
            after: window.after,
            before: window.before,
            limit: window.limit,
            opponent: opponent.map(|o| o.account_tag.as_str()),
        })
        .await?;

    let fields: Vec<(String, String)> = rows
        .iter()
        .filter(|row| window.filter_opponent.keeps(row))
        .filter_map(|row| battle_field(row, window.filter_battle))
        .collect();

    let subject = match opponent {
        Some(o) => format!("{} vs {}", account.account_tag, o.account_tag),
        None => account.account_tag.clone(),
    };
    if fields.is_empty() {
        let embed = embeds::toned(colors, Tone::Error).title(format!(
            "No battles found for account {subject} between {} and {} with {}{}.",
            to_discord(window.after, TimestampStyle::Combined),
            to_discord(window.before, TimestampStyle::Combined),
            window.filter_opponent.label(),
            battle_suffix(window.filter_battle),
        ));
        ctx.send(poise::CreateReply::default().embed(embed)).await?;
        return Ok(());
    }

    let title = match opponent {
        Some(o) => format!(
            "Battle log for account {} ({}) vs {} ({})",
            account.account_tag, account.account_name, o.account_tag, o.account_name
        ),
        None => format!(
            "Battle log for account {} ({})",
            account.account_tag, account.account_name
        ),
    };
    let description = format!(
        "Showing {} battles between {} and {} with {}{}",
        fields.len(),
        to_discord(window.after, TimestampStyle::Combined),
        to_discord(window.before, TimestampStyle::Combined),
        window.filter_opponent.label(),
        battle_suffix(window.filter_battle),
    );

    paginate(
        ctx,
        embeds::field_pages(colors, Tone::Success, &title, &description, fields),
    )
    .await
}

fn battle_suffix(filter: BattleFilter) -> String {
    match filter {
        BattleFilter::All => String::new(),
        other => format!(" showing only {}", other.label()),
    }
}

/// Embed field for one trophy change, `None` when the battle kind is filtered out.
fn battle_field(row: &BattleRow, filter: BattleFilter) -> Option<(String, String)> {
    let diff = row.p_trophies_diff.unwrap_or(0);
    let (kind, emoji) = if diff > 0 {
        if filter == BattleFilter::Defenses {
            return None;
        }
        ("Attack", "➕")
    } else if diff < 0 {
        if filter == BattleFilter::Attacks {
            return None;
        }
        ("Defense", "➖")
    } else {
        ("Battle", "❓")
    };

    let opponent = embeds::escape_markdown(row.s_name.as_deref().unwrap_or("unknown"));
    let mut name = format!("{kind} against {opponent}");
    if let Some(tag) = &row.s_tag {
        let trophies = row
            .s_trophies
            .map(|t| t.to_string())
            .unwrap_or_else(|| "?".into());
        name.push_str(&format!(" ({tag}, 🏆{trophies})"));
    }

    let value = format!(
        "{}\n🏆{} {emoji} {} -> {}",
        to_discord(row.requested_at, TimestampStyle::Combined),
        row.p_trophies - diff,
        diff.abs(),
        row.p_trophies
    );
    Some((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(diff: Option<i32>, opponent: Option<(&str, &str, i32)>) -> BattleRow {
        BattleRow {
            p_name: "Builder".into(),
            p_tag: "#2PP".into(),
            requested_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            p_trophies: 5000,
            p_trophies_diff: diff,
            s_name: opponent.map(|o| o.0.to_string()),
            s_tag: opponent.map(|o| o.1.to_string()),
            s_trophies: opponent.map(|o| o.2),
        }
    }

    #[test]
    fn attacks_show_gained_trophies() {
        let (name, value) = battle_field(&row(Some(30), None), BattleFilter::All).unwrap();
        assert_eq!(name, "Attack against unknown");
        assert!(value.ends_with("🏆4970 ➕ 30 -> 5000"));
    }

    #[test]
    fn defenses_name_the_known_opponent() {
        let opponent = Some(("Some_one", "#8QU", 4800));
        let (name, value) = battle_field(&row(Some(-25), opponent), BattleFilter::All).unwrap();
        assert_eq!(name, "Defense against Some\\_one (#8QU, 🏆4800)");
        assert!(value.ends_with("🏆5025 ➖ 25 -> 5000"));
    }

    #[test]
    fn missing_difference_is_an_unknown_battle() {
        let (name, _) = battle_field(&row(None, None), BattleFilter::Attacks).unwrap();
        assert_eq!(name, "Battle against unknown");
    }

    #[test]
    fn battle_filter_drops_the_other_kind() {
        assert!(battle_field(&row(Some(30), None), BattleFilter::Defenses).is_none());
        assert!(battle_field(&row(Some(-30), None), BattleFilter::Attacks).is_none());
        assert!(battle_field(&row(Some(-30), None), BattleFilter::Defenses).is_some());
    }

    #[test]
    fn opponent_filter_checks_the_joined_account() {
        let known = row(Some(30), Some(("Rival", "#8QU", 4900)));
        let unknown = row(Some(30), None);
        assert!(OpponentFilter::Known.keeps(&known));
        assert!(!OpponentFilter::Known.keeps(&unknown));
        assert!(OpponentFilter::Unknown.keeps(&unknown));
        assert!(OpponentFilter::All.keeps(&known));
    }

    #[test]
    fn description_mentions_battle_filter_only_when_set() {
        assert_eq!(battle_suffix(BattleFilter::All), "");
        assert_eq!(battle_suffix(BattleFilter::Attacks), " showing only attacks");
    }
}
