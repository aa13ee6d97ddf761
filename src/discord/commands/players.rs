use poise::ChoiceParameter;
use poise::serenity_prelude as serenity;
use tracing::{info, instrument};

use crate::db::models::{Account, Player};
use crate::discord::bot::Context;
use crate::discord::confirm::confirm;
use crate::discord::embeds::{self, Tone};
use crate::discord::paginate::paginate;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ChoiceParameter)]
pub enum PlayerFilter {
    #[name = "all"]
    All,
    #[name = "has discord"]
    HasDiscord,
    #[name = "no discord"]
    NoDiscord,
}

impl PlayerFilter {
    fn has_discord(self) -> Option<bool> {
        match self {
            PlayerFilter::All => None,
            PlayerFilter::HasDiscord => Some(true),
            PlayerFilter::NoDiscord => Some(false),
        }
    }
}

/// What connecting `wanted` to a player currently linked to `current` amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkAction {
    Disconnect(u64),
    Nothing,
    AlreadyConnected,
    Connect(u64),
}

fn link_action(current: Option<u64>, wanted: Option<u64>) -> LinkAction {
    match (current, wanted) {
        (Some(old), None) => LinkAction::Disconnect(old),
        (None, None) => LinkAction::Nothing,
        (Some(old), Some(new)) if old == new => LinkAction::AlreadyConnected,
        (_, Some(new)) => LinkAction::Connect(new),
    }
}

/// Manage the players known to the bot
#[poise::command(
    slash_command,
    subcommands("create", "manage", "list", "info", "account"),
    subcommand_required
)]
pub async fn players(_ctx: Context<'_>) -> Result<(), AppError> {
    Ok(())
}

/// Create a new player
#[poise::command(slash_command, check = "crate::discord::checks::staff")]
#[instrument(skip(ctx), fields(user_id = %ctx.author().id))]
pub async fn create(
    ctx: Context<'_>,
    #[description = "Name of the player"] name: String,
    #[description = "Discord account of the player"] user: Option<serenity::User>,
) -> Result<(), AppError> {
    let data = ctx.data();
    let name = name.trim().to_string();
    let discord_id = user.as_ref().map(|u| u.id.get());

    if let Some(discord_id) = discord_id {
        let existing = data.db.players_by_discord(discord_id).await?;
        if !existing.is_empty() {
            let embed = embeds::message(
                data.colors(),
                Tone::Error,
                format!("Player with discord id {discord_id} already exists"),
                player_lines(&existing),
            );
            ctx.send(poise::CreateReply::default().embed(embed)).await?;
            return Ok(());
        }
    }

    let similar = data.db.players_like(&name).await?;
    if !similar.is_empty() {
        let prompt = embeds::message(
            data.colors(),
            Tone::Warning,
            "There are already players with a similar name",
            format!(
                "{}\nDo you still want to create the player {}?",
                player_lines(&similar),
                embeds::escape_markdown(&name)
            ),
        );
        if !confirm(ctx, prompt, ctx.author().id).await? {
            let embed = embeds::toned(data.colors(), Tone::Error).title("Player creation cancelled");
            ctx.send(poise::CreateReply::default().embed(embed)).await?;
            return Ok(());
        }
    }

    let player_id = data.db.insert_player(&name, discord_id).await?;
    info!(player_id, name = %name, "🎮 Player created");

    let mut description = format!(
        "This player is now in the bot as {} [{player_id}].",
        embeds::escape_markdown(&name)
    );
    if let Some(discord_id) = discord_id {
        description.push_str(&format!(" <@{discord_id}> is connected."));
    }
    let embed = embeds::message(
        data.colors(),
        Tone::Success,
        format!("Player {} added to the bot.", embeds::escape_markdown(&name)),
        description,
    );
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Change the details of a player
#[poise::command(slash_command, subcommands("manage_user"), subcommand_required)]
pub async fn manage(_ctx: Context<'_>) -> Result<(), AppError> {
    Ok(())
}

/// Connect or disconnect the discord account of a player
#[poise::command(
    slash_command,
    rename = "user",
    check = "crate::discord::checks::staff"
)]
#[instrument(skip(ctx), fields(user_id = %ctx.author().id))]
pub async fn manage_user(
    ctx: Context<'_>,
    #[description = "Player to manage"]
    #[autocomplete = "crate::discord::autocomplete::player"]
    player: String,
    #[description = "Discord account to connect, leave empty to disconnect"]
    user: Option<serenity::User>,
) -> Result<(), AppError> {
    let data = ctx.data();
    let player = Player::resolve(&data.db, &player).await?;
    let label = player_label(&player);

    let embed = match link_action(player.discord_id(), user.map(|u| u.id.get())) {
        LinkAction::Disconnect(old) => {
            data.db.set_player_discord(player.player_id, None).await?;
            info!(player_id = player.player_id, discord_id = old, "🎮 Discord account disconnected");
            embeds::message(
                data.colors(),
                Tone::Success,
                format!("Disconnected discord account from player {label}."),
                format!("<@{old}> [{old}] is no longer connected to this player."),
            )
        }
        LinkAction::Nothing => embeds::message(
            data.colors(),
            Tone::Warning,
            format!("Player {label} has no discord account."),
            "There is nothing to do.",
        ),
        LinkAction::AlreadyConnected => embeds::toned(data.colors(), Tone::Success).title(
            format!("Player {label} has already connected this discord account."),
        ),
        LinkAction::Connect(discord_id) => {
            let others: Vec<Player> = data
                .db
                .players_by_discord(discord_id)
                .await?
                .into_iter()
                .filter(|p| p.player_id != player.player_id)
                .collect();
            if others.is_empty() {
                data.db
                    .set_player_discord(player.player_id, Some(discord_id))
                    .await?;
                info!(player_id = player.player_id, discord_id, "🎮 Discord account connected");
                embeds::message(
                    data.colors(),
                    Tone::Success,
                    format!("Connected discord account to player {label}."),
                    format!("This player is now connected to <@{discord_id}> [{discord_id}]."),
                )
            } else {
                embeds::message(
                    data.colors(),
                    Tone::Error,
                    format!("Discord id {discord_id} is already connected to another player"),
                    player_lines(&others),
                )
            }
        }
    };
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// List the players of the bot
#[poise::command(slash_command, check = "crate::discord::checks::staff")]
pub async fn list(
    ctx: Context<'_>,
    #[description = "Filter by connected discord account"] filter: Option<PlayerFilter>,
    #[description = "Only players whose name contains this"] search: Option<String>,
) -> Result<(), AppError> {
    let data = ctx.data();
    let filter = filter.unwrap_or(PlayerFilter::All);
    let search = search.unwrap_or_default();

    let players = data
        .db
        .list_players(filter.has_discord(), search.trim())
        .await?;
    if players.is_empty() {
        let embed = embeds::toned(data.colors(), Tone::Error).title("No players found");
        ctx.send(poise::CreateReply::default().embed(embed)).await?;
        return Ok(());
    }

    let pages = embeds::description_pages(
        data.colors(),
        Tone::Success,
        &list_title(filter, search.trim()),
        embeds::paginate_lines(players.iter().map(list_line)),
    );
    paginate(ctx, pages).await
}

/// Show a player and their accounts
#[poise::command(slash_command, check = "crate::discord::checks::staff")]
pub async fn info(
    ctx: Context<'_>,
    #[description = "Player to show"]
    #[autocomplete = "crate::discord::autocomplete::player"]
    player: String,
) -> Result<(), AppError> {
    let data = ctx.data();
    let player = Player::resolve(&data.db, &player).await?;
    let accounts = data.db.player_accounts(player.player_id, None).await?;

    let title = format!("Player {}", player_label(&player));
    let pages = if accounts.is_empty() {
        vec!["This player has no accounts.".to_string()]
    } else {
        embeds::paginate_lines(accounts.iter().map(owned_account_line))
    };
    let replies = embeds::description_pages(data.colors(), Tone::Success, &title, pages)
        .into_iter()
        .map(|embed| match player.discord_id() {
            Some(id) => embed.field("Discord", format!("<@{id}> [{id}]"), false),
            None => embed,
        })
        .collect();
    paginate(ctx, replies).await
}

/// Manage the accounts of a player
#[poise::command(slash_command, subcommands("add", "remove"), subcommand_required)]
pub async fn account(_ctx: Context<'_>) -> Result<(), AppError> {
    Ok(())
}

/// Add an account to a player
#[poise::command(slash_command, check = "crate::discord::checks::staff")]
#[instrument(skip(ctx), fields(user_id = %ctx.author().id))]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Player to add the account to"]
    #[autocomplete = "crate::discord::autocomplete::player"]
    player: String,
    #[description = "Account to add"]
    #[autocomplete = "crate::discord::autocomplete::account"]
    account: String,
) -> Result<(), AppError> {
    let data = ctx.data();
    let player = Player::resolve(&data.db, &player).await?;
    let account = Account::resolve(&data.db, &account).await?;

    let embed = match data.db.account_player(&account.account_tag).await? {
        Some(owner) => embeds::toned(data.colors(), Tone::Warning).title(format!(
            "Account {} is already in player {}.",
            account.account_tag,
            player_label(&owner)
        )),
        None => {
            data.db
                .add_account_to_player(player.player_id, &account.account_tag)
                .await?;
            info!(player_id = player.player_id, account_tag = %account.account_tag, "🎮 Account added to player");
            embeds::toned(data.colors(), Tone::Success).title(format!(
                "Account {} added to player {}.",
                account.account_tag,
                player_label(&player)
            ))
        }
    };
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Remove an account from a player
#[poise::command(slash_command, check = "crate::discord::checks::staff")]
#[instrument(skip(ctx), fields(user_id = %ctx.author().id))]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Player to remove the account from"]
    #[autocomplete = "crate::discord::autocomplete::player"]
    player: String,
    #[description = "Account to remove"]
    #[autocomplete = "crate::discord::autocomplete::player_account"]
    account: String,
) -> Result<(), AppError> {
    let data = ctx.data();
    let player = Player::resolve(&data.db, &player).await?;
    let account = Account::resolve(&data.db, &account).await?;

    let removed = data
        .db
        .remove_account_from_player(player.player_id, &account.account_tag)
        .await?;
    let embed = if removed {
        info!(player_id = player.player_id, account_tag = %account.account_tag, "🎮 Account removed from player");
        embeds::toned(data.colors(), Tone::Success).title(format!(
            "Account {} removed from player {}.",
            account.account_tag,
            player_label(&player)
        ))
    } else {
        embeds::toned(data.colors(), Tone::Warning).title(format!(
            "Account {} is not in player {}.",
            account.account_tag,
            player_label(&player)
        ))
    };
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

fn player_label(player: &Player) -> String {
    format!(
        "{} ({})",
        embeds::escape_markdown(&player.player_name),
        player.player_id
    )
}

/// `#id name (discord)` lines used when pointing at conflicting players.
fn player_lines(players: &[Player]) -> String {
    players
        .iter()
        .map(|p| {
            let discord = p
                .discord_id()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "no discord".into());
            format!(
                "#{} {} ({discord})\n",
                p.player_id,
                embeds::escape_markdown(&p.player_name)
            )
        })
        .collect()
}

fn list_title(filter: PlayerFilter, search: &str) -> String {
    let mut title = match filter {
        PlayerFilter::All => "Players",
        PlayerFilter::HasDiscord => "Players with discord",
        PlayerFilter::NoDiscord => "Players without discord",
    }
    .to_string();
    if !search.is_empty() {
        title.push_str(&format!(" matching `{search}`"));
    }
    title
}

fn list_line(player: &Player) -> String {
    let mut line = format!(
        "# {} `ID {}`\n",
        embeds::escape_markdown(&player.player_name),
        player.player_id
    );
    if let Some(id) = player.discord_id() {
        line.push_str(&format!("`{id}` <@{id}>\n"));
    }
    line.push('\n');
    line
}

fn owned_account_line(account: &Account) -> String {
    format!(
        "- {} ({}) {}\n",
        embeds::escape_markdown(&account.account_name),
        account.account_tag,
        account.tracking_label()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(discord: Option<i64>) -> Player {
        Player {
            player_id: 12,
            player_name: "Alice".into(),
            player_discord_id: discord,
        }
    }

    #[test]
    fn link_action_covers_every_case() {
        assert_eq!(link_action(Some(5), None), LinkAction::Disconnect(5));
        assert_eq!(link_action(None, None), LinkAction::Nothing);
        assert_eq!(link_action(Some(5), Some(5)), LinkAction::AlreadyConnected);
        assert_eq!(link_action(Some(5), Some(6)), LinkAction::Connect(6));
        assert_eq!(link_action(None, Some(6)), LinkAction::Connect(6));
    }

    #[test]
    fn list_lines_mention_connected_discord() {
        assert_eq!(list_line(&player(None)), "# Alice `ID 12`\n\n");
        assert_eq!(
            list_line(&player(Some(42))),
            "# Alice `ID 12`\n`42` <@42>\n\n"
        );
    }

    #[test]
    fn list_title_follows_filter_and_search() {
        assert_eq!(list_title(PlayerFilter::All, ""), "Players");
        assert_eq!(
            list_title(PlayerFilter::NoDiscord, "ali"),
            "Players without discord matching `ali`"
        );
        assert_eq!(PlayerFilter::HasDiscord.has_discord(), Some(true));
    }

    #[test]
    fn conflicting_players_are_listed_with_discord_id() {
        let lines = player_lines(&[player(Some(42)), player(None)]);
        assert_eq!(lines, "#12 Alice (42)\n#12 Alice (no discord)\n");
    }

    #[test]
    fn owned_accounts_show_tracking_status() {
        let account = Account {
            account_tag: "#2PP".into(),
            account_name: "Main".into(),
            tracking_active: false,
            last_updated: None,
        };
        assert_eq!(owned_account_line(&account), "- Main (#2PP) Inactive\n");
    }
}
