//! Interactive paging through a list of embeds.

use std::collections::BTreeSet;
use std::time::Duration;

use poise::serenity_prelude::{
    ButtonStyle, ComponentInteractionCollector, ComponentInteractionDataKind, CreateActionRow,
    CreateButton, CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
    CreateSelectMenu, CreateSelectMenuKind, CreateSelectMenuOption, ReactionType,
};
use tracing::debug;

use super::bot::Context;
use crate::error::AppError;

/// Discord caps select menus at this many options.
const MAX_SELECT_OPTIONS: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    First,
    Previous,
    Next,
    Last,
    Exit,
}

impl Action {
    const ALL: [Action; 5] = [
        Action::First,
        Action::Previous,
        Action::Next,
        Action::Last,
        Action::Exit,
    ];

    fn id(self) -> &'static str {
        match self {
            Action::First => "first",
            Action::Previous => "previous",
            Action::Next => "next",
            Action::Last => "last",
            Action::Exit => "exit",
        }
    }

    fn emoji(self) -> &'static str {
        match self {
            Action::First => "⏮️",
            Action::Previous => "⏪",
            Action::Next => "⏩",
            Action::Last => "⏭️",
            Action::Exit => "⏹️",
        }
    }

    /// Page shown after the action, `None` for exit.
    fn apply(self, index: usize, total: usize) -> Option<usize> {
        match self {
            Action::First => Some(0),
            Action::Previous => Some((index + total - 1) % total),
            Action::Next => Some((index + 1) % total),
            Action::Last => Some(total - 1),
            Action::Exit => None,
        }
    }
}

/// Sends `pages` and lets the invoking user flip through them until the
/// paginator times out or is closed. A single page is sent as is.
pub async fn paginate(ctx: Context<'_>, pages: Vec<CreateEmbed>) -> Result<(), AppError> {
    let total = pages.len();
    let Some(first) = pages.first().cloned() else {
        return Ok(());
    };
    if total == 1 {
        ctx.send(poise::CreateReply::default().embed(first)).await?;
        return Ok(());
    }

    let prefix = ctx.id().to_string();
    let mut index = 0;
    let handle = ctx
        .send(
            poise::CreateReply::default()
                .embed(first)
                .components(components(&prefix, index, total)),
        )
        .await?;
    let message_id = handle.message().await?.id;
    let timeout = Duration::from_secs(ctx.data().config.settings.ui.paginator_timeout_secs);

    while let Some(interaction) = ComponentInteractionCollector::new(ctx)
        .author_id(ctx.author().id)
        .channel_id(ctx.channel_id())
        .message_id(message_id)
        .timeout(timeout)
        .filter({
            let prefix = prefix.clone();
            move |i| i.data.custom_id.starts_with(&prefix)
        })
        .await
    {
        let id = &interaction.data.custom_id[prefix.len()..];
        let next = if id == "select" {
            match &interaction.data.kind {
                ComponentInteractionDataKind::StringSelect { values } => values
                    .first()
                    .and_then(|v| v.parse::<usize>().ok())
                    .filter(|page| *page < total),
                _ => None,
            }
        } else {
            Action::ALL
                .iter()
                .find(|action| action.id() == id)
                .and_then(|action| action.apply(index, total))
        };

        let Some(next) = next else {
            interaction
                .create_response(
                    ctx,
                    CreateInteractionResponse::UpdateMessage(
                        CreateInteractionResponseMessage::new().components(Vec::new()),
                    ),
                )
                .await?;
            return Ok(());
        };

        index = next;
        interaction
            .create_response(
                ctx,
                CreateInteractionResponse::UpdateMessage(
                    CreateInteractionResponseMessage::new()
                        .embed(pages[index].clone())
                        .components(components(&prefix, index, total)),
                ),
            )
            .await?;
    }

    debug!(pages = total, "🎮 Paginator timed out");
    handle
        .edit(
            ctx,
            poise::CreateReply::default()
                .embed(pages[index].clone())
                .components(Vec::new()),
        )
        .await?;
    Ok(())
}

fn components(prefix: &str, index: usize, total: usize) -> Vec<CreateActionRow> {
    let options = selector_options(index, total)
        .into_iter()
        .map(|page| {
            CreateSelectMenuOption::new(format!("Page {}/{total}", page + 1), page.to_string())
        })
        .collect();
    let select = CreateSelectMenu::new(
        format!("{prefix}select"),
        CreateSelectMenuKind::String { options },
    )
    .placeholder(format!("Page {}/{total}", index + 1));

    let buttons = Action::ALL
        .iter()
        .map(|action| {
            let disabled = match action {
                Action::First => index == 0,
                Action::Last => index + 1 == total,
                _ => false,
            };
            CreateButton::new(format!("{prefix}{}", action.id()))
                .emoji(ReactionType::Unicode(action.emoji().to_string()))
                .style(ButtonStyle::Secondary)
                .disabled(disabled)
        })
        .collect();

    vec![
        CreateActionRow::SelectMenu(select),
        CreateActionRow::Buttons(buttons),
    ]
}

/// Pages offered in the select menu: every other page when they fit, otherwise
/// the pages closest to the current one.
fn selector_options(index: usize, total: usize) -> Vec<usize> {
    let mut options = BTreeSet::new();
    let mut distance = 1;
    while options.len() < MAX_SELECT_OPTIONS && options.len() + 1 < total {
        if let Some(before) = index.checked_sub(distance) {
            options.insert(before);
        }
        if options.len() < MAX_SELECT_OPTIONS && index + distance < total {
            options.insert(index + distance);
        }
        distance += 1;
    }
    options.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_paginators_offer_every_other_page() {
        assert_eq!(selector_options(1, 4), vec![0, 2, 3]);
        assert_eq!(selector_options(0, 2), vec![1]);
        assert_eq!(selector_options(0, 26).len(), 25);
    }

    #[test]
    fn large_paginators_center_on_current_page() {
        let options = selector_options(50, 100);
        assert_eq!(options.len(), MAX_SELECT_OPTIONS);
        assert_eq!(options.first(), Some(&37));
        assert_eq!(options.last(), Some(&62));
        assert!(!options.contains(&50));
    }

    #[test]
    fn options_shift_at_the_edges() {
        let start = selector_options(0, 100);
        assert_eq!(start, (1..=25).collect::<Vec<_>>());

        let end = selector_options(99, 100);
        assert_eq!(end, (74..=98).collect::<Vec<_>>());
    }

    #[test]
    fn buttons_wrap_around() {
        assert_eq!(Action::Next.apply(4, 5), Some(0));
        assert_eq!(Action::Previous.apply(0, 5), Some(4));
        assert_eq!(Action::Last.apply(1, 5), Some(4));
        assert_eq!(Action::First.apply(3, 5), Some(0));
        assert_eq!(Action::Exit.apply(3, 5), None);
    }
}
