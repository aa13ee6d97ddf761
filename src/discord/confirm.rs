use std::time::Duration;

use poise::serenity_prelude::{
    ButtonStyle, ComponentInteractionCollector, CreateActionRow, CreateButton, CreateEmbed,
    CreateInteractionResponse, CreateInteractionResponseMessage, UserId,
};

use super::bot::Context;
use crate::error::AppError;

/// Asks `confirmer` to confirm the action shown in `embed`. Returns `false`
/// when the action is denied or nobody answers before the timeout.
pub async fn confirm(
    ctx: Context<'_>,
    embed: CreateEmbed,
    confirmer: UserId,
) -> Result<bool, AppError> {
    let prefix = ctx.id().to_string();
    let yes = format!("{prefix}confirm");
    let no = format!("{prefix}deny");

    let buttons = vec![
        CreateButton::new(&yes).label("Confirm").style(ButtonStyle::Success),
        CreateButton::new(&no).label("Cancel").style(ButtonStyle::Danger),
    ];
    let handle = ctx
        .send(
            poise::CreateReply::default()
                .content(format!("<@{confirmer}>"))
                .embed(embed)
                .components(vec![CreateActionRow::Buttons(buttons)]),
        )
        .await?;
    let message_id = handle.message().await?.id;
    let timeout = Duration::from_secs(ctx.data().config.settings.ui.confirm_timeout_secs);

    let answer = ComponentInteractionCollector::new(ctx)
        .author_id(confirmer)
        .channel_id(ctx.channel_id())
        .message_id(message_id)
        .timeout(timeout)
        .filter(move |i| i.data.custom_id.starts_with(&prefix))
        .await;

    let Some(interaction) = answer else {
        handle
            .edit(
                ctx,
                poise::CreateReply::default()
                    .content("No answer, action was denied")
                    .components(Vec::new()),
            )
            .await?;
        return Ok(false);
    };

    let confirmed = interaction.data.custom_id == yes;
    interaction
        .create_response(
            ctx,
            CreateInteractionResponse::UpdateMessage(
                CreateInteractionResponseMessage::new()
                    .content(outcome_text(confirmed))
                    .components(Vec::new()),
            ),
        )
        .await?;
    Ok(confirmed)
}

fn outcome_text(confirmed: bool) -> &'static str {
    if confirmed {
        "Action was confirmed"
    } else {
        "Action was denied"
    }
}
