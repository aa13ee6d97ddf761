//! User-facing error replies and the command reports sent to the error webhook.

use chrono::Utc;
use poise::serenity_prelude::{
    CreateAttachment, CreateEmbed, ExecuteWebhook, Http, ResolvedValue, Webhook,
};
use tracing::{error, warn};

use super::bot::{Context, Data};
use super::embeds::{self, Tone};
use crate::config::EmbedColors;
use crate::error::AppError;
use crate::logging::COMMAND_REPORT_TARGET;
use crate::time::{TimestampStyle, to_discord};

/// Traces longer than this are attached as a file instead of inlined.
const MAX_INLINE_TRACE: usize = 2000;

const GENERIC_TITLE: &str = "An error occurred.";

/// What the invoking user is told about an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMessage {
    pub title: &'static str,
    pub description: String,
    /// Whether the error is unexpected and gets reported to the developers.
    pub forward: bool,
}

impl UserMessage {
    fn new(title: &'static str, description: impl Into<String>, forward: bool) -> Self {
        Self {
            title,
            description: description.into(),
            forward,
        }
    }
}

pub fn classify(error: &AppError) -> UserMessage {
    match error {
        AppError::PermissionDenied(reason) => {
            UserMessage::new("Missing permissions.", reason.clone(), false)
        }
        AppError::Conversion(reason) => UserMessage::new("Nothing found.", reason.clone(), false),
        AppError::NotFound { .. } => UserMessage::new("Nothing found.", error.to_string(), false),
        AppError::Maintenance => UserMessage::new(
            "The Clash of Clans API is currently unresponsive.",
            "Please try again later",
            false,
        ),
        AppError::PrivateWarLog => UserMessage::new(GENERIC_TITLE, error.to_string(), false),
        _ => UserMessage::new(
            GENERIC_TITLE,
            "Please report this to a bot developer. Thank you!",
            true,
        ),
    }
}

pub async fn handle_error(error: poise::FrameworkError<'_, Data, AppError>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            let message = classify(&error);
            if message.forward {
                error!(
                    target: COMMAND_REPORT_TARGET,
                    error = ?error,
                    command = %ctx.command().qualified_name,
                    user_id = %ctx.author().id,
                    "🎮 ❌ Command execution failed"
                );
                reply(ctx, &message).await;
                forward_report(ctx, &format!("{error:?}")).await;
            } else {
                warn!(
                    error = %error,
                    command = %ctx.command().qualified_name,
                    "🎮 ⚠️ Command rejected"
                );
                reply(ctx, &message).await;
            }
        }
        poise::FrameworkError::CommandPanic { payload, ctx, .. } => {
            let payload = payload.unwrap_or_else(|| "panic without payload".into());
            error!(
                target: COMMAND_REPORT_TARGET,
                payload = %payload,
                command = %ctx.command().qualified_name,
                "🎮 ❌ Command panicked"
            );
            let message = classify(&AppError::Config(payload.clone()));
            reply(ctx, &message).await;
            forward_report(ctx, &payload).await;
        }
        poise::FrameworkError::ArgumentParse { error, input, ctx, .. } => {
            warn!(
                error = %error,
                command = %ctx.command().qualified_name,
                "🎮 ⚠️ Invalid command argument"
            );
            let description = match input {
                Some(input) => format!("Could not parse `{input}`: {error}"),
                None => "A needed Parameter is missing.".to_string(),
            };
            reply(ctx, &UserMessage::new(GENERIC_TITLE, description, false)).await;
        }
        poise::FrameworkError::CommandCheckFailed { error, ctx, .. } => {
            let message = match error {
                Some(error) => classify(&error),
                None => UserMessage::new(
                    "Missing permissions.",
                    "You are not allowed to use this command.",
                    false,
                ),
            };
            warn!(
                reason = %message.description,
                user_id = %ctx.author().id,
                command = %ctx.command().qualified_name,
                "🎮 ⚠️ Command check failed"
            );
            reply(ctx, &message).await;
        }
        poise::FrameworkError::CooldownHit {
            remaining_cooldown,
            ctx,
            ..
        } => {
            let description = format!(
                "This command is on cooldown, try again in {:.1}s.",
                remaining_cooldown.as_secs_f32()
            );
            reply(ctx, &UserMessage::new(GENERIC_TITLE, description, false)).await;
        }
        poise::FrameworkError::GuildOnly { ctx, .. } => {
            let description = format!(
                "{} can not be used in Private Messages.",
                ctx.command().qualified_name
            );
            reply(ctx, &UserMessage::new(GENERIC_TITLE, description, false)).await;
        }
        poise::FrameworkError::MissingBotPermissions {
            missing_permissions,
            ctx,
            ..
        } => {
            warn!(
                permissions = %missing_permissions,
                command = %ctx.command().qualified_name,
                "🎮 ⚠️ Bot missing permissions"
            );
            let description = format!("I am missing these permissions: {missing_permissions}");
            reply(ctx, &UserMessage::new("Missing permissions.", description, false)).await;
        }
        poise::FrameworkError::MissingUserPermissions {
            missing_permissions,
            ctx,
            ..
        } => {
            let description = match missing_permissions {
                Some(perms) => format!("You need these permissions: {perms}"),
                None => "Your permissions could not be checked.".to_string(),
            };
            warn!(
                user_id = %ctx.author().id,
                command = %ctx.command().qualified_name,
                "🎮 ⚠️ User missing permissions"
            );
            reply(ctx, &UserMessage::new("Missing permissions.", description, false)).await;
        }
        other => {
            error!(error = ?other, "🎮 ❌ Unhandled framework error");
        }
    }
}

async fn reply(ctx: Context<'_>, message: &UserMessage) {
    let embed = embeds::message(
        ctx.data().colors(),
        Tone::Error,
        message.title,
        &message.description,
    );
    if let Err(e) = ctx.send(poise::CreateReply::default().embed(embed)).await {
        warn!(error = ?e, "🎮 ⚠️ Failed to send error reply");
    }
}

/// Details of a failed invocation, as shown in the error webhook.
#[derive(Debug, Clone)]
struct CommandReport {
    author: String,
    location: String,
    information: String,
    command: String,
    trace: String,
}

impl CommandReport {
    fn from_ctx(ctx: Context<'_>, trace: &str) -> Self {
        let author = ctx.author();
        let channel_id = ctx.channel_id();
        let mut location = format!("Channel: <#{channel_id}> (ID: {channel_id})");
        if let Some(guild_id) = ctx.guild_id() {
            location.push_str(&format!("\nGuild: {guild_id}"));
        }

        let args = arguments(ctx);
        let mut command = format!("Command Name: {}\n", ctx.command().qualified_name);
        if !args.is_empty() {
            let rendered: Vec<_> = args
                .iter()
                .map(|(name, value)| format!("**{name}**:`{value}`"))
                .collect();
            command.push_str(&format!("Args: {}\n", rendered.join(" ")));
        }

        Self {
            author: format!("{} (ID: {})", author.name, author.id),
            location,
            information: format!(
                "Name: {}\nTime: {}",
                author.name,
                to_discord(Utc::now(), TimestampStyle::ShortDateTime)
            ),
            command,
            trace: trace.to_string(),
        }
    }

    fn into_message(self, colors: &EmbedColors) -> ExecuteWebhook {
        let (description, attachment) = render_trace(&self.trace);
        let embed = CreateEmbed::new()
            .title("Command Error")
            .color(colors.error)
            .description(description)
            .field("Author", self.author, true)
            .field("Location", self.location, false)
            .field("Information", self.information, false)
            .field("Command", self.command, false);

        let message = ExecuteWebhook::new().embed(embed);
        match attachment {
            Some(bytes) => message.add_file(CreateAttachment::bytes(bytes, "traceback.txt")),
            None => message,
        }
    }
}

/// Inlines short traces in a code block; longer ones become an attachment.
fn render_trace(trace: &str) -> (String, Option<Vec<u8>>) {
    if trace.chars().count() > MAX_INLINE_TRACE {
        (
            "Traceback was too long.".to_string(),
            Some(trace.as_bytes().to_vec()),
        )
    } else {
        (format!("```rust\n{trace}\n```"), None)
    }
}

fn arguments(ctx: Context<'_>) -> Vec<(String, String)> {
    match ctx {
        poise::Context::Application(app) => app
            .args
            .iter()
            .map(|option| (option.name.to_string(), option_value(&option.value)))
            .collect(),
        _ => Vec::new(),
    }
}

fn option_value(value: &ResolvedValue<'_>) -> String {
    match value {
        ResolvedValue::String(s) => s.to_string(),
        ResolvedValue::Integer(i) => i.to_string(),
        ResolvedValue::Number(n) => n.to_string(),
        ResolvedValue::Boolean(b) => b.to_string(),
        ResolvedValue::User(user, _) => format!("{} ({})", user.name, user.id),
        ResolvedValue::Role(role) => format!("{} ({})", role.name, role.id),
        other => format!("{other:?}"),
    }
}

async fn forward_report(ctx: Context<'_>, trace: &str) {
    let Some(url) = ctx.data().config.error_webhook_url.as_deref() else {
        return;
    };
    let message = CommandReport::from_ctx(ctx, trace).into_message(ctx.data().colors());

    let http = Http::new("");
    let result = match Webhook::from_url(&http, url).await {
        Ok(webhook) => webhook.execute(&http, false, message).await.map(|_| ()),
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!(target: COMMAND_REPORT_TARGET, error = ?e, "🎮 ⚠️ Failed to forward command report");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_errors_are_not_forwarded() {
        let denied = classify(&AppError::PermissionDenied(
            "You must be a `staff` to execute this command!".into(),
        ));
        assert_eq!(denied.title, "Missing permissions.");
        assert_eq!(
            denied.description,
            "You must be a `staff` to execute this command!"
        );
        assert!(!denied.forward);

        let conversion = classify(&AppError::Conversion("No account for `x` found".into()));
        assert_eq!(conversion.title, "Nothing found.");
        assert_eq!(conversion.description, "No account for `x` found");

        let missing = classify(&AppError::not_found("SELECT 1 WHERE id = $1", &[&3]));
        assert_eq!(missing.title, "Nothing found.");
        assert!(missing.description.contains("'3'"));
        assert!(!missing.forward);
    }

    #[test]
    fn maintenance_has_its_own_message() {
        let message = classify(&AppError::Maintenance);
        assert_eq!(
            message.title,
            "The Clash of Clans API is currently unresponsive."
        );
        assert!(!message.forward);
    }

    #[test]
    fn unexpected_errors_are_forwarded() {
        let message = classify(&AppError::Config("broken".into()));
        assert_eq!(message.title, GENERIC_TITLE);
        assert_eq!(
            message.description,
            "Please report this to a bot developer. Thank you!"
        );
        assert!(message.forward);

        let api = classify(&AppError::ClashApi {
            status: 500,
            reason: "unknownException".into(),
            message: String::new(),
        });
        assert!(api.forward);
    }

    #[test]
    fn short_traces_are_inlined() {
        let (description, attachment) = render_trace("Database(RowNotFound)");
        assert_eq!(description, "```rust\nDatabase(RowNotFound)\n```");
        assert!(attachment.is_none());
    }

    #[test]
    fn long_traces_are_attached() {
        let trace = "e".repeat(MAX_INLINE_TRACE + 1);
        let (description, attachment) = render_trace(&trace);
        assert_eq!(description, "Traceback was too long.");
        assert_eq!(attachment.map(|bytes| bytes.len()), Some(MAX_INLINE_TRACE + 1));
    }

    #[test]
    fn reports_use_the_error_color() {
        let report = CommandReport {
            author: "alice (ID: 1)".into(),
            location: "Channel: <#2> (ID: 2)".into(),
            information: "Name: alice".into(),
            command: "Command Name: accounts info\n".into(),
            trace: "Config(\"broken\")".into(),
        };
        let colors = EmbedColors::default();
        let message = serde_json::to_value(report.into_message(&colors)).unwrap();
        assert_eq!(message["embeds"][0]["color"], colors.error);
        assert_eq!(message["embeds"][0]["title"], "Command Error");
    }

    #[test]
    fn option_values_are_rendered_plainly() {
        assert_eq!(option_value(&ResolvedValue::String("#2PP")), "#2PP");
        assert_eq!(option_value(&ResolvedValue::Integer(42)), "42");
        assert_eq!(option_value(&ResolvedValue::Boolean(true)), "true");
    }
}
