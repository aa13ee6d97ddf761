//! Tracing subscriber setup used by the application.
//!
//! Besides stdout and the optional rolling log file, warnings and errors can be
//! forwarded to a Discord webhook. Records are buffered and flushed in batches
//! so a burst of errors does not hit the webhook rate limit.

use std::{env, sync::OnceLock, time::Duration};

use chrono::{DateTime, Utc};
use poise::serenity_prelude::{CreateEmbed, CreateEmbedFooter, ExecuteWebhook, Http, Webhook};
use tokio::sync::mpsc;
use tracing::{Event, Level, Subscriber, field::Field};
use tracing_appender::{
    non_blocking,
    non_blocking::NonBlocking,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, time::ChronoLocal, writer::BoxMakeWriter, writer::MakeWriterExt},
    layer::{Context, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::parse_flag;

/// Guard to ensure buffered logs are flushed on shutdown.
static LOG_GUARD: OnceLock<non_blocking::WorkerGuard> = OnceLock::new();

/// Target used for failures of the webhook forwarder itself. Never forwarded.
const WEBHOOK_TARGET: &str = "clashtrack::webhook_log";
/// Target of failed commands. Those are forwarded as full command reports instead.
pub(crate) const COMMAND_REPORT_TARGET: &str = "clashtrack::command_report";

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_EMBEDS_PER_MESSAGE: usize = 10;
const MAX_DESCRIPTION_LEN: usize = 4000;

/// Targets whose events are never forwarded, since sending the webhook produces them.
const IGNORED_TARGETS: [&str; 8] = [
    WEBHOOK_TARGET,
    COMMAND_REPORT_TARGET,
    "serenity",
    "hyper",
    "h2",
    "reqwest",
    "rustls",
    "tungstenite",
];

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub log_dir: Option<String>,
    pub max_files: Option<usize>,
    pub production: bool,
    pub webhook_url: Option<String>,
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self {
            log_dir: env::var("LOG_DIR").ok().filter(|v| !v.is_empty()),
            max_files: env::var("LOG_MAX_FILES")
                .ok()
                .and_then(|v| v.parse::<usize>().ok()),
            production: env::var("PRODUCTION").map(|v| parse_flag(&v)).unwrap_or(false),
            webhook_url: env::var("DISCORD_WEBHOOK_ERROR_URL")
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }
}

pub fn init(config: &LogConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let writer = match &config.log_dir {
        Some(dir) => match init_file_writer(dir, config.max_files) {
            Ok(file) if config.production => BoxMakeWriter::new(file),
            Ok(file) => {
                let stdout = std::io::stdout.with_max_level(Level::INFO);
                BoxMakeWriter::new(stdout.and(file))
            }
            Err(e) => {
                eprintln!("failed to create log file in {dir}: {e}");
                BoxMakeWriter::new(std::io::stdout)
            }
        },
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let fmt_layer = fmt::layer()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(false)
        .with_ansi(config.log_dir.is_none())
        .with_level(true)
        .with_writer(writer);

    let webhook_layer = config.webhook_url.clone().and_then(WebhookLayer::spawn);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(webhook_layer)
        .init();

    tracing::info!("logger initialized");
}

fn init_file_writer(dir: &str, max_files: Option<usize>) -> Result<NonBlocking, String> {
    let mut file_builder = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("clashtrack.log");

    if let Some(n) = max_files {
        file_builder = file_builder.max_log_files(n);
    }

    let file_appender = file_builder.build(dir).map_err(|e| e.to_string())?;

    let (file_writer, guard) = non_blocking(file_appender);

    // A second init would only happen in tests; the first guard stays alive.
    let _ = LOG_GUARD.set(guard);

    Ok(file_writer)
}

// ==================== Webhook forwarding ====================

#[derive(Debug, Clone)]
struct LogRecord {
    level: Level,
    target: String,
    message: String,
    fields: Vec<String>,
    location: Option<String>,
    timestamp: DateTime<Utc>,
}

/// Layer queuing WARN and ERROR events for the webhook flusher.
pub struct WebhookLayer {
    sender: mpsc::UnboundedSender<LogRecord>,
}

impl WebhookLayer {
    /// Starts the flush task. Returns `None` outside of a Tokio runtime.
    fn spawn(url: String) -> Option<Self> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        handle.spawn(flush_loop(url, receiver));
        Some(Self { sender })
    }
}

impl<S: Subscriber> Layer<S> for WebhookLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::WARN || is_ignored_target(meta.target()) {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let location = match (meta.file(), meta.line()) {
            (Some(file), Some(line)) => Some(format!("{file}:{line}")),
            (Some(file), None) => Some(file.to_string()),
            _ => None,
        };

        let _ = self.sender.send(LogRecord {
            level: *meta.level(),
            target: meta.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
            location,
            timestamp: Utc::now(),
        });
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: Vec<String>,
}

impl tracing::field::Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{} = {}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{} = {:?}", field.name(), value));
        }
    }
}

fn is_ignored_target(target: &str) -> bool {
    IGNORED_TARGETS.iter().any(|t| target.starts_with(t))
}

async fn flush_loop(url: String, mut receiver: mpsc::UnboundedReceiver<LogRecord>) {
    let http = Http::new("");
    let webhook = match Webhook::from_url(&http, &url).await {
        Ok(webhook) => webhook,
        Err(e) => {
            tracing::error!(target: WEBHOOK_TARGET, error = %e, "Could not resolve error webhook");
            return;
        }
    };

    let mut interval = tokio::time::interval(FLUSH_INTERVAL);
    loop {
        interval.tick().await;

        let mut pending = Vec::new();
        while let Ok(record) = receiver.try_recv() {
            pending.push(record);
        }
        if pending.is_empty() {
            if receiver.is_closed() {
                return;
            }
            continue;
        }

        for batch in pending.chunks(MAX_EMBEDS_PER_MESSAGE) {
            let embeds = batch.iter().map(record_embed).collect();
            let message = ExecuteWebhook::new().embeds(embeds);
            if let Err(e) = webhook.execute(&http, false, message).await {
                tracing::warn!(target: WEBHOOK_TARGET, error = %e, "Failed to forward log records");
            }
        }
    }
}

fn record_embed(record: &LogRecord) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(format!("{} {}", record.level, record.target))
        .description(record_description(record))
        .color(level_color(record.level))
        .timestamp(record.timestamp)
        .footer(CreateEmbedFooter::new("clashtrack"));
    if let Some(location) = &record.location {
        embed = embed.field("Location", location, false);
    }
    embed
}

fn record_description(record: &LogRecord) -> String {
    let mut body = record.message.clone();
    for field in &record.fields {
        body.push('\n');
        body.push_str(field);
    }
    // Leave room for the code fence.
    let body = truncate_chars(&body, MAX_DESCRIPTION_LEN - 8);
    format!("```\n{body}\n```")
}

fn level_color(level: Level) -> u32 {
    match level {
        Level::ERROR => 0xe74c3c,
        Level::WARN => 0xe67e22,
        Level::INFO => 0xf1c40f,
        _ => 0x979c9f,
    }
}

pub(crate) fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}
