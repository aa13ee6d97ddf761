use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use poise::serenity_prelude::{self as serenity, CreateAttachment};
use tokio::process::Command;
use tracing::{info, instrument, warn};

use crate::db::models::TableColumn;
use crate::discord::bot::{self, Context, Data};
use crate::discord::embeds::{self, Tone};
use crate::discord::paginate::paginate;
use crate::error::AppError;
use crate::logging::truncate_chars;

/// Statements only devs may run through `/dev dblook`.
const WRITE_KEYWORDS: [&str; 5] = ["insert", "delete", "update", "drop", "alter"];
/// Upload limit of a Discord attachment.
const MAX_ATTACHMENT_BYTES: usize = 25 * 1024 * 1024;

/// Developer tools
#[poise::command(
    slash_command,
    guild_only,
    subcommands(
        "db_structure",
        "sql",
        "dblook",
        "dumpdb",
        "sync",
        "showcommands",
        "shutdown"
    ),
    subcommand_required
)]
pub async fn dev(_ctx: Context<'_>) -> Result<(), AppError> {
    Ok(())
}

/// Show the tables and columns of the database
#[poise::command(slash_command, check = "crate::discord::checks::dev")]
pub async fn db_structure(ctx: Context<'_>) -> Result<(), AppError> {
    let data = ctx.data();
    let columns = data.db.table_columns().await?;

    let pages = structure_pages(columns)
        .into_iter()
        .map(|(table, description)| {
            embeds::message(data.colors(), Tone::Info, format!("Table {table}"), description)
        })
        .collect();
    paginate(ctx, pages).await
}

/// Run a SQL statement
#[poise::command(slash_command, check = "crate::discord::checks::dev")]
#[instrument(skip(ctx), fields(user_id = %ctx.author().id))]
pub async fn sql(
    ctx: Context<'_>,
    #[description = "Statement to run"] query: String,
) -> Result<(), AppError> {
    let data = ctx.data();
    let query = strip_code_block(&query);
    info!(query = %query, "🎮 Running SQL from Discord");

    let result = if is_select(&query) {
        data.db.query_json(&query).await.map(|rows| {
            if rows.is_empty() {
                vec!["The query returned no rows.".to_string()]
            } else {
                embeds::paginate_lines(rows.iter().map(|row| format!("{row}\n")))
                    .into_iter()
                    .map(|page| format!("```json\n{page}```"))
                    .collect()
            }
        })
    } else {
        data.db
            .execute_raw(&query)
            .await
            .map(|affected| vec![format!("{affected} rows affected.")])
    };

    match result {
        Ok(pages) => {
            let pages = embeds::description_pages(
                data.colors(),
                Tone::Success,
                "The database returned the following result:",
                pages,
            );
            paginate(ctx, pages).await
        }
        Err(AppError::Database(e)) => database_error(ctx, data, &e).await,
        Err(e) => Err(e),
    }
}

/// Return the results of a read query as CSV
#[poise::command(slash_command, check = "crate::discord::checks::staff")]
#[instrument(skip(ctx), fields(user_id = %ctx.author().id))]
pub async fn dblook(
    ctx: Context<'_>,
    #[description = "Query to run"] query: String,
) -> Result<(), AppError> {
    let data = ctx.data();
    let query = strip_code_block(&query);
    if !data.config.is_dev(ctx.author().id.get()) && mentions_write(&query) {
        warn!(query = %query, "🎮 ⚠️ Refused dblook query");
        ctx.say(
            "There are words in your query which concerns me. Please ask a bot dev to run this query for you.",
        )
        .await?;
        return Ok(());
    }

    let rows = match data.db.query_json(&query).await {
        Ok(rows) => rows,
        Err(AppError::Database(e)) => return database_error(ctx, data, &e).await,
        Err(e) => return Err(e),
    };
    if rows.is_empty() {
        let embed = embeds::toned(data.colors(), Tone::Warning).title("The query returned no rows.");
        ctx.send(poise::CreateReply::default().embed(embed)).await?;
        return Ok(());
    }

    let csv = rows_to_csv(&rows)?;
    ctx.send(
        poise::CreateReply::default()
            .content(format!("Here is your result ({} rows)", rows.len()))
            .attachment(CreateAttachment::bytes(csv.into_bytes(), "result.csv")),
    )
    .await?;
    Ok(())
}

/// Dump the database with pg_dump
#[poise::command(slash_command, check = "crate::discord::checks::dev")]
#[instrument(skip(ctx), fields(user_id = %ctx.author().id))]
pub async fn dumpdb(ctx: Context<'_>) -> Result<(), AppError> {
    let data = ctx.data();
    info!("🎮 Starting database dump");

    let output = match Command::new("pg_dump")
        .arg(&data.config.database_url)
        .output()
        .await
    {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, "🎮 ⚠️ pg_dump failed");
            return dump_failed(ctx, data, stderr.trim()).await;
        }
        Err(e) => {
            warn!(error = %e, "🎮 ⚠️ Failed to run pg_dump");
            return dump_failed(ctx, data, &e.to_string()).await;
        }
    };

    let size = output.stdout.len();
    if size > MAX_ATTACHMENT_BYTES {
        let embed = embeds::message(
            data.colors(),
            Tone::Warning,
            "The dump is too large to be sent",
            format!("The dump has {size} bytes, Discord accepts {MAX_ATTACHMENT_BYTES}."),
        );
        ctx.send(poise::CreateReply::default().embed(embed)).await?;
        return Ok(());
    }

    info!(size, "🎮 ✅ Database dumped");
    ctx.send(
        poise::CreateReply::default()
            .content("Here is the database dump")
            .attachment(CreateAttachment::bytes(output.stdout, dump_file_name(Utc::now()))),
    )
    .await?;
    Ok(())
}

/// Register the slash commands again
#[poise::command(slash_command, check = "crate::discord::checks::dev")]
pub async fn sync(
    ctx: Context<'_>,
    #[description = "Register even if the commands look unchanged"] force: Option<bool>,
) -> Result<(), AppError> {
    let commands = &ctx.framework().options().commands;
    if !force.unwrap_or(false) {
        let registered: Vec<String> = serenity::Command::get_global_commands(ctx.http())
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        let local: Vec<String> = bot::global_commands(commands)
            .map(|c| c.name.clone())
            .collect();
        if same_names(registered, local) {
            let embed = embeds::message(
                ctx.data().colors(),
                Tone::Warning,
                "Commands are already in sync",
                "Use `force` to register them anyway.",
            );
            ctx.send(poise::CreateReply::default().embed(embed)).await?;
            return Ok(());
        }
    }
    bot::register_commands(ctx.serenity_context(), commands, &ctx.data().config).await?;

    let embed = embeds::toned(ctx.data().colors(), Tone::Success).title("Commands synced");
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// List the commands of the bot
#[poise::command(slash_command, check = "crate::discord::checks::staff")]
pub async fn showcommands(ctx: Context<'_>) -> Result<(), AppError> {
    let data = ctx.data();
    let mut groups = Vec::new();
    let mut ungrouped = Vec::new();
    for command in &ctx.framework().options().commands {
        if command.subcommands.is_empty() {
            ungrouped.push(command_line(&command.name, command.description.as_deref()));
        } else {
            let mut lines = Vec::new();
            collect_leaves(command, &mut lines);
            lines.sort();
            groups.push((command.name.clone(), lines.join("\n")));
        }
    }

    let mut pages: Vec<_> = groups
        .into_iter()
        .map(|(name, description)| {
            embeds::message(
                data.colors(),
                Tone::Info,
                format!("Commands of the {name} group"),
                description,
            )
        })
        .collect();
    if !ungrouped.is_empty() {
        ungrouped.sort();
        pages.extend(embeds::description_pages(
            data.colors(),
            Tone::Info,
            "Ungrouped commands",
            embeds::paginate_lines(ungrouped.iter().map(|line| format!("{line}\n"))),
        ));
    }
    paginate(ctx, pages).await
}

/// Shut the bot down
#[poise::command(slash_command, check = "crate::discord::checks::dev")]
pub async fn shutdown(ctx: Context<'_>) -> Result<(), AppError> {
    warn!(user_id = %ctx.author().id, "🎮 Shutdown requested");
    ctx.say("Shutting down!").await?;
    ctx.framework().shard_manager().shutdown_all().await;
    Ok(())
}

async fn dump_failed(ctx: Context<'_>, data: &Data, reason: &str) -> Result<(), AppError> {
    let embed = embeds::message(
        data.colors(),
        Tone::Error,
        "The database dump failed",
        truncate_chars(reason, embeds::MAX_DESCRIPTION),
    );
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

async fn database_error(ctx: Context<'_>, data: &Data, error: &sqlx::Error) -> Result<(), AppError> {
    let embed = embeds::message(
        data.colors(),
        Tone::Error,
        "The database returned the following error:",
        truncate_chars(&error.to_string(), embeds::MAX_DESCRIPTION),
    );
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Columns grouped per table, one `(table, description)` page each.
fn structure_pages(columns: Vec<TableColumn>) -> Vec<(String, String)> {
    let mut tables: BTreeMap<String, String> = BTreeMap::new();
    for column in columns {
        let nullable = if column.is_nullable == "YES" { "" } else { " not null" };
        tables.entry(column.table_name).or_default().push_str(&format!(
            "**{}** `{}`{nullable}\n",
            embeds::escape_markdown(&column.column_name),
            column.data_type
        ));
    }
    tables.into_iter().collect()
}

/// Removes surrounding code fences and backticks.
fn strip_code_block(query: &str) -> String {
    let query = query.trim();
    let query = if let Some(inner) = query.strip_prefix("```").and_then(|q| q.strip_suffix("```")) {
        inner.strip_prefix("sql").unwrap_or(inner)
    } else if let Some(inner) = query.strip_prefix('`').and_then(|q| q.strip_suffix('`')) {
        inner
    } else {
        query
    };
    query.trim().to_string()
}

fn is_select(query: &str) -> bool {
    query
        .split_whitespace()
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case("select") || word.eq_ignore_ascii_case("with"))
}

fn mentions_write(query: &str) -> bool {
    let query = query.to_lowercase();
    WRITE_KEYWORDS.iter().any(|word| query.contains(word))
}

/// Renders `row_to_json` objects as CSV, headed by the columns of the first row.
fn rows_to_csv(rows: &[String]) -> Result<String, AppError> {
    let mut csv = String::new();
    for (idx, row) in rows.iter().enumerate() {
        let serde_json::Value::Object(map) = serde_json::from_str(row)? else {
            return Err(AppError::Conversion(format!("Unexpected row: {row}")));
        };
        if idx == 0 {
            push_record(&mut csv, map.keys().map(String::as_str));
        }
        let cells: Vec<String> = map.into_iter().map(|(_, value)| cell_text(value)).collect();
        push_record(&mut csv, cells.iter().map(String::as_str));
    }
    Ok(csv)
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn push_record<'a>(csv: &mut String, cells: impl Iterator<Item = &'a str>) {
    let cells: Vec<String> = cells.map(escape_csv).collect();
    csv.push_str(&cells.join(","));
    csv.push('\n');
}

fn escape_csv(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

fn dump_file_name(at: DateTime<Utc>) -> String {
    format!("dump-{}.sql", at.format("%Y-%m-%dT%H-%M"))
}

/// Whether both lists hold the same command names, in any order.
fn same_names(mut registered: Vec<String>, mut local: Vec<String>) -> bool {
    registered.sort();
    local.sort();
    registered == local
}

fn command_line(name: &str, description: Option<&str>) -> String {
    format!("**{name}** {}", description.unwrap_or_default())
}

fn collect_leaves(command: &poise::Command<Data, AppError>, lines: &mut Vec<String>) {
    if command.subcommands.is_empty() {
        lines.push(command_line(
            &command.qualified_name,
            command.description.as_deref(),
        ));
    }
    for sub in &command.subcommands {
        collect_leaves(sub, lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(table: &str, name: &str, nullable: &str) -> TableColumn {
        TableColumn {
            table_name: table.into(),
            column_name: name.into(),
            data_type: "text".into(),
            is_nullable: nullable.into(),
        }
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_block("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_block("`SELECT 1`"), "SELECT 1");
        assert_eq!(strip_code_block("  SELECT 1 "), "SELECT 1");
    }

    #[test]
    fn reads_are_told_apart_from_writes() {
        assert!(is_select("select * from accounts"));
        assert!(is_select("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!is_select("UPDATE accounts SET tracking_active = false"));
        assert!(!is_select(""));
    }

    #[test]
    fn write_keywords_are_detected_case_insensitively() {
        assert!(mentions_write("DROP TABLE players"));
        assert!(mentions_write("select 1; Delete from accounts"));
        assert!(!mentions_write("SELECT account_name FROM accounts"));
    }

    #[test]
    fn rows_become_csv() {
        let rows = vec![
            r##"{"account_tag":"#2PP","account_name":"Bob, the builder","trophies":5000,"player":null}"##
                .to_string(),
            r##"{"account_tag":"#9QQ","account_name":"say \"hi\"","trophies":4200,"player":3}"##
                .to_string(),
        ];
        assert_eq!(
            rows_to_csv(&rows).unwrap(),
            "account_tag,account_name,trophies,player\n\
             #2PP,\"Bob, the builder\",5000,\n\
             #9QQ,\"say \"\"hi\"\"\",4200,3\n"
        );
    }

    #[test]
    fn non_object_rows_are_rejected() {
        assert!(rows_to_csv(&["[1, 2]".to_string()]).is_err());
    }

    #[test]
    fn dump_files_are_named_after_the_minute() {
        let at = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 3, 9, 14, 5, 59).unwrap();
        assert_eq!(dump_file_name(at), "dump-2024-03-09T14-05.sql");
    }

    #[test]
    fn command_names_are_compared_as_sets() {
        let names = |list: &[&str]| list.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        assert!(same_names(
            names(&["players", "accounts", "tracking"]),
            names(&["accounts", "tracking", "players"])
        ));
        assert!(!same_names(names(&["accounts"]), names(&["accounts", "players"])));
    }

    #[test]
    fn structure_is_grouped_per_table() {
        let pages = structure_pages(vec![
            column("players", "player_id", "NO"),
            column("accounts", "account_tag", "NO"),
            column("players", "player_name", "YES"),
        ]);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].0, "accounts");
        assert_eq!(
            pages[1].1,
            "**player\\_id** `text` not null\n**player\\_name** `text`\n"
        );
    }
}
