//! Google Sheets access through the REST API with a stored OAuth2 refresh token.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, error, info, instrument};

use crate::config::SheetsConfig;
use crate::db::Repository;
use crate::db::models::AccountExportRow;
use crate::error::AppError;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const API_URL: &str = "https://sheets.googleapis.com/v4";
/// Tokens are renewed this long before Google expires them.
const TOKEN_MARGIN_SECS: u64 = 120;
const EXPORT_RANGE: &str = "A1:ZZ";

static SHEET_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/spreadsheets/d/([a-zA-Z0-9_-]+)").expect("valid regex"));

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    valid_until: Instant,
}

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Option<Vec<Vec<Value>>>,
}

#[derive(Debug, Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    title: String,
    sheet_id: i64,
}

pub struct SheetsClient {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    token_url: String,
    api_url: String,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for SheetsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetsClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl SheetsClient {
    pub fn new(config: &SheetsConfig) -> Self {
        Self::with_urls(config, TOKEN_URL, API_URL)
    }

    pub fn with_urls(config: &SheetsConfig, token_url: &str, api_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            refresh_token: config.refresh_token.clone(),
            token_url: token_url.trim_end_matches('/').to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, AppError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.valid_until
        {
            return Ok(token.access_token.clone());
        }

        let res = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await?;
        let token: TokenResponse = check_status(res).await?.json().await?;
        debug!(expires_in = token.expires_in, "📄 Google access token refreshed");

        let lifetime = token.expires_in.saturating_sub(TOKEN_MARGIN_SECS);
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            valid_until: Instant::now() + Duration::from_secs(lifetime),
        });
        Ok(token.access_token)
    }

    fn values_url(&self, sheet_id: &str) -> String {
        format!("{}/spreadsheets/{}/values", self.api_url, urlencoding::encode(sheet_id))
    }

    /// Reads a range as rows of cell text. An empty range is `NotFound`.
    pub async fn read(&self, sheet_id: &str, range: &str) -> Result<Vec<Vec<String>>, AppError> {
        let url = format!("{}/{}", self.values_url(sheet_id), urlencoding::encode(range));
        let res = self
            .client
            .get(&url)
            .query(&[("majorDimension", "ROWS")])
            .bearer_auth(self.access_token().await?)
            .send()
            .await?;
        let body: ValueRange = check_status(res).await?.json().await?;

        let values = body.values.ok_or_else(|| AppError::NotFound {
            query: format!("{sheet_id}!{range}"),
        })?;
        Ok(values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    /// Writes each block of rows to the matching range.
    pub async fn write(
        &self,
        sheet_id: &str,
        ranges: &[String],
        values: &[Vec<Vec<String>>],
    ) -> Result<(), AppError> {
        if ranges.len() != values.len() {
            return Err(AppError::GoogleSheets {
                status: 400,
                message: format!("{} ranges but {} value blocks", ranges.len(), values.len()),
            });
        }
        let data: Vec<Value> = ranges
            .iter()
            .zip(values)
            .map(|(range, rows)| json!({"range": range, "majorDimension": "ROWS", "values": rows}))
            .collect();

        let res = self
            .client
            .post(format!("{}:batchUpdate", self.values_url(sheet_id)))
            .bearer_auth(self.access_token().await?)
            .json(&json!({"valueInputOption": "USER_ENTERED", "data": data}))
            .send()
            .await?;
        check_status(res).await?;
        Ok(())
    }

    pub async fn clear(&self, sheet_id: &str, ranges: &[String]) -> Result<(), AppError> {
        let res = self
            .client
            .post(format!("{}:batchClear", self.values_url(sheet_id)))
            .bearer_auth(self.access_token().await?)
            .json(&json!({"ranges": ranges}))
            .send()
            .await?;
        check_status(res).await?;
        Ok(())
    }

    /// Tab titles mapped to their sheet ids.
    pub async fn sheet_titles(&self, sheet_id: &str) -> Result<Vec<(String, i64)>, AppError> {
        let res = self
            .client
            .get(format!("{}/spreadsheets/{}", self.api_url, urlencoding::encode(sheet_id)))
            .query(&[("fields", "sheets.properties")])
            .bearer_auth(self.access_token().await?)
            .send()
            .await?;
        let spreadsheet: Spreadsheet = check_status(res).await?.json().await?;
        Ok(spreadsheet
            .sheets
            .into_iter()
            .map(|s| (s.properties.title, s.properties.sheet_id))
            .collect())
    }
}

async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, AppError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body: Value = res.json().await.unwrap_or(Value::Null);
    let message = match status.as_u16() {
        403 => "I don't have the permission to access the Google Sheet".to_string(),
        404 => "The Google Sheet id is invalid".to_string(),
        _ => body["error"]["message"]
            .as_str()
            .or_else(|| body["error_description"].as_str())
            .unwrap_or("Unexpected response")
            .to_string(),
    };
    Err(AppError::GoogleSheets {
        status: status.as_u16(),
        message,
    })
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Pulls the id out of a spreadsheet URL. Anything else is returned unchanged.
pub fn extract_sheet_id(url_or_id: &str) -> String {
    SHEET_ID
        .captures(url_or_id)
        .and_then(|c| c.get(1))
        .map_or_else(|| url_or_id.trim().to_string(), |m| m.as_str().to_string())
}

/// A1 notation of a 1-indexed cell, e.g. `(1, 27)` is `AA1`.
pub fn a1_cell(row: usize, col: usize) -> String {
    let mut letters = Vec::new();
    let mut col = col;
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        col = (col - 1) / 26;
    }
    letters.reverse();
    format!("{}{row}", letters.into_iter().collect::<String>())
}

const EXPORT_HEADER: [&str; 14] = [
    "Name",
    "Tag",
    "Player",
    "Tracking",
    "Last Updated",
    "Builder Hall",
    "Trophies",
    "Best Trophies",
    "Halls Destroyed",
    "Number of Attacks",
    "Number of 3*",
    "3* Rate",
    "1* Rate",
    "War Defenses",
];

fn rate(part: i64, total: i64) -> String {
    if total == 0 {
        "0".to_string()
    } else {
        format!("{:.2}", part as f64 / total as f64)
    }
}

fn opt(value: Option<i32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn export_rows(accounts: &[AccountExportRow]) -> Vec<Vec<String>> {
    let mut rows = vec![EXPORT_HEADER.iter().map(|h| h.to_string()).collect::<Vec<_>>()];
    rows.extend(accounts.iter().map(|a| {
        vec![
            a.account_name.clone(),
            a.account_tag.clone(),
            a.player_name.clone().unwrap_or_default(),
            a.tracking_active.to_string(),
            a.last_updated
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_default(),
            opt(a.builder_hall_level),
            opt(a.builder_base_trophies),
            opt(a.best_builder_base_trophies),
            opt(a.builder_base_halls_destroyed),
            a.attacks.to_string(),
            a.three_stars.to_string(),
            rate(a.three_stars, a.attacks),
            rate(a.one_stars, a.attacks),
            a.defenses.to_string(),
        ]
    }));
    rows
}

/// Replaces the export sheet with the current account stats. Returns the number of accounts.
#[instrument(skip(db, sheets))]
pub async fn export_account_stats(
    db: &Repository,
    sheets: &SheetsClient,
    sheet_id: &str,
) -> Result<usize, AppError> {
    let accounts = db.export_rows().await?;
    let rows = export_rows(&accounts);
    let range = format!("A1:{}", a1_cell(rows.len(), EXPORT_HEADER.len()));

    sheets.clear(sheet_id, &[EXPORT_RANGE.to_string()]).await?;
    sheets.write(sheet_id, &[range], &[rows]).await?;
    info!(accounts = accounts.len(), "📄 ✅ Account stats exported");
    Ok(accounts.len())
}

pub async fn run_export(db: Repository, sheets: Arc<SheetsClient>, sheet_id: String, interval_secs: u64) {
    let mut interval = interval(Duration::from_secs(interval_secs));

    info!(interval_secs, "📄 Sheet export started");

    loop {
        interval.tick().await;

        if let Err(e) = export_account_stats(&db, &sheets, &sheet_id).await {
            error!(error = ?e, "📄 ❌ Sheet export failed");
        }
    }
}
