use std::fmt::Display;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Nothing found for query: {query}")]
    NotFound { query: String },

    #[error("{0}")]
    Conversion(String),

    #[error("Clash of Clans API error: {status} - {reason}: {message}")]
    ClashApi {
        status: u16,
        reason: String,
        message: String,
    },

    #[error("The Clash of Clans API is under maintenance")]
    Maintenance,

    #[error("The war log of this clan is private")]
    PrivateWarLog,

    #[error("Discord error: {0}")]
    Discord(Box<serenity::Error>),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("Google Sheets error: {status} - {message}")]
    GoogleSheets { status: u16, message: String },

    #[error("Image generation error: {message}")]
    ImageGeneration { message: String },
}

impl From<serenity::Error> for AppError {
    fn from(err: serenity::Error) -> Self {
        AppError::Discord(Box::new(err))
    }
}

impl AppError {
    pub fn not_found(query: &str, args: &[&dyn Display]) -> Self {
        AppError::NotFound {
            query: format_query(query, args),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound { .. })
    }
}

/// Renders a query with its `$n` placeholders replaced by the bound values.
///
/// Placeholders are substituted from the highest index down so that `$1`
/// never eats the prefix of `$10`.
pub fn format_query(query: &str, args: &[&dyn Display]) -> String {
    let mut rendered = query.to_string();
    for (idx, arg) in args.iter().enumerate().rev() {
        rendered = rendered.replace(&format!("${}", idx + 1), &format!("'{arg}'"));
    }
    rendered.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_query_substitutes_placeholders() {
        let rendered = format_query(
            "SELECT * FROM accounts WHERE account_tag = $1 AND tracking_active = $2",
            &[&"#2PP", &true],
        );
        assert_eq!(
            rendered,
            "SELECT * FROM accounts WHERE account_tag = '#2PP' AND tracking_active = 'true'"
        );
    }

    #[test]
    fn format_query_handles_two_digit_placeholders() {
        let args: Vec<String> = (1..=10).map(|i| format!("v{i}")).collect();
        let refs: Vec<&dyn Display> = args.iter().map(|a| a as &dyn Display).collect();
        let rendered = format_query("$1 $10", &refs);
        assert_eq!(rendered, "'v1' 'v10'");
    }

    #[test]
    fn format_query_collapses_whitespace() {
        let rendered = format_query("SELECT 1\n        FROM players\n  WHERE player_id = $1", &[&4]);
        assert_eq!(rendered, "SELECT 1 FROM players WHERE player_id = '4'");
    }

    #[test]
    fn not_found_carries_rendered_query() {
        let err = AppError::not_found("SELECT * FROM players WHERE player_id = $1", &[&7]);
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Nothing found for query: SELECT * FROM players WHERE player_id = '7'"
        );
    }
}
