//! PNG result posters for finished wars.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use tiny_skia::Pixmap;
use tracing::{debug, info, warn};
use usvg::fontdb::Database;
use usvg::{Options, Tree};

use super::outcome::{Outcome, clan_outcome};
use crate::clash::types::{ClanWarDto, WarClanDto};
use crate::error::AppError;

const SVG_TEMPLATE: &str = include_str!("../../assets/war_poster.svg");

pub struct PosterGenerator {
    http: Client,
    fontdb: Arc<Database>,
}

impl PosterGenerator {
    pub fn new() -> Result<Self, AppError> {
        let http = Client::builder().user_agent("clashtrack/0.1").build()?;

        let mut fontdb = Database::new();
        fontdb.load_system_fonts();
        info!(font_count = fontdb.len(), "🖼️ Loaded system fonts");

        Ok(Self {
            http,
            fontdb: Arc::new(fontdb),
        })
    }

    pub async fn generate(&self, match_id: i32, war: &ClanWarDto) -> Result<Vec<u8>, AppError> {
        let badge1 = self.fetch_badge(&war.clan).await;
        let badge2 = self.fetch_badge(&war.opponent).await;
        let svg = build_svg(match_id, war, badge1.as_deref(), badge2.as_deref());
        self.render_svg_to_png(&svg)
    }

    async fn fetch_badge(&self, clan: &WarClanDto) -> Option<String> {
        let url = clan.badge_urls.as_ref().map(|b| {
            if b.medium.is_empty() { &b.small } else { &b.medium }
        })?;
        if url.is_empty() {
            return None;
        }

        match self.http.get(url.as_str()).send().await {
            Ok(response) if response.status().is_success() => match response.bytes().await {
                Ok(bytes) => Some(format!("data:image/png;base64,{}", STANDARD.encode(&bytes))),
                Err(e) => {
                    warn!(url, error = ?e, "🖼️ ⚠️ Failed to read badge bytes");
                    None
                }
            },
            Ok(response) => {
                warn!(url, status = response.status().as_u16(), "🖼️ ⚠️ Badge fetch failed");
                None
            }
            Err(e) => {
                warn!(url, error = ?e, "🖼️ ⚠️ Badge request failed");
                None
            }
        }
    }

    fn render_svg_to_png(&self, svg_content: &str) -> Result<Vec<u8>, AppError> {
        let options = Options {
            fontdb: self.fontdb.clone(),
            ..Default::default()
        };

        let tree =
            Tree::from_str(svg_content, &options).map_err(|e| AppError::ImageGeneration {
                message: format!("Failed to parse SVG: {}", e),
            })?;

        let size = tree.size();
        let (width, height) = (size.width() as u32, size.height() as u32);

        let mut pixmap = Pixmap::new(width, height).ok_or_else(|| AppError::ImageGeneration {
            message: "Failed to create pixmap".to_string(),
        })?;

        resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

        let png_data = pixmap.encode_png().map_err(|e| AppError::ImageGeneration {
            message: format!("Failed to encode PNG: {}", e),
        })?;

        debug!(width, height, size = png_data.len(), "🖼️ ✅ Poster generated");
        Ok(png_data)
    }
}

fn build_svg(match_id: i32, war: &ClanWarDto, badge1: Option<&str>, badge2: Option<&str>) -> String {
    let outcome = clan_outcome(war);
    let (result1, result2) = match outcome {
        Outcome::Win => (Outcome::Win, Outcome::Loss),
        Outcome::Loss => (Outcome::Loss, Outcome::Win),
        other => (other, other),
    };

    let war_date = war
        .end_time
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    let mut svg = SVG_TEMPLATE.to_string();
    let replacements = [
        ("{{war_type}}", war.war_type().unwrap_or("war").to_uppercase()),
        ("{{team_size}}", war.team_size.unwrap_or_default().to_string()),
        ("{{war_date}}", war_date),
        ("{{clan1_name}}", xml_escape(&war.clan.name)),
        ("{{clan1_tag}}", xml_escape(&war.clan.tag)),
        ("{{clan2_name}}", xml_escape(&war.opponent.name)),
        ("{{clan2_tag}}", xml_escape(&war.opponent.tag)),
        ("{{result1}}", result1.as_str().to_uppercase()),
        ("{{result2}}", result2.as_str().to_uppercase()),
        ("{{result1_fill}}", result_fill(result1).to_string()),
        ("{{result2_fill}}", result_fill(result2).to_string()),
        ("{{stars1}}", war.clan.stars.to_string()),
        ("{{stars2}}", war.opponent.stars.to_string()),
        ("{{destruction1}}", format!("{:.2}", war.clan.destruction_percentage)),
        ("{{destruction2}}", format!("{:.2}", war.opponent.destruction_percentage)),
        ("{{duration1}}", format_duration(war.clan.average_attack_duration())),
        ("{{duration2}}", format_duration(war.opponent.average_attack_duration())),
        ("{{match_id}}", match_id.to_string()),
    ];
    for (placeholder, value) in replacements {
        svg = svg.replace(placeholder, &value);
    }

    svg = conditional_image(&svg, "badge1", badge1);
    conditional_image(&svg, "badge2", badge2)
}

/// Keeps a `{{#name}}...{{/name}}` block with the data URI filled in, or drops it.
fn conditional_image(svg: &str, name: &str, data_uri: Option<&str>) -> String {
    let tag_open = format!("{{{{#{name}}}}}");
    let tag_close = format!("{{{{/{name}}}}}");
    let placeholder = format!("{{{{{name}}}}}");

    match data_uri {
        Some(uri) => svg
            .replace(&tag_open, "")
            .replace(&tag_close, "")
            .replace(&placeholder, uri),
        None => {
            let mut result = svg.to_string();
            if let (Some(start), Some(end)) = (result.find(&tag_open), result.find(&tag_close)) {
                result.replace_range(start..end + tag_close.len(), "");
            }
            result
        }
    }
}

fn result_fill(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Win => "url(#winGradient)",
        Outcome::Loss => "url(#lossGradient)",
        Outcome::Tie | Outcome::Ongoing => "url(#tieGradient)",
    }
}

fn format_duration(secs: f64) -> String {
    let total = secs.round() as i64;
    format!("{}:{:02}", total / 60, total % 60)
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clash::types::tests::war_json;

    fn war() -> ClanWarDto {
        serde_json::from_value(war_json()).unwrap()
    }

    #[test]
    fn svg_contains_both_sides() {
        let svg = build_svg(42, &war(), None, None);
        assert!(svg.contains("Alpha"));
        assert!(svg.contains("Bravo"));
        assert!(svg.contains("5 - 3"));
        assert!(svg.contains("90.00% - 60.00%"));
        assert!(svg.contains("2:30 - 1:30"));
        assert!(svg.contains(">WIN<"));
        assert!(svg.contains(">LOSS<"));
        assert!(svg.contains("Match #42"));
        assert!(!svg.contains("{{"));
        assert!(!svg.contains("<image"));
    }

    #[test]
    fn badges_are_embedded_when_present() {
        let svg = build_svg(1, &war(), Some("data:image/png;base64,AAAA"), None);
        assert_eq!(svg.matches("<image").count(), 1);
        assert!(svg.contains("xlink:href=\"data:image/png;base64,AAAA\""));
    }

    #[test]
    fn names_are_escaped() {
        let mut war = war();
        war.clan.name = "<Alpha & Co>".into();
        let svg = build_svg(1, &war, None, None);
        assert!(svg.contains("&lt;Alpha &amp; Co&gt;"));
    }

    #[test]
    fn template_renders_to_png() {
        let generator = PosterGenerator::new().unwrap();
        let svg = build_svg(7, &war(), None, None);
        let png = generator.render_svg_to_png(&svg).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }
}
