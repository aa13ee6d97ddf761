use poise::serenity_prelude::CreateEmbed;

use crate::config::EmbedColors;

/// Longest description put into a single page.
pub const MAX_DESCRIPTION: usize = 2000;
/// Fields per page. Discord allows 25, the last slot stays free for a footer field.
pub const MAX_FIELDS: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Warning,
    Error,
    Info,
}

impl Tone {
    pub fn color(self, colors: &EmbedColors) -> u32 {
        match self {
            Tone::Success => colors.success,
            Tone::Warning => colors.warning,
            Tone::Error => colors.error,
            Tone::Info => colors.info,
        }
    }
}

pub fn toned(colors: &EmbedColors, tone: Tone) -> CreateEmbed {
    CreateEmbed::new().color(tone.color(colors))
}

pub fn message(
    colors: &EmbedColors,
    tone: Tone,
    title: impl Into<String>,
    description: impl Into<String>,
) -> CreateEmbed {
    toned(colors, tone).title(title).description(description)
}

/// Escapes the characters Discord would read as markdown.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '~' | '_' | '|' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Joins entries into descriptions of at most [`MAX_DESCRIPTION`] characters.
/// An entry is never split; a single oversized entry gets a page of its own.
pub fn paginate_lines<I, S>(entries: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut pages = Vec::new();
    let mut current = String::new();

    for entry in entries {
        let entry = entry.as_ref();
        if !current.is_empty()
            && current.chars().count() + entry.chars().count() > MAX_DESCRIPTION
        {
            pages.push(std::mem::take(&mut current));
        }
        current.push_str(entry);
    }
    if !current.is_empty() {
        pages.push(current);
    }
    pages
}

pub fn chunk_fields<T>(fields: Vec<T>) -> Vec<Vec<T>> {
    let mut pages = Vec::new();
    let mut fields = fields.into_iter().peekable();
    while fields.peek().is_some() {
        pages.push(fields.by_ref().take(MAX_FIELDS).collect());
    }
    pages
}

/// One embed per page, all sharing title and colour.
pub fn description_pages(
    colors: &EmbedColors,
    tone: Tone,
    title: &str,
    pages: Vec<String>,
) -> Vec<CreateEmbed> {
    pages
        .into_iter()
        .map(|page| message(colors, tone, title, page))
        .collect()
}

pub fn field_pages(
    colors: &EmbedColors,
    tone: Tone,
    title: &str,
    description: &str,
    fields: Vec<(String, String)>,
) -> Vec<CreateEmbed> {
    chunk_fields(fields)
        .into_iter()
        .map(|page| {
            let mut embed = message(colors, tone, title, description);
            for (name, value) in page {
                embed = embed.field(name, value, false);
            }
            embed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_characters_are_escaped() {
        assert_eq!(escape_markdown("a_b*c`d|e~f"), "a\\_b\\*c\\`d\\|e\\~f");
        assert_eq!(escape_markdown("plain name"), "plain name");
    }

    #[test]
    fn lines_break_into_pages_before_the_limit() {
        let entry = format!("{}\n", "x".repeat(599));
        let pages = paginate_lines(vec![entry.clone(); 7]);

        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0], entry.repeat(3));
        assert_eq!(pages[2], entry);
        assert!(pages.iter().all(|p| p.chars().count() <= MAX_DESCRIPTION));
    }

    #[test]
    fn oversized_entry_keeps_its_own_page() {
        let big = "y".repeat(MAX_DESCRIPTION + 10);
        let pages = paginate_lines(["a\n", big.as_str(), "b\n"]);
        assert_eq!(pages, vec!["a\n".to_string(), big.clone(), "b\n".to_string()]);
    }

    #[test]
    fn no_lines_give_no_pages() {
        assert!(paginate_lines(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn fields_are_chunked_by_page_size() {
        let chunks = chunk_fields((0..50).collect());
        let sizes: Vec<_> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![24, 24, 2]);
        assert_eq!(chunks[2], vec![48, 49]);
        assert!(chunk_fields(Vec::<u8>::new()).is_empty());
    }

    #[test]
    fn tones_pick_configured_colors() {
        let colors = EmbedColors::default();
        assert_eq!(Tone::Error.color(&colors), colors.error);
        assert_eq!(Tone::Success.color(&colors), colors.success);
    }
}
