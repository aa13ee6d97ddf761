//! Player and clan tag helpers.

/// Normalizes a tag the way the game displays it: uppercase, `O` read as `0`,
/// with a single leading `#`.
pub fn normalize(tag: &str) -> String {
    let body: String = tag
        .trim()
        .trim_start_matches('#')
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .map(|c| if c == 'O' { '0' } else { c })
        .collect();
    format!("#{body}")
}

/// Normalized and percent-encoded tag, ready to be put in a request path.
pub fn encode(tag: &str) -> String {
    urlencoding::encode(&normalize(tag)).into_owned()
}

/// Whether the input can possibly be a tag. Used to skip API calls for names.
pub fn looks_like_tag(input: &str) -> bool {
    const ALLOWED: &str = "0289PYLQGRJCUV";
    let normalized = normalize(input);
    let body = &normalized[1..];
    (3..=12).contains(&body.len()) && body.chars().all(|c| ALLOWED.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_hash_and_uppercases() {
        assert_eq!(normalize("2pp"), "#2PP");
        assert_eq!(normalize("  #2pp "), "#2PP");
        assert_eq!(normalize("##2PP"), "#2PP");
    }

    #[test]
    fn normalize_replaces_letter_o_with_zero() {
        assert_eq!(normalize("#Y0URPG2G8"), "#Y0URPG2G8");
        assert_eq!(normalize("#yourpg2g8"), "#Y0URPG2G8");
    }

    #[test]
    fn encode_escapes_hash() {
        assert_eq!(encode("2pp"), "%232PP");
    }

    #[test]
    fn looks_like_tag_rejects_names() {
        assert!(looks_like_tag("#2PP"));
        assert!(looks_like_tag("y0urpg2g8"));
        assert!(!looks_like_tag("Some Name"));
        assert!(!looks_like_tag("#2"));
    }
}
