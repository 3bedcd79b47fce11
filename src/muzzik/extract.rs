//! Link extraction from chat message text.
//!
//! Chat markup wraps links as `<url>` or `<url|label>`; anything else is
//! picked up by a bare `http(s)://` scan.

use regex::Regex;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::OnceLock;

static WRAPPED_LINK: OnceLock<Regex> = OnceLock::new();
static BARE_LINK: OnceLock<Regex> = OnceLock::new();

fn wrapped_link() -> &'static Regex {
    WRAPPED_LINK.get_or_init(|| {
        Regex::new(r"<(https?://[^>|\s]+)(?:\|[^>]*)?>").expect("wrapped link pattern")
    })
}

fn bare_link() -> &'static Regex {
    BARE_LINK.get_or_init(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).expect("bare link pattern"))
}

fn decode_markup_entities(raw: &str) -> String {
    raw.replace("&amp;", "&")
}

/// Distinct references in first-occurrence order.
pub fn extract_references(text: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();
    let mut wrapped_spans: Vec<Range<usize>> = Vec::new();

    for caps in wrapped_link().captures_iter(text) {
        let (Some(whole), Some(link)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        wrapped_spans.push(whole.range());
        found.push((whole.start(), decode_markup_entities(link.as_str())));
    }

    for bare in bare_link().find_iter(text) {
        if wrapped_spans
            .iter()
            .any(|span| span.contains(&bare.start()))
        {
            continue;
        }
        found.push((bare.start(), decode_markup_entities(bare.as_str())));
    }

    found.sort_by_key(|(offset, _)| *offset);
    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter_map(|(_, reference)| seen.insert(reference.clone()).then_some(reference))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::extract_references;

    #[test]
    fn wrapped_label_is_stripped_and_bare_link_kept() {
        let got = extract_references("<https://x.com/a|label> and https://x.com/b");
        assert_eq!(got, vec!["https://x.com/a", "https://x.com/b"]);
    }

    #[test]
    fn plain_wrapped_link_is_unwrapped() {
        let got = extract_references("check <https://youtu.be/abc123>");
        assert_eq!(got, vec!["https://youtu.be/abc123"]);
    }

    #[test]
    fn wrapped_link_is_not_recaptured_by_bare_scan() {
        let got = extract_references("<https://x.com/a|https://x.com/a> again https://x.com/a");
        assert_eq!(got, vec!["https://x.com/a"]);
    }

    #[test]
    fn bare_scan_stops_at_brackets_and_quotes() {
        let got = extract_references("(see https://x.com/a) \"https://x.com/b\" [https://x.com/c]");
        assert_eq!(
            got,
            vec!["https://x.com/a", "https://x.com/b", "https://x.com/c"]
        );
    }

    #[test]
    fn markup_escaped_ampersand_is_decoded() {
        let got = extract_references("<https://www.youtube.com/watch?v=abc&amp;t=42>");
        assert_eq!(got, vec!["https://www.youtube.com/watch?v=abc&t=42"]);
    }

    #[test]
    fn text_without_links_yields_nothing() {
        assert!(extract_references("just vibes, no links").is_empty());
        assert!(extract_references("<not a link> http:/broken").is_empty());
    }

    #[test]
    fn bare_link_before_wrapped_link_comes_first() {
        let got = extract_references("https://x.com/b then <https://x.com/a|label>");
        assert_eq!(got, vec!["https://x.com/b", "https://x.com/a"]);
    }

    #[test]
    fn multiple_bare_links_keep_order() {
        let got = extract_references("https://a.com/1 https://b.com/2 https://a.com/1");
        assert_eq!(got, vec!["https://a.com/1", "https://b.com/2"]);
    }
}
