//! 4.D Headline normalizer — a pure transformation from a raw feed title to
//! the string actually posted, plus the junk-article blacklist applied
//! before an entry is staged at all.

use once_cell::sync::Lazy;
use regex::Regex;

const MAX_HEADLINE_BYTES: usize = 200;
const ELLIPSIS: &str = "…";

/// Regular expressions matched against the *raw* title. A match means the
/// entry is dropped silently before it ever reaches the store.
static BLACKLIST: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^wordle\b",
        r"(?i)\bdeal of the day\b",
        r"(?i)^connections\b.*hints?$",
        r"(?i)^daily briefing:",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("blacklist pattern is valid"))
    .collect()
});

/// True if the raw title matches a known junk-article pattern and should
/// never be staged.
pub fn is_blacklisted(raw_title: &str) -> bool {
    BLACKLIST.iter().any(|re| re.is_match(raw_title))
}

static TAG_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static STYLED_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(em|strong|sub|sup)>(.*?)</\1>").unwrap()
});
static PLURALISTIC_WRAPPER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Pluralistic: (.+) \(\d{1,2} [A-Za-z]{3} \d{4}\)$").unwrap()
});
static NUMERIC_ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&#(x[0-9A-Fa-f]+|[0-9]+);").unwrap());

/// Normalize a raw feed title into the headline actually posted. Applying
/// this function to its own output is a no-op (idempotence is a tested
/// invariant).
pub fn normalize_headline(raw: &str) -> String {
    let collapsed = collapse_newlines(raw);
    let styled = render_styled_runs(&collapsed);
    let stripped = TAG_SPAN.replace_all(&styled, "").to_string();
    let unescaped = unescape_entities(&stripped);
    let trimmed = trim_trailing_pipe_suffix(&unescaped);
    let unwrapped = strip_pluralistic_wrapper(&trimmed);
    truncate_to_byte_limit(&unwrapped)
}

fn collapse_newlines(s: &str) -> String {
    s.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

fn render_styled_runs(s: &str) -> String {
    STYLED_RUN
        .replace_all(s, |caps: &regex::Captures| {
            let tag = caps.get(1).unwrap().as_str().to_ascii_lowercase();
            let inner = caps.get(2).unwrap().as_str();
            match tag.as_str() {
                "em" => to_italic(inner),
                "strong" => to_bold(inner),
                "sub" => to_subscript(inner),
                "sup" => to_superscript(inner),
                _ => inner.to_string(),
            }
        })
        .to_string()
}

fn to_bold(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'A'..='Z' => char::from_u32(0x1D400 + (c as u32 - 'A' as u32)).unwrap_or(c),
            'a'..='z' => char::from_u32(0x1D41A + (c as u32 - 'a' as u32)).unwrap_or(c),
            '0'..='9' => char::from_u32(0x1D7CE + (c as u32 - '0' as u32)).unwrap_or(c),
            other => other,
        })
        .collect()
}

fn to_italic(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'A'..='Z' => char::from_u32(0x1D434 + (c as u32 - 'A' as u32)).unwrap_or(c),
            // U+1D455 (italic small h) is unassigned in Unicode; the
            // documented substitute is the preexisting Planck-constant
            // symbol U+210E, which renders identically.
            'h' => '\u{210E}',
            'a'..='z' => char::from_u32(0x1D44E + (c as u32 - 'a' as u32)).unwrap_or(c),
            other => other,
        })
        .collect()
}

fn to_subscript(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '0'..='9' => char::from_u32(0x2080 + (c as u32 - '0' as u32)).unwrap_or(c),
            other => other,
        })
        .collect()
}

fn to_superscript(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '0' => '\u{2070}',
            '1' => '\u{00B9}',
            '2' => '\u{00B2}',
            '3' => '\u{00B3}',
            '4'..='9' => char::from_u32(0x2074 + (c as u32 - '4' as u32)).unwrap_or(c),
            other => other,
        })
        .collect()
}

fn unescape_entities(s: &str) -> String {
    let named = s
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&ndash;", "\u{2013}")
        .replace("&mdash;", "\u{2014}")
        .replace("&rsquo;", "\u{2019}")
        .replace("&lsquo;", "\u{2018}")
        .replace("&rdquo;", "\u{201D}")
        .replace("&ldquo;", "\u{201C}")
        .replace("&hellip;", "\u{2026}");

    NUMERIC_ENTITY
        .replace_all(&named, |caps: &regex::Captures| {
            let digits = &caps[1];
            let code = if let Some(hex) = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
                u32::from_str_radix(hex, 16).ok()
            } else {
                digits.parse::<u32>().ok()
            };
            code.and_then(char::from_u32)
                .map(|c| c.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}

fn trim_trailing_pipe_suffix(s: &str) -> String {
    match s.rfind(" | ") {
        Some(idx) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn strip_pluralistic_wrapper(s: &str) -> String {
    match PLURALISTIC_WRAPPER.captures(s) {
        Some(caps) => caps[1].to_string(),
        None => s.to_string(),
    }
}

fn truncate_to_byte_limit(s: &str) -> String {
    if s.len() <= MAX_HEADLINE_BYTES {
        return s.to_string();
    }

    let budget = MAX_HEADLINE_BYTES - ELLIPSIS.len();
    let mut cut = 0;
    for (idx, ch) in s.char_indices() {
        if idx > budget {
            break;
        }
        if ch.is_whitespace() {
            cut = idx;
        }
    }
    // No whitespace boundary found within budget: fall back to the widest
    // char-aligned prefix that fits.
    if cut == 0 {
        cut = s
            .char_indices()
            .take_while(|(idx, ch)| idx + ch.len_utf8() <= budget)
            .last()
            .map(|(idx, ch)| idx + ch.len_utf8())
            .unwrap_or(0);
    }

    format!("{}{}", s[..cut].trim_end(), ELLIPSIS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_newlines_and_strips_tags() {
        let out = normalize_headline("Line one\nLine two <b>bold-ish</b>");
        assert_eq!(out, "Line one Line two bold-ish");
    }

    #[test]
    fn renders_strong_as_unicode_bold() {
        let out = normalize_headline("<strong>Breaking</strong> news");
        assert_eq!(out, "𝐁𝐫𝐞𝐚𝐤𝐢𝐧𝐠 news");
    }

    #[test]
    fn renders_em_as_unicode_italic_with_h_exception() {
        let out = normalize_headline("<em>heyday</em>");
        assert_eq!(out, "\u{210E}𝑒𝑦𝑑𝑎𝑦");
    }

    #[test]
    fn unescapes_html_entities() {
        let out = normalize_headline("Tom &amp; Jerry &#8217;s adventure");
        assert_eq!(out, "Tom & Jerry \u{2019}s adventure");
    }

    #[test]
    fn trims_trailing_pipe_suffix() {
        let out = normalize_headline("Big news today | Example Times");
        assert_eq!(out, "Big news today");
    }

    #[test]
    fn strips_pluralistic_wrapper() {
        let out = normalize_headline("Pluralistic: The real story (02 Jan 2024)");
        assert_eq!(out, "The real story");
    }

    #[test]
    fn truncates_long_titles_at_whitespace_with_ellipsis() {
        let long = "word ".repeat(60);
        let out = normalize_headline(&long);
        assert!(out.len() <= 200);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = [
            "Plain title",
            "<strong>Bold</strong> and <em>italic</em>",
            "Tom &amp; Jerry",
            "Title | Some Source",
            "Pluralistic: A story (01 Jan 2024)",
            &"word ".repeat(80),
        ];
        for input in inputs {
            let once = normalize_headline(input);
            let twice = normalize_headline(&once);
            assert_eq!(once, twice, "not idempotent for input: {input:?}");
        }
    }

    #[test]
    fn blacklist_matches_known_junk_patterns() {
        assert!(is_blacklisted("Wordle #927 answer and hints"));
        assert!(is_blacklisted("Today's Deal of the Day: headphones"));
        assert!(!is_blacklisted("A perfectly normal headline"));
    }
}
