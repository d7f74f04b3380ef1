/// Text processing utilities
pub mod text {
    /// Truncate to at most `max_chars` characters, never splitting a
    /// multi-byte sequence.
    pub fn truncate_chars(text: &str, max_chars: usize) -> String {
        if text.chars().count() <= max_chars {
            return text.to_string();
        }
        let trimmed = text.trim();
        match trimmed.char_indices().nth(max_chars) {
            Some((end, _)) => trimmed[..end].to_string(),
            None => trimmed.to_string(),
        }
    }

    /// Extract clean text content from HTML. A `<` only opens a tag when a
    /// letter, `/` or `!` follows it, so plain-text comparisons survive.
    pub fn strip_html(html: &str) -> String {
        let mut text = String::with_capacity(html.len());
        let mut in_tag = false;
        let mut chars = html.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '<' if !in_tag
                    && chars
                        .peek()
                        .is_some_and(|n| n.is_ascii_alphabetic() || *n == '/' || *n == '!') =>
                {
                    in_tag = true;
                }
                '>' if in_tag => {
                    // keep words on either side of a tag apart
                    text.push(' ');
                    in_tag = false;
                }
                _ if !in_tag => text.push(c),
                _ => {}
            }
        }

        decode_entities(&text)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    const ENTITIES: [(&str, &str); 7] = [
        ("&nbsp;", " "),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&#39;", "'"),
        ("&apos;", "'"),
        ("&amp;", "&"),
    ];

    /// Decode the handful of entities feeds commonly carry. `&amp;` goes last
    /// so `&amp;lt;` stays literal.
    fn decode_entities(text: &str) -> String {
        if !text.contains('&') {
            return text.to_string();
        }
        ENTITIES
            .iter()
            .fold(text.to_string(), |acc, (entity, plain)| acc.replace(entity, plain))
    }

    /// Remove a surrounding markdown code fence (```` ``` ```` or ```` ```json ````).
    pub fn strip_code_fences(response: &str) -> &str {
        let trimmed = response.trim();
        if !trimmed.starts_with("```") {
            return trimmed;
        }
        // drop the opening fence line including any language tag
        let body = match trimmed.find('\n') {
            Some(idx) => &trimmed[idx + 1..],
            None => trimmed.trim_start_matches('`').trim_start_matches("json"),
        };
        body.trim().trim_end_matches("```").trim()
    }
}

/// URL utilities
pub mod url {
    use url::Url;

    /// Check that a string is an absolute http(s) URL
    pub fn is_http_url(url_str: &str) -> bool {
        match Url::parse(url_str) {
            Ok(url) => url.scheme() == "http" || url.scheme() == "https",
            Err(_) => false,
        }
    }
}

/// Time utilities
pub mod time {
    use std::time::Duration;

    /// Format duration in human-readable form
    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();

        if total_seconds < 60 {
            format!("{}s", total_seconds)
        } else if total_seconds < 3600 {
            format!("{}m", total_seconds / 60)
        } else if total_seconds < 86400 {
            format!("{}h", total_seconds / 3600)
        } else {
            format!("{}d", total_seconds / 86400)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::text::*;

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        let text = "Hello 世界和平";
        let truncated = truncate_chars(text, 7);
        assert_eq!(truncated, "Hello 世");
        assert!(text.starts_with(&truncated));
    }

    #[test]
    fn strip_html_removes_tags_and_collapses_whitespace() {
        assert_eq!(
            strip_html("<div><p>First</p><p>Second  line</p></div>"),
            "First Second line"
        );
        assert_eq!(strip_html("plain"), "plain");
    }

    #[test]
    fn strip_html_keeps_bare_angle_brackets() {
        assert_eq!(
            strip_html("<p>BTC < $50k as ETH > $3k</p>"),
            "BTC < $50k as ETH > $3k"
        );
        assert_eq!(strip_html("a <3 b"), "a <3 b");
    }

    #[test]
    fn strip_html_decodes_common_entities() {
        assert_eq!(
            strip_html("Fish&nbsp;&amp;&nbsp;Chips <b>&quot;fresh&quot;</b> &lt;tag&gt; it&#39;s"),
            "Fish & Chips \"fresh\" <tag> it's"
        );
        assert_eq!(strip_html("&amp;lt;"), "&lt;");
    }

    #[test]
    fn strip_code_fences_variants() {
        assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {}  "), "{}");
    }

    #[test]
    fn http_url_check() {
        assert!(super::url::is_http_url("https://example.com/rss"));
        assert!(!super::url::is_http_url("ftp://example.com/rss"));
        assert!(!super::url::is_http_url("not a url"));
    }

    #[test]
    fn durations_render_in_largest_unit() {
        use super::time::format_duration;
        use std::time::Duration;
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(15 * 60)), "15m");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
    }
}
