//! URL normalization and pre-network classification.
//!
//! Two separate decisions are made here. [`should_skip`] silently drops URLs
//! that can never be articles (video, social embeds, infographics, images);
//! skipped URLs never appear in a batch's results. [`classify_article`] is
//! consulted later by the extraction chain and produces a *reported* failure
//! with a human-readable reason.

use url::Url;

/// Characters trimmed from the end of a pasted URL.
const TRAILING_PUNCTUATION: &[char] = &['(', ')', '[', ']', '.', ',', ';'];

/// Hosts that never serve article text.
const SKIP_DOMAINS: &[&str] = &[
    // Video
    "youtube.com",
    "youtu.be",
    "vimeo.com",
    "dailymotion.com",
    "twitch.tv",
    // Social embeds
    "twitter.com",
    "x.com",
    "instagram.com",
    "facebook.com",
    "tiktok.com",
    "pinterest.com",
    // Infographics / data visualization
    "infogram.com",
    "datawrapper.de",
    "flourish.studio",
    "public.tableau.com",
    "piktochart.com",
    "visme.co",
];

/// Hosts rejected by [`classify_article`] as video embeds.
const VIDEO_DOMAINS: &[&str] = &["youtube.com", "youtu.be", "vimeo.com", "dailymotion.com"];

const IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".bmp", ".tif", ".tiff", ".ico", ".avif",
];

/// Single-segment paths that are index pages rather than articles.
const CATEGORY_KEYWORDS: &[&str] = &["blog", "category", "tag", "archive", "author", "topic"];

/// Strip surrounding whitespace and trailing punctuation picked up from prose.
pub fn normalize(raw: &str) -> String {
    raw.trim().trim_end_matches(TRAILING_PUNCTUATION).to_string()
}

fn host_matches(host: &str, domains: &[&str]) -> bool {
    let host = host.trim_start_matches("www.");
    domains
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
}

/// Whether a URL should be dropped before any processing.
///
/// Unparseable input is never skipped; it is left to extraction to report.
pub fn should_skip(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    if host_matches(&host, SKIP_DOMAINS) {
        log::debug!("Skipping non-article host: {url}");
        return true;
    }
    let path = parsed.path().to_ascii_lowercase();
    if IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        log::debug!("Skipping image URL: {url}");
        return true;
    }
    false
}

/// Result of [`classify_article`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub is_article: bool,
    pub reason: String,
}

impl Classification {
    fn article() -> Self {
        Self {
            is_article: true,
            reason: "Looks like an article".to_string(),
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            is_article: false,
            reason: reason.into(),
        }
    }
}

/// Decide whether a URL plausibly points at a single article.
///
/// The policy is permissive: only video hosts, homepages and bare category
/// pages are rejected. Anything else is accepted and left to extraction.
pub fn classify_article(url: &str) -> Classification {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(e) => return Classification::rejected(format!("Malformed URL: {e}")),
    };
    let Some(host) = parsed.host_str() else {
        return Classification::rejected("Malformed URL: missing host");
    };
    if host_matches(&host.to_ascii_lowercase(), VIDEO_DOMAINS) {
        return Classification::rejected("Video content, not an article");
    }

    let segments: Vec<&str> = parsed
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    match segments.as_slice() {
        [] => Classification::rejected("Homepage, not an article"),
        [only] if CATEGORY_KEYWORDS.contains(&only.to_ascii_lowercase().as_str()) => {
            Classification::rejected(format!("Category page ({only}), not an article"))
        }
        _ => Classification::article(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_whitespace_and_trailing_punctuation() {
        assert_eq!(
            normalize("  https://example.com/a/b).,; \n"),
            "https://example.com/a/b"
        );
        assert_eq!(normalize("(https://example.com/a]"), "(https://example.com/a");
        assert_eq!(normalize(".,;"), "");
        assert_eq!(normalize("https://example.com/a"), "https://example.com/a");
        // Whitespace is only trimmed from the ends of the raw input.
        assert_eq!(normalize("https://example.com/a/b ."), "https://example.com/a/b ");
    }

    #[test]
    fn skips_known_non_article_hosts() {
        assert!(should_skip("https://youtube.com/watch?v=x"));
        assert!(should_skip("https://www.youtube.com/watch?v=x"));
        assert!(should_skip("https://m.facebook.com/story"));
        assert!(should_skip("https://public.tableau.com/views/x"));
        assert!(!should_skip("https://example.com/article"));
    }

    #[test]
    fn skips_image_paths_case_insensitively() {
        assert!(should_skip("https://cdn.example.com/img/Chart.PNG"));
        assert!(should_skip("https://example.com/photo.jpeg"));
        assert!(!should_skip("https://example.com/png-guide"));
    }

    #[test]
    fn skip_fails_open_on_garbage() {
        assert!(!should_skip("not a url"));
        assert!(!should_skip(""));
    }

    #[test]
    fn does_not_match_lookalike_hosts() {
        assert!(!should_skip("https://notyoutube.com/watch"));
        assert!(!should_skip("https://x.com.example.org/a/b"));
    }

    #[test]
    fn classifies_homepages_and_categories() {
        let c = classify_article("https://example.com/");
        assert!(!c.is_article);
        assert!(c.reason.contains("Homepage"));

        assert!(!classify_article("https://example.com").is_article);
        assert!(!classify_article("https://example.com/blog").is_article);
        assert!(!classify_article("https://example.com/Tag/").is_article);
        assert!(classify_article("https://example.com/2024/01/headline").is_article);
        assert!(classify_article("https://example.com/blog/my-post").is_article);
        assert!(classify_article("https://example.com/headline-story").is_article);
    }

    #[test]
    fn classifies_video_hosts() {
        let c = classify_article("https://vimeo.com/12345/abc");
        assert!(!c.is_article);
        assert!(c.reason.contains("Video"));
    }

    #[test]
    fn malformed_urls_are_reported_not_panicked() {
        let c = classify_article("http://");
        assert!(!c.is_article);
        assert!(c.reason.starts_with("Malformed URL"));
    }
}
