//! HTML to article-text extraction.
//!
//! Two independent extractors live here, matching the two strategies of the
//! extraction chain:
//!
//! - [`extract_main_text`] picks the densest article-like container and emits
//!   its block-level text, one block per paragraph.
//! - [`readable_summary`] scores paragraph parents the way Readability does and
//!   returns the winner as an HTML fragment; callers turn it into text with
//!   [`fragment_to_text`].

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Main text pulled out of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainText {
    pub title: Option<String>,
    pub text: String,
}

const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "template", "svg", "iframe"];

const CHROME_TAGS: &[&str] = &["nav", "header", "footer", "aside", "form", "button"];

const BLOCK_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "pre",
];

const BOILERPLATE_HINTS: &[&str] = &[
    "nav",
    "menu",
    "sidebar",
    "footer",
    "header",
    "banner",
    "cookie",
    "consent",
    "advert",
    "promo",
    "subscribe",
    "newsletter",
    "share",
    "social",
    "related",
    "comment",
];

fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn class_or_id_lc(el: &ElementRef) -> String {
    let mut out = String::new();
    if let Some(c) = el.value().attr("class") {
        out.push_str(c);
        out.push(' ');
    }
    if let Some(i) = el.value().attr("id") {
        out.push_str(i);
    }
    out.to_ascii_lowercase()
}

fn is_boilerplate(el: &ElementRef) -> bool {
    if CHROME_TAGS.contains(&el.value().name()) {
        return true;
    }
    let s = class_or_id_lc(el);
    !s.is_empty() && BOILERPLATE_HINTS.iter().any(|bad| s.contains(bad))
}

enum Piece<'a> {
    Text(&'a str),
    Element(ElementRef<'a>),
}

/// Visible text of an element, skipping script-like subtrees.
fn visible_text(el: &ElementRef) -> String {
    let mut out = String::new();
    let mut stack = vec![Piece::Element(*el)];
    while let Some(piece) = stack.pop() {
        match piece {
            Piece::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Piece::Element(current) => {
                if SKIP_TAGS.contains(&current.value().name()) {
                    continue;
                }
                let first_child = stack.len();
                for child in current.children() {
                    if let Some(text) = child.value().as_text() {
                        stack.push(Piece::Text(text));
                    } else if let Some(child_el) = ElementRef::wrap(child) {
                        stack.push(Piece::Element(child_el));
                    }
                }
                stack[first_child..].reverse();
            }
        }
    }
    norm_ws(&out)
}

/// Elements visited per page when scoring candidates.
const MAX_SCORED_ELEMENTS: usize = 20_000;

/// Visible and in-link text length of one element's subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct TextStats {
    text: usize,
    links: usize,
}

/// Length of `text` once whitespace is normalized, plus one separator.
fn text_weight(text: &str) -> usize {
    text.split_whitespace().map(|w| w.chars().count() + 1).sum()
}

struct Frame<'a> {
    el: ElementRef<'a>,
    pending: Vec<ElementRef<'a>>,
    stats: TextStats,
    excluded: bool,
}

impl<'a> Frame<'a> {
    fn open(el: ElementRef<'a>, excluded: bool) -> Self {
        let mut stats = TextStats::default();
        let mut pending = Vec::new();
        for child in el.children() {
            if let Some(text) = child.value().as_text() {
                stats.text += text_weight(text);
            } else if let Some(child_el) = ElementRef::wrap(child) {
                pending.push(child_el);
            }
        }
        pending.reverse();
        Self {
            el,
            pending,
            stats,
            excluded,
        }
    }
}

/// Post-order walk handing every element under `root` its subtree's
/// [`TextStats`] and whether it sits in boilerplate.
///
/// Script-like subtrees are not entered. At most `max_elems` elements below
/// `root` are visited; the rest of the page is ignored.
fn walk_text_stats<'a>(
    root: ElementRef<'a>,
    max_elems: usize,
    mut visit: impl FnMut(ElementRef<'a>, TextStats, bool),
) {
    let mut budget = max_elems;
    let mut stack = vec![Frame::open(root, false)];
    while let Some(frame) = stack.last_mut() {
        if let Some(child) = frame.pending.pop() {
            if budget == 0 || SKIP_TAGS.contains(&child.value().name()) {
                continue;
            }
            budget -= 1;
            let excluded = frame.excluded || is_boilerplate(&child);
            stack.push(Frame::open(child, excluded));
            continue;
        }

        let Some(done) = stack.pop() else { break };
        let mut stats = done.stats;
        if done.el.value().name() == "a" {
            stats.links = stats.text;
        }
        visit(done.el, stats, done.excluded);
        if let Some(parent) = stack.last_mut() {
            parent.stats.text += stats.text;
            parent.stats.links += stats.links;
        }
    }
}

fn select_first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .map(|el| norm_ws(&el.text().collect::<String>()))
        .find(|t| !t.is_empty())
}

/// Best-effort page title: `og:title`, then `<title>`, then the first `<h1>`.
pub fn document_title(doc: &Html) -> Option<String> {
    let og = Selector::parse(r#"meta[property="og:title"]"#)
        .ok()
        .and_then(|sel| {
            doc.select(&sel)
                .filter_map(|m| m.value().attr("content"))
                .map(norm_ws)
                .find(|t| !t.is_empty())
        });
    og.or_else(|| select_first_text(doc, "title"))
        .or_else(|| select_first_text(doc, "h1"))
        .map(|t| unescape_entities(&t))
}

/// Title of a raw HTML page.
pub fn page_title(html: &str) -> Option<String> {
    document_title(&Html::parse_document(html))
}

const CONTAINER_TAGS: &[&str] = &["article", "main", "section", "div", "body"];

fn pick_main_container(doc: &Html) -> Option<ElementRef<'_>> {
    let mut best: Option<(i64, ElementRef)> = None;
    walk_text_stats(doc.root_element(), MAX_SCORED_ELEMENTS, |el, stats, excluded| {
        let name = el.value().name();
        if !CONTAINER_TAGS.contains(&name) || (excluded && name != "body") {
            return;
        }
        if stats.text < 20 {
            return;
        }
        let mut score = stats.text as i64 - 2 * stats.links as i64;
        match name {
            "article" => score += 500,
            "main" => score += 300,
            "body" => score -= 200,
            _ => {}
        }
        if stats.links > stats.text / 2 {
            score -= 500;
        }
        if best.as_ref().is_none_or(|(s, _)| score > *s) {
            best = Some((score, el));
        }
    });
    best.map(|(_, el)| el)
}

/// Text of each outermost block element, skipping boilerplate subtrees.
fn block_texts(container: &ElementRef) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut stack: Vec<ElementRef> = container.children().filter_map(ElementRef::wrap).collect();
    stack.reverse();
    while let Some(el) = stack.pop() {
        let name = el.value().name();
        if SKIP_TAGS.contains(&name) || is_boilerplate(&el) {
            continue;
        }
        if BLOCK_TAGS.contains(&name) {
            let text = visible_text(&el);
            if !text.is_empty() {
                blocks.push(text);
            }
            continue;
        }
        let first_child = stack.len();
        stack.extend(el.children().filter_map(ElementRef::wrap));
        stack[first_child..].reverse();
    }
    blocks
}

/// Primary extractor: main article text of a page.
///
/// Returns `None` when no container holds meaningful text.
pub fn extract_main_text(html: &str) -> Option<MainText> {
    let doc = Html::parse_document(html);
    let container = pick_main_container(&doc)?;

    let blocks = block_texts(&container);
    let text = if blocks.is_empty() {
        visible_text(&container)
    } else {
        blocks.join("\n\n")
    };
    let text = unescape_entities(&text);
    if text.trim().is_empty() {
        return None;
    }

    Some(MainText {
        title: document_title(&doc),
        text,
    })
}

static POSITIVE_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)article|body|content|entry|hentry|main|page|post|story|text|blog").unwrap()
});

static NEGATIVE_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)combx|comment|contact|foot|footer|footnote|masthead|media|meta|outbrain|promo|related|scroll|shoutbox|sidebar|sponsor|shopping|tags|tool|widget|nav|menu|share|social")
        .unwrap()
});

fn class_weight(el: &ElementRef) -> f64 {
    let hints = class_or_id_lc(el);
    if hints.is_empty() {
        return 0.0;
    }
    let mut weight = 0.0;
    if NEGATIVE_HINT.is_match(&hints) {
        weight -= 25.0;
    }
    if POSITIVE_HINT.is_match(&hints) {
        weight += 25.0;
    }
    weight
}

fn initial_score(el: &ElementRef) -> f64 {
    let tag_score = match el.value().name() {
        "article" => 10.0,
        "div" | "section" | "main" => 5.0,
        "pre" | "td" | "blockquote" => 3.0,
        "address" | "ol" | "ul" | "dl" | "dd" | "dt" | "li" | "form" => -3.0,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" => -5.0,
        _ => 0.0,
    };
    tag_score + class_weight(el)
}

const MIN_PARAGRAPH_CHARS: usize = 25;

/// Fallback extractor: Readability-style best content fragment as HTML.
///
/// Paragraphs vote for their parent (full score) and grandparent (half
/// score); votes grow with paragraph length and comma count. The winning
/// candidate's score is discounted by its link density.
pub fn readable_summary(html: &str) -> Option<String> {
    static PARAGRAPHS: Lazy<Selector> = Lazy::new(|| Selector::parse("p, pre, td").unwrap());

    let doc = Html::parse_document(html);
    let mut scores = HashMap::new();

    for para in doc.select(&PARAGRAPHS).take(MAX_SCORED_ELEMENTS) {
        let text = visible_text(&para);
        let len = text.chars().count();
        if len < MIN_PARAGRAPH_CHARS {
            continue;
        }
        let vote = 1.0 + text.matches(',').count() as f64 + (len as f64 / 100.0).min(3.0);

        let mut ancestors = para.ancestors().filter_map(ElementRef::wrap);
        if let Some(parent) = ancestors.next() {
            *scores
                .entry(parent.id())
                .or_insert_with(|| initial_score(&parent)) += vote;
            if let Some(grandparent) = ancestors.next() {
                *scores
                    .entry(grandparent.id())
                    .or_insert_with(|| initial_score(&grandparent)) += vote / 2.0;
            }
        }
    }

    let mut best: Option<(f64, ElementRef)> = None;
    walk_text_stats(doc.root_element(), MAX_SCORED_ELEMENTS, |el, stats, _| {
        let Some(score) = scores.get(&el.id()) else {
            return;
        };
        let link_density = stats.links as f64 / stats.text.max(1) as f64;
        let adjusted = score * (1.0 - link_density);
        if best.as_ref().is_none_or(|(b, _)| adjusted > *b) {
            best = Some((adjusted, el));
        }
    });
    let (_, best) = best?;

    let fragment = best.inner_html();
    (!fragment.trim().is_empty()).then_some(fragment)
}

static SKIPPED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(?:script|style|noscript)>").unwrap());

static BLOCK_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(?:p|div|h[1-6]|li|blockquote|pre|tr|section|article)\s*>").unwrap()
});

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^<]+?>").unwrap());

/// Remove markup tags, keeping their text content.
pub fn strip_tags(html: &str) -> String {
    TAG.replace_all(html, "").into_owned()
}

static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});").unwrap());

fn named_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "hellip" => "\u{2026}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "deg" => "\u{b0}",
        "middot" => "\u{b7}",
        "bull" => "\u{2022}",
        "eacute" => "\u{e9}",
        _ => return None,
    })
}

/// Decode named, decimal and hexadecimal character references.
///
/// Unknown or invalid references are left as written. Decoding is a single
/// pass, so `&amp;lt;` becomes `&lt;`.
pub fn unescape_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32).map(String::from)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32).map(String::from)
            } else {
                named_entity(body).map(String::from)
            };
            decoded.unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Convert a fallback HTML fragment into plain text.
///
/// Block-level closing tags become paragraph breaks before all tags are
/// stripped and entities decoded.
pub fn fragment_to_text(fragment: &str) -> String {
    let text = SKIPPED_BLOCK.replace_all(fragment, "");
    let text = BLOCK_BREAK.replace_all(&text, "\n\n");
    let text = unescape_entities(&strip_tags(&text));
    text.lines()
        .map(norm_ws)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
