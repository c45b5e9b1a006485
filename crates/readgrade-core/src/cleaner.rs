//! Post-extraction text cleanup.
//!
//! Extractors hand back article text that still carries photo credits,
//! captions, share widgets, navigation menus and duplicated leads. [`clean`]
//! runs an ordered [`PIPELINE`] of independent transforms over plain text.
//! Each transform is a pure `fn(&str) -> String` and is tested on its own;
//! the order matters only where a transform's precondition says so.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// One named step of the cleaning pipeline.
pub struct Transform {
    pub name: &'static str,
    pub apply: fn(&str) -> String,
}

/// The cleaning steps, in application order.
///
/// Line-removing steps run before [`dedupe_lines`], which in turn must run
/// before [`collapse_whitespace`] so that blank lines left behind by removals
/// are folded away. [`drop_repeated_lead`] expects blank-line separated
/// paragraphs and therefore runs last.
pub const PIPELINE: &[Transform] = &[
    Transform { name: "credits", apply: strip_credits },
    Transform { name: "captions", apply: strip_captions },
    Transform { name: "share", apply: strip_share_boilerplate },
    Transform { name: "ads", apply: strip_ad_markers },
    Transform { name: "contributors", apply: strip_contributor_lines },
    Transform { name: "menus", apply: drop_menu_runs },
    Transform { name: "dedupe", apply: dedupe_lines },
    Transform { name: "characters", apply: normalize_characters },
    Transform { name: "whitespace", apply: collapse_whitespace },
    Transform { name: "repeated-lead", apply: drop_repeated_lead },
];

/// Upper bound on pipeline passes in [`clean`].
const MAX_PASSES: usize = 8;

fn run_pipeline(text: &str) -> String {
    PIPELINE
        .iter()
        .fold(text.to_string(), |acc, step| (step.apply)(&acc))
        .trim()
        .to_string()
}

/// Remove structural noise from extracted article text.
///
/// The pipeline is rerun until its output stops changing: one step can
/// expose work for an earlier one, as when deduplication joins two short
/// line runs into a menu. No step lengthens the text, so this converges.
pub fn clean(text: &str) -> String {
    let mut current = run_pipeline(text);
    for _ in 1..MAX_PASSES {
        let next = run_pipeline(&current);
        if next == current {
            return current;
        }
        current = next;
    }
    log::debug!("Cleaner did not settle after {MAX_PASSES} passes");
    current
}

// ── credits ────────────────────────────────────────────────────────────────

static CREDIT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:photos?|images?|videos?|graphics?|illustrations?)[ \t]*(?:by|credits?|courtesy(?:[ \t]+of)?|source)?[ \t]*:.*$",
    )
    .unwrap()
});

static AGENCY_CREDIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\(?\b(?:AP|AFP|EPA|Reuters|Getty Images|Associated Press)[ \t]+Photos?(?:/[A-Z][\w.'-]*(?:[ \t]+[A-Z][\w.'-]*)*)?\)?",
    )
    .unwrap()
});

static PHOTO_BY_PAREN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\((?:photo|image)s?(?:[ \t]+(?:by|credit|courtesy))?[^)\n]*\)").unwrap());

static COURTESY_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:photo|image)s?[ \t]+courtesy[ \t]+of[ \t]+[^.\n]*\.?").unwrap()
});

/// Strip wire-service photo credits and "Photo by:" / "Image credit:" lines.
pub fn strip_credits(text: &str) -> String {
    let text = CREDIT_LINE.replace_all(text, "");
    let text = AGENCY_CREDIT.replace_all(&text, "");
    let text = PHOTO_BY_PAREN.replace_all(&text, "");
    COURTESY_PHRASE.replace_all(&text, "").into_owned()
}

// ── captions ───────────────────────────────────────────────────────────────

static CAPTION_ACTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:poses?|posed|stands?|stood|walks?|walked|speaks?|spoke|looks on|gestures?|smiles?|waves?|holds?|arrives?|attends?|celebrates?|(?:is|are) seen|sits?|listens?)\b",
    )
    .unwrap()
});

static CAPTION_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:on[ \t]+)?(?:Monday|Tuesday|Wednesday|Thursday|Friday|Saturday|Sunday|(?:Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)\.?[ \t]+\d{1,2}|(?:January|February|March|April|May|June|July|August|September|October|November|December)[ \t]+\d{1,2})\b",
    )
    .unwrap()
});

static CAPTION_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:in|at|outside|near)[ \t]+(?:the[ \t]+)?[A-Z][a-z]+").unwrap());

static FILE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:FILE|IMAGE DISTRIBUTED FOR [A-Z ]+)[ \t]+-[ \t]+").unwrap());

const MAX_CAPTION_CHARS: usize = 300;

fn is_caption(line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() || line.chars().count() > MAX_CAPTION_CHARS {
        return false;
    }
    if FILE_PREFIX.is_match(line) {
        return true;
    }
    let starts_upper = line.chars().next().is_some_and(|c| c.is_uppercase());
    starts_upper
        && CAPTION_ACTION.is_match(line)
        && CAPTION_LOCATION.is_match(line)
        && CAPTION_DATE.is_match(line)
}

/// Drop standalone lines phrased like photo captions.
///
/// A caption names a subject doing something somewhere on some date
/// ("Jane Doe speaks at a rally in Ohio, Tuesday, May 7, 2024."), or carries
/// the wire-service `FILE - ` prefix.
pub fn strip_captions(text: &str) -> String {
    text.lines()
        .filter(|line| !is_caption(line))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── share / read-more ──────────────────────────────────────────────────────

static SHARE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:share(?:[ \t]+this)?(?:[ \t]+(?:article|story|post|page))?(?:[ \t]+(?:on|via)[ \t]+\w+)?|click[ \t]+to[ \t]+(?:share|print|email)\b.*|(?:read|see)[ \t]+more\b.*|continue[ \t]+reading\b.*|related(?:[ \t]+(?:articles?|stories|coverage))?[ \t]*:.*|(?:sign[ \t]+up|subscribe)\b.*\bnewsletters?\b.*|follow[ \t]+us[ \t]+on\b.*|(?:facebook|twitter|linkedin|email|print|copy[ \t]+link)(?:[ \t]*[|/·][ \t]*(?:facebook|twitter|linkedin|email|print|copy[ \t]+link))*)[ \t]*[.:!]?$",
    )
    .unwrap()
});

const MAX_BOILERPLATE_CHARS: usize = 150;

/// Drop social-share widgets and "read more" teasers.
pub fn strip_share_boilerplate(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let t = line.trim();
            !(t.chars().count() <= MAX_BOILERPLATE_CHARS && SHARE_LINE.is_match(t))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── advertisements ─────────────────────────────────────────────────────────

static AD_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:advertisement|sponsored(?:[ \t]+content)?|paid[ \t]+(?:content|post)|story[ \t]+continues[ \t]+below(?:[ \t]+(?:this[ \t]+)?advertisement)?|ad|skip[ \t]+advertisement)[ \t]*$",
    )
    .unwrap()
});

static AD_INLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bADVERTISEMENT\b").unwrap());

/// Remove advertisement markers, whole-line and inline.
pub fn strip_ad_markers(text: &str) -> String {
    let text = AD_LINE.replace_all(text, "");
    AD_INLINE.replace_all(&text, "").into_owned()
}

// ── contributor lines and rules ────────────────────────────────────────────

static CONTRIBUTOR_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:.*\bcontributed[ \t]+(?:to[ \t]+)?(?:this|the)[ \t]+(?:report|story|article)\b.*|.*\b(?:writers?|reporters?)[ \t]+.*\bcontributed\.?|this[ \t]+(?:story|article)[ \t]+(?:was|has[ \t]+been)[ \t]+(?:updated|corrected)\b.*)$",
    )
    .unwrap()
});

static HORIZONTAL_RULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:[-_*=~][ \t]*){3,}$").unwrap());

/// Remove "X contributed to this report" lines and horizontal-rule artifacts.
pub fn strip_contributor_lines(text: &str) -> String {
    let text = CONTRIBUTOR_LINE.replace_all(text, "");
    HORIZONTAL_RULE.replace_all(&text, "").into_owned()
}

// ── navigation menus ───────────────────────────────────────────────────────

const MENU_LINE_MAX_CHARS: usize = 30;
const MENU_RUN_MIN: usize = 3;

fn is_terminated(line: &str) -> bool {
    line.ends_with(['.', '!', '?', ':', '"', '\'', '”', '’', ')'])
}

fn is_short(line: &str) -> bool {
    line.chars().count() < MENU_LINE_MAX_CHARS
}

fn is_menu_line(line: &str) -> bool {
    is_short(line)
        && line.chars().next().is_some_and(|c| c.is_uppercase())
        && !is_terminated(line)
}

/// Drop navigation-menu residue.
///
/// A run of three or more consecutive short, capitalized, unterminated lines
/// starts a menu. While inside a menu every further short unterminated line
/// is dropped; the first long or terminated line ends the menu and is kept.
/// Blank lines neither start nor end a menu.
pub fn drop_menu_runs(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out = Vec::with_capacity(lines.len());
    let mut in_menu = false;

    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            out.push(*raw);
            continue;
        }
        if in_menu {
            if is_short(line) && !is_terminated(line) {
                continue;
            }
            in_menu = false;
        } else if is_menu_line(line) {
            let run = lines[i..]
                .iter()
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .take_while(|l| is_menu_line(l))
                .count();
            if run >= MENU_RUN_MIN {
                in_menu = true;
                continue;
            }
        }
        out.push(*raw);
    }

    out.join("\n")
}

// ── deduplication ──────────────────────────────────────────────────────────

const PARAGRAPH_MIN_CHARS: usize = 50;

/// Comparison key for deduplication.
///
/// Lines that only differ in spacing or quote style are the same line once
/// the later pipeline steps have run, so they compare equal here too.
fn dedupe_key(line: &str) -> String {
    normalize_characters(&line.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Remove repeated lines and excess blank lines.
///
/// - a line equal to the last kept non-blank line is dropped;
/// - a line longer than 50 characters seen anywhere earlier is dropped;
/// - runs of blank lines are capped at one.
pub fn dedupe_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut seen_paragraphs: HashSet<String> = HashSet::new();
    let mut previous: Option<String> = None;
    let mut blank_run = 0usize;

    for raw in text.lines() {
        if raw.trim().is_empty() {
            blank_run += 1;
            if blank_run <= 1 {
                out.push("");
            }
            continue;
        }
        let key = dedupe_key(raw);
        if previous.as_deref() == Some(key.as_str()) {
            continue;
        }
        if key.chars().count() > PARAGRAPH_MIN_CHARS && !seen_paragraphs.insert(key.clone()) {
            continue;
        }
        blank_run = 0;
        previous = Some(key);
        out.push(raw);
    }

    out.join("\n")
}

// ── character normalization ────────────────────────────────────────────────

/// Mis-decoded UTF-8 sequences first, then typographic characters.
const CHARACTER_MAP: &[(&str, &str)] = &[
    ("â€™", "'"),
    ("â€˜", "'"),
    ("â€œ", "\""),
    ("â€\u{9d}", "\""),
    ("â€“", "-"),
    ("â€”", "-"),
    ("\u{2019}", "'"),
    ("\u{2018}", "'"),
    ("\u{201c}", "\""),
    ("\u{201d}", "\""),
    ("\u{2013}", "-"),
    ("\u{2014}", "-"),
];

/// Replace smart quotes, dashes and their mojibake with ASCII.
pub fn normalize_characters(text: &str) -> String {
    CHARACTER_MAP
        .iter()
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to))
}

// ── whitespace ─────────────────────────────────────────────────────────────

static MULTI_NEWLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());

/// Tabs become spaces, space runs collapse to one, 3+ newlines become 2.
pub fn collapse_whitespace(text: &str) -> String {
    let text = text.replace('\r', "").replace('\t', " ");
    let text = MULTI_SPACE.replace_all(&text, " ");
    MULTI_NEWLINE.replace_all(&text, "\n\n").into_owned()
}

// ── repeated lead ──────────────────────────────────────────────────────────

static ATTRIBUTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:said|says|told|according to|explained|added|noted|reported|wrote)\b")
        .unwrap()
});

static CONTRAST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:but|however|although|though|yet|while)\b").unwrap());

const LEAD_MIN_PARAGRAPHS: usize = 5;
const LEAD_SCAN: std::ops::Range<usize> = 3..10;
const SUBSTANTIAL_CHARS: usize = 200;
const LEAD_REPEAT_MIN_CHARS: usize = 20;

fn is_substantial_body(paragraph: &str) -> bool {
    paragraph.chars().count() > SUBSTANTIAL_CHARS
        && (ATTRIBUTION.is_match(paragraph) || paragraph.contains('"') || CONTRAST.is_match(paragraph))
}

/// Drop a teaser block that repeats the article's lead.
///
/// Some pages render the first paragraphs twice: once as a summary block,
/// then again inside the body. With more than five paragraphs, the first
/// substantial body paragraph among paragraphs 4–10 that is not itself part
/// of the opening three marks where the body begins. Everything before it is
/// dropped, but only if one of the opening three reappears later in the text.
pub fn drop_repeated_lead(text: &str) -> String {
    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.len() <= LEAD_MIN_PARAGRAPHS {
        return text.to_string();
    }

    let lead = &paragraphs[..3];
    let end = LEAD_SCAN.end.min(paragraphs.len());
    let body_start = (LEAD_SCAN.start..end).find(|&i| {
        let p = paragraphs[i];
        is_substantial_body(p) && !lead.iter().any(|l| l.contains(p))
    });
    let Some(body_start) = body_start else {
        return text.to_string();
    };

    let lead_repeats = lead.iter().any(|l| {
        l.chars().count() >= LEAD_REPEAT_MIN_CHARS
            && paragraphs[3..].iter().any(|later| later.contains(l))
    });
    if !lead_repeats {
        return text.to_string();
    }

    log::debug!("Dropping {body_start} repeated lead paragraph(s)");
    paragraphs[body_start..].join("\n\n")
}
