//! Grade-level readability scoring.
//!
//! Text is tokenized once into [`TextStats`]; each [`GradeLevelMetric`]
//! computes its estimate from those counts. A metric that cannot produce a
//! value contributes 0.0 without affecting the others.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ReadabilityScores, round1};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("{metric}: no words to score")]
    NoWords { metric: &'static str },
    #[error("{metric}: needs at least {required} sentences, got {actual}")]
    TooFewSentences {
        metric: &'static str,
        required: usize,
        actual: usize,
    },
    #[error("{metric}: produced a non-finite value")]
    NonFinite { metric: &'static str },
}

/// Token counts shared by all metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextStats {
    pub words: usize,
    pub sentences: usize,
    pub syllables: usize,
    /// Words of three or more syllables.
    pub polysyllables: usize,
    /// Alphanumeric characters inside words.
    pub letters: usize,
}

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?]+["'\u{201d}\u{2019})\]]*(?:\s+|$)|\n\s*\n"#).unwrap());

fn is_word(token: &str) -> bool {
    token.chars().any(char::is_alphanumeric)
}

impl TextStats {
    pub fn from_text(text: &str) -> Self {
        let mut stats = TextStats::default();
        for token in text.split_whitespace().filter(|t| is_word(t)) {
            let syllables = count_syllables(token);
            stats.words += 1;
            stats.syllables += syllables;
            if syllables >= 3 {
                stats.polysyllables += 1;
            }
            stats.letters += token.chars().filter(|c| c.is_alphanumeric()).count();
        }
        stats.sentences = count_sentences(text);
        stats
    }

    fn per_word(&self, n: usize) -> f64 {
        n as f64 / self.words as f64
    }

    fn words_per_sentence(&self) -> f64 {
        self.words as f64 / self.sentences.max(1) as f64
    }
}

/// Number of sentences, treating blank lines as sentence breaks.
///
/// Any text with at least one word has at least one sentence.
pub fn count_sentences(text: &str) -> usize {
    let n = SENTENCE_END
        .split(text)
        .filter(|segment| segment.split_whitespace().any(is_word))
        .count();
    if n == 0 && text.split_whitespace().any(is_word) {
        1
    } else {
        n
    }
}

/// Number of words, ignoring punctuation-only tokens.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().filter(|t| is_word(t)).count()
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y')
}

/// Estimate syllables in one word by counting vowel groups.
pub fn count_syllables(word: &str) -> usize {
    let w: String = word
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if w.is_empty() {
        return usize::from(word.chars().any(char::is_alphanumeric));
    }
    if w.len() <= 3 {
        return 1;
    }

    let mut groups = 0;
    let mut prev_vowel = false;
    for c in w.chars() {
        let vowel = is_vowel(c);
        if vowel && !prev_vowel {
            groups += 1;
        }
        prev_vowel = vowel;
    }

    let bytes = w.as_bytes();
    let n = bytes.len();
    let before = |back: usize| bytes[n - back] as char;
    let silent = if w.ends_with('e') {
        // "-le" after a consonant is its own syllable (ta-ble).
        !(w.ends_with("le") && !is_vowel(before(3)))
    } else if w.ends_with("ed") {
        !matches!(before(3), 't' | 'd')
    } else if w.ends_with("es") {
        !(matches!(before(3), 's' | 'x' | 'z')
            || w.ends_with("ches")
            || w.ends_with("shes")
            || w.ends_with("ces")
            || w.ends_with("ges"))
    } else {
        false
    };

    if silent && groups > 1 {
        groups -= 1;
    }
    groups.max(1)
}

/// One grade-level estimator.
pub trait GradeLevelMetric: Send + Sync {
    fn name(&self) -> &'static str;
    fn grade(&self, stats: &TextStats) -> Result<f64, MetricError>;
}

fn require_words(metric: &'static str, stats: &TextStats) -> Result<(), MetricError> {
    if stats.words == 0 {
        Err(MetricError::NoWords { metric })
    } else {
        Ok(())
    }
}

pub struct FleschKincaid;

impl GradeLevelMetric for FleschKincaid {
    fn name(&self) -> &'static str {
        "Flesch-Kincaid"
    }

    fn grade(&self, stats: &TextStats) -> Result<f64, MetricError> {
        require_words(self.name(), stats)?;
        Ok(0.39 * stats.words_per_sentence() + 11.8 * stats.per_word(stats.syllables) - 15.59)
    }
}

pub struct Smog;

impl Smog {
    const MIN_SENTENCES: usize = 3;
}

impl GradeLevelMetric for Smog {
    fn name(&self) -> &'static str {
        "SMOG"
    }

    fn grade(&self, stats: &TextStats) -> Result<f64, MetricError> {
        require_words(self.name(), stats)?;
        if stats.sentences < Self::MIN_SENTENCES {
            return Err(MetricError::TooFewSentences {
                metric: self.name(),
                required: Self::MIN_SENTENCES,
                actual: stats.sentences,
            });
        }
        let per_30 = stats.polysyllables as f64 * (30.0 / stats.sentences as f64);
        Ok(1.043 * per_30.sqrt() + 3.1291)
    }
}

pub struct ColemanLiau;

impl GradeLevelMetric for ColemanLiau {
    fn name(&self) -> &'static str {
        "Coleman-Liau"
    }

    fn grade(&self, stats: &TextStats) -> Result<f64, MetricError> {
        require_words(self.name(), stats)?;
        let letters_per_100 = stats.per_word(stats.letters) * 100.0;
        let sentences_per_100 = stats.per_word(stats.sentences) * 100.0;
        Ok(0.0588 * letters_per_100 - 0.296 * sentences_per_100 - 15.8)
    }
}

pub struct AutomatedReadability;

impl GradeLevelMetric for AutomatedReadability {
    fn name(&self) -> &'static str {
        "ARI"
    }

    fn grade(&self, stats: &TextStats) -> Result<f64, MetricError> {
        require_words(self.name(), stats)?;
        Ok(4.71 * stats.per_word(stats.letters) + 0.5 * stats.words_per_sentence() - 21.43)
    }
}

/// The four estimators that make up a [`ReadabilityScores`].
pub struct Analyzer {
    flesch_kincaid: Box<dyn GradeLevelMetric>,
    smog: Box<dyn GradeLevelMetric>,
    coleman_liau: Box<dyn GradeLevelMetric>,
    ari: Box<dyn GradeLevelMetric>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::with_metrics(
            Box::new(FleschKincaid),
            Box::new(Smog),
            Box::new(ColemanLiau),
            Box::new(AutomatedReadability),
        )
    }
}

impl Analyzer {
    pub fn with_metrics(
        flesch_kincaid: Box<dyn GradeLevelMetric>,
        smog: Box<dyn GradeLevelMetric>,
        coleman_liau: Box<dyn GradeLevelMetric>,
        ari: Box<dyn GradeLevelMetric>,
    ) -> Self {
        Self {
            flesch_kincaid,
            smog,
            coleman_liau,
            ari,
        }
    }

    fn score(metric: &dyn GradeLevelMetric, stats: &TextStats) -> f64 {
        let result = metric.grade(stats).and_then(|g| {
            if g.is_finite() {
                Ok(g)
            } else {
                Err(MetricError::NonFinite {
                    metric: metric.name(),
                })
            }
        });
        match result {
            Ok(grade) => round1(grade),
            Err(e @ MetricError::TooFewSentences { .. }) => {
                log::debug!("{e}; scoring 0.0");
                0.0
            }
            Err(e) => {
                log::error!("Error calculating {}: {}", metric.name(), e);
                0.0
            }
        }
    }

    /// Score a text. Empty or whitespace-only text scores all zeros.
    pub fn analyze(&self, text: &str) -> ReadabilityScores {
        if text.trim().is_empty() {
            return ReadabilityScores::default();
        }

        let stats = TextStats::from_text(text);
        let flesch_kincaid_grade = Self::score(self.flesch_kincaid.as_ref(), &stats);
        let smog = Self::score(self.smog.as_ref(), &stats);
        let coleman_liau = Self::score(self.coleman_liau.as_ref(), &stats);
        let ari = Self::score(self.ari.as_ref(), &stats);
        let consensus = round1((flesch_kincaid_grade + smog + coleman_liau + ari) / 4.0);

        log::info!(
            "Analysis complete: FK={flesch_kincaid_grade}, SMOG={smog}, CL={coleman_liau}, ARI={ari}, \
             Consensus={consensus}, Words={}, Sentences={}",
            stats.words,
            stats.sentences
        );

        ReadabilityScores {
            flesch_kincaid_grade,
            smog,
            coleman_liau,
            ari,
            consensus,
            word_count: stats.words,
            sentence_count: stats.sentences,
        }
    }
}

/// Score a text with the standard four metrics.
pub fn analyze(text: &str) -> ReadabilityScores {
    Analyzer::default().analyze(text)
}

/// School level matching a grade.
pub fn grade_level_description(grade: f64) -> &'static str {
    if grade <= 5.0 {
        "Elementary School"
    } else if grade <= 8.0 {
        "Middle School"
    } else if grade <= 12.0 {
        "High School"
    } else if grade <= 16.0 {
        "College"
    } else {
        "Graduate School"
    }
}

/// Reading-ease label for a Flesch-Kincaid grade.
pub fn reading_ease_description(grade: f64) -> &'static str {
    if grade <= 5.0 {
        "Very Easy"
    } else if grade <= 8.0 {
        "Easy"
    } else if grade <= 10.0 {
        "Fairly Easy"
    } else if grade <= 12.0 {
        "Standard"
    } else if grade <= 14.0 {
        "Fairly Difficult"
    } else if grade <= 16.0 {
        "Difficult"
    } else {
        "Very Difficult"
    }
}

/// Scores plus human-readable labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub metrics: ReadabilityScores,
    pub grade_description: String,
    pub reading_ease: String,
}

pub fn analyze_with_description(text: &str) -> Assessment {
    let metrics = analyze(text);
    Assessment {
        grade_description: grade_level_description(metrics.consensus).to_string(),
        reading_ease: reading_ease_description(metrics.flesch_kincaid_grade).to_string(),
        metrics,
    }
}
