use std::fmt::Write as _;
use std::path::Path;

use chrono::{Local, NaiveDateTime};
use readgrade_core::readability::{grade_level_description, reading_ease_description};
use readgrade_core::{ArticleResult, BatchReport, ExtractionOutcome, ReadabilityScores};

use crate::types::{ExportFormat, ReportError, reading_level_detail};

const CSV_HEADERS: [&str; 11] = [
    "URL",
    "Title",
    "FK Grade",
    "SMOG",
    "Coleman-Liau",
    "ARI",
    "Consensus",
    "Word Count",
    "Sentence Count",
    "Status",
    "Error",
];

/// Render a batch in the requested format.
pub fn export_results(report: &BatchReport, format: ExportFormat) -> Result<String, ReportError> {
    match format {
        ExportFormat::Json => export_json(report),
        ExportFormat::Csv => Ok(export_csv(report)),
        ExportFormat::Markdown => Ok(export_markdown(report)),
        ExportFormat::Text => Ok(export_text(report)),
    }
}

/// Render a batch and write it to `path`.
pub fn export_to_path(report: &BatchReport, format: ExportFormat, path: &Path) -> Result<(), ReportError> {
    let content = export_results(report, format)?;
    std::fs::write(path, content).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn export_json(report: &BatchReport) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(report)?)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn status(result: &ArticleResult) -> &'static str {
    if result.extraction_success {
        "Success"
    } else {
        "Failed"
    }
}

/// CSV with one row per result, RFC 4180 quoting.
pub fn export_csv(report: &BatchReport) -> String {
    let mut out = CSV_HEADERS.join(",");
    out.push_str("\r\n");

    for result in &report.results {
        let mut row = vec![
            csv_field(&result.url),
            csv_field(result.title.as_deref().unwrap_or("")),
        ];
        match &result.scores {
            Some(s) => row.extend([
                format!("{:.1}", s.flesch_kincaid_grade),
                format!("{:.1}", s.smog),
                format!("{:.1}", s.coleman_liau),
                format!("{:.1}", s.ari),
                format!("{:.1}", s.consensus),
                s.word_count.to_string(),
                s.sentence_count.to_string(),
            ]),
            None => row.extend(std::iter::repeat_n(String::new(), 7)),
        }
        row.push(status(result).to_string());
        row.push(csv_field(result.error.as_deref().unwrap_or("")));

        out.push_str(&row.join(","));
        out.push_str("\r\n");
    }
    out
}

fn md_cell(value: &str) -> String {
    value.replace('|', "\\|").replace(['\n', '\r'], " ")
}

fn average_label(report: &BatchReport) -> String {
    match report.summary.average_grade_level {
        Some(avg) => format!("{avg:.1} ({})", grade_level_description(avg)),
        None => "n/a".to_string(),
    }
}

pub fn export_markdown(report: &BatchReport) -> String {
    let mut out = String::new();
    let summary = &report.summary;

    let _ = writeln!(out, "# Readability Report\n");
    let _ = writeln!(out, "**Request:** `{}`\n", report.request_id);
    let _ = writeln!(out, "## Summary\n");
    let _ = writeln!(out, "| Total | Successful | Failed | Average Grade |");
    let _ = writeln!(out, "|------:|-----------:|-------:|---------------|");
    let _ = writeln!(
        out,
        "| {} | {} | {} | {} |\n",
        summary.total_urls,
        summary.successful_count,
        summary.failed_count,
        average_label(report)
    );

    if report.results.is_empty() {
        let _ = writeln!(out, "_No articles were processed._");
        return out;
    }

    let _ = writeln!(out, "## Articles\n");
    let _ = writeln!(out, "| # | URL | Title | FK | SMOG | CL | ARI | Consensus | Words | Level |");
    let _ = writeln!(out, "|--:|-----|-------|---:|-----:|---:|----:|----------:|------:|-------|");
    for (i, result) in report.results.iter().enumerate() {
        let title = md_cell(result.title.as_deref().unwrap_or("N/A"));
        match &result.scores {
            Some(s) => {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {:.1} | {:.1} | {:.1} | {:.1} | **{:.1}** | {} | {} |",
                    i + 1,
                    md_cell(&result.url),
                    title,
                    s.flesch_kincaid_grade,
                    s.smog,
                    s.coleman_liau,
                    s.ari,
                    s.consensus,
                    s.word_count,
                    grade_level_description(s.consensus)
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | | | | | | | Failed |",
                    i + 1,
                    md_cell(&result.url),
                    title
                );
            }
        }
    }

    let failures: Vec<&ArticleResult> = report.results.iter().filter(|r| !r.extraction_success).collect();
    if !failures.is_empty() {
        let _ = writeln!(out, "\n## Failures\n");
        for result in failures {
            let _ = writeln!(
                out,
                "- {}: {}",
                result.url,
                result.error.as_deref().unwrap_or("Failed to extract text")
            );
        }
    }
    out
}

pub fn export_text(report: &BatchReport) -> String {
    let mut out = String::new();
    let summary = &report.summary;

    let _ = writeln!(out, "Readability report {}", report.request_id);
    let _ = writeln!(
        out,
        "{} URLs: {} successful, {} failed. Average grade: {}",
        summary.total_urls,
        summary.successful_count,
        summary.failed_count,
        average_label(report)
    );

    for (i, result) in report.results.iter().enumerate() {
        let _ = writeln!(out);
        let _ = writeln!(out, "[{}] {}", i + 1, result.url);
        if let Some(title) = &result.title {
            let _ = writeln!(out, "    Title: {title}");
        }
        match &result.scores {
            Some(s) => {
                let _ = writeln!(
                    out,
                    "    Consensus {:.1} ({}) | FK {:.1} | SMOG {:.1} | CL {:.1} | ARI {:.1}",
                    s.consensus,
                    grade_level_description(s.consensus),
                    s.flesch_kincaid_grade,
                    s.smog,
                    s.coleman_liau,
                    s.ari
                );
                let _ = writeln!(out, "    {} words, {} sentences", s.word_count, s.sentence_count);
            }
            None => {
                let _ = writeln!(
                    out,
                    "    FAILED: {}",
                    result.error.as_deref().unwrap_or("Failed to extract text")
                );
            }
        }
    }
    out
}

/// Markdown report of a single extraction, for manual comparison with the page.
pub fn extraction_report(outcome: &ExtractionOutcome, scores: Option<&ReadabilityScores>) -> String {
    extraction_report_at(outcome, scores, Local::now().naive_local())
}

pub fn extraction_report_at(
    outcome: &ExtractionOutcome,
    scores: Option<&ReadabilityScores>,
    generated: NaiveDateTime,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Extracted Text Analysis\n");
    let _ = writeln!(out, "**URL:** {}", outcome.url);
    let _ = writeln!(out, "**Extraction Method:** {}", outcome.method.label());
    let _ = writeln!(out, "**Title:** {}", outcome.title.as_deref().unwrap_or("N/A"));
    let _ = writeln!(out, "**Extraction Date:** {}\n", generated.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "---\n");

    if !outcome.succeeded {
        let _ = writeln!(out, "## Extraction Failed\n");
        let _ = writeln!(
            out,
            "{}",
            outcome.error.as_deref().unwrap_or("Failed to extract text")
        );
        return out;
    }

    let _ = writeln!(out, "## Readability Metrics\n");
    match scores {
        Some(s) => {
            let avg_words = s.word_count as f64 / s.sentence_count.max(1) as f64;
            let _ = writeln!(out, "| Metric | Value |");
            let _ = writeln!(out, "|--------|-------|");
            let _ = writeln!(out, "| **Flesch-Kincaid Grade** | {:.1} |", s.flesch_kincaid_grade);
            let _ = writeln!(out, "| **SMOG Index** | {:.1} |", s.smog);
            let _ = writeln!(out, "| **Coleman-Liau Index** | {:.1} |", s.coleman_liau);
            let _ = writeln!(out, "| **ARI** | {:.1} |", s.ari);
            let _ = writeln!(out, "| **CONSENSUS** | **{:.1}** |", s.consensus);
            let _ = writeln!(out, "| Word Count | {} |", s.word_count);
            let _ = writeln!(out, "| Sentence Count | {} |", s.sentence_count);
            let _ = writeln!(out, "| Avg Words/Sentence | {avg_words:.1} |\n");
            let _ = writeln!(out, "**Reading Level:** {}", reading_level_detail(s.consensus));
            let _ = writeln!(
                out,
                "**Reading Ease:** {}\n",
                reading_ease_description(s.flesch_kincaid_grade)
            );
        }
        None => {
            let _ = writeln!(out, "_Failed to analyze readability_\n");
        }
    }

    let _ = writeln!(out, "---\n");
    let _ = writeln!(out, "## Extracted Text\n");
    let _ = writeln!(out, "{}\n", outcome.text.as_deref().unwrap_or(""));
    let _ = writeln!(out, "---\n");
    let _ = writeln!(out, "## Notes for Manual Comparison\n");
    let _ = writeln!(
        out,
        "Please review the extracted text above and compare it with the original article at:\n{}\n",
        outcome.url
    );
    let _ = writeln!(out, "**Check for:**");
    for item in [
        "Is the main article content included?",
        "Are photo captions excluded?",
        "Are navigation menus excluded?",
        "Are ads/sponsored content excluded?",
        "Are author bylines/credits excluded?",
        "Is the text clean and readable?",
        "Are there any encoding issues (weird characters)?",
        "Are headings and structure preserved?",
    ] {
        let _ = writeln!(out, "- [ ] {item}");
    }
    let _ = writeln!(out, "\n**Your Notes:**\n```\n[Add your observations here]\n```");
    out
}
