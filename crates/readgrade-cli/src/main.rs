use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use readgrade_core::orchestrator::new_request_id;
use readgrade_core::readability::grade_level_description;
use readgrade_core::{BatchOptions, BatchReport, Config, ExtractionChain, Orchestrator, ProgressStore};
use readgrade_reporting::{ExportFormat, export_results, export_to_path, extraction_report};

/// Readgrade - Estimate the reading grade level of online articles
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract and score a batch of article URLs
    Analyze {
        /// Article URLs
        urls: Vec<String>,

        /// Read URLs from a file, one per line
        #[arg(long)]
        file: Option<PathBuf>,

        /// Number of concurrent workers
        #[arg(long)]
        workers: Option<usize>,

        /// Per-URL timeout in seconds
        #[arg(long)]
        task_timeout: Option<u64>,

        /// Output format: json, csv, markdown or text
        #[arg(long)]
        format: Option<ExportFormat>,

        /// Write the export to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Retry failed page fetches with backoff
        #[arg(long)]
        resilient: bool,
    },
    /// Extract one article and write a Markdown report for manual review
    Extract {
        url: String,

        /// Write the report to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    let color = !cli.no_color && std::env::var_os("NO_COLOR").is_none();

    match cli.command {
        Command::Analyze {
            urls,
            file,
            workers,
            task_timeout,
            format,
            output,
            resilient,
        } => {
            let mut config = config;
            if let Some(workers) = workers {
                config.max_workers = workers;
            }
            if let Some(secs) = task_timeout {
                config.task_timeout_secs = secs;
            }
            config.resilient_fetch |= resilient;
            config.validate()?;

            let mut all_urls = urls;
            if let Some(path) = &file {
                all_urls.extend(read_url_file(path)?);
            }
            if all_urls.is_empty() {
                anyhow::bail!("no URLs given (pass them as arguments or with --file)");
            }

            let format = format
                .or_else(|| output.as_deref().and_then(ExportFormat::from_path))
                .unwrap_or(ExportFormat::Text);
            let report = analyze(&config, &all_urls).await?;

            match &output {
                Some(path) => {
                    export_to_path(&report, format, path)?;
                    eprintln!("Wrote {} report to {}", format, path.display());
                }
                None => print!("{}", export_results(&report, format)?),
            }
            print_summary(&report, color);
        }
        Command::Extract { url, output } => {
            extract(&config, &url, output.as_deref(), color).await?;
        }
    }

    Ok(())
}

/// URLs from a file, skipping blank lines and `#` comments.
fn read_url_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read URL file {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect())
}

async fn analyze(config: &Config, urls: &[String]) -> anyhow::Result<BatchReport> {
    let store = ProgressStore::from_config(config);
    let orchestrator = Orchestrator::from_config(config, store.clone())?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            on_ctrl_c.cancel();
        }
    });

    let request_id = new_request_id();
    log::info!(
        "Batch {request_id}: {} URLs, {} workers",
        urls.len(),
        config.max_workers
    );
    let options = BatchOptions::from_config(config)
        .with_request_id(request_id.clone())
        .with_cancel(cancel);

    let bar = ProgressBar::new(urls.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {wide_msg}")?
            .progress_chars("=> "),
    );

    let batch = orchestrator.run_batch(urls, options);
    tokio::pin!(batch);
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    let result = loop {
        tokio::select! {
            result = &mut batch => break result,
            _ = ticker.tick() => {
                if let Some(state) = store.get(&request_id) {
                    bar.set_length(state.total_urls as u64);
                    bar.set_position(state.processed_count as u64);
                    bar.set_message(state.current_url.unwrap_or_default());
                }
            }
        }
    };
    bar.finish_and_clear();

    Ok(result?)
}

fn print_summary(report: &BatchReport, color: bool) {
    let summary = &report.summary;
    let ok = format!("{} successful", summary.successful_count);
    let failed = format!("{} failed", summary.failed_count);
    let average = match summary.average_grade_level {
        Some(avg) => format!("average grade {avg:.1} ({})", grade_level_description(avg)),
        None => "no average grade".to_string(),
    };

    if color {
        eprintln!(
            "{} URLs: {}, {}, {}",
            summary.total_urls,
            ok.green().bold(),
            if summary.failed_count > 0 {
                failed.red().bold().to_string()
            } else {
                failed.dimmed().to_string()
            },
            average.cyan()
        );
    } else {
        eprintln!("{} URLs: {ok}, {failed}, {average}", summary.total_urls);
    }
}

async fn extract(config: &Config, url: &str, output: Option<&Path>, color: bool) -> anyhow::Result<()> {
    let chain = ExtractionChain::from_config(config)?;
    log::debug!("Extracting {url}");
    let outcome = chain.extract(url, config.extraction_timeout()).await;
    let scores = match (&outcome.text, outcome.succeeded) {
        (Some(text), true) => Some(readgrade_core::analyze(text)),
        _ => None,
    };

    let report = extraction_report(&outcome, scores.as_ref());
    match output {
        Some(path) => {
            std::fs::write(path, &report)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Report saved to {}", path.display());
        }
        None => print!("{report}"),
    }

    match (&outcome.error, scores) {
        (Some(error), _) => {
            let line = format!("Extraction failed: {error}");
            if color {
                eprintln!("{}", line.red());
            } else {
                eprintln!("{line}");
            }
            anyhow::bail!("could not extract {}", outcome.url)
        }
        (None, Some(s)) => {
            let line = format!(
                "{} words, {} sentences, reading level {:.1} ({}) via {} extraction",
                s.word_count,
                s.sentence_count,
                s.consensus,
                grade_level_description(s.consensus),
                outcome.method.label()
            );
            if color {
                eprintln!("{}", line.green());
            } else {
                eprintln!("{line}");
            }
            Ok(())
        }
        (None, None) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_analyze_flags() {
        let cli = Cli::parse_from([
            "readgrade",
            "--no-color",
            "analyze",
            "https://a.example/x/y",
            "--workers",
            "4",
            "--format",
            "md",
        ]);
        assert!(cli.no_color);
        match cli.command {
            Command::Analyze {
                urls,
                workers,
                format,
                ..
            } => {
                assert_eq!(urls, vec!["https://a.example/x/y"]);
                assert_eq!(workers, Some(4));
                assert_eq!(format, Some(ExportFormat::Markdown));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(Cli::try_parse_from(["readgrade", "analyze", "--format", "xlsx"]).is_err());
    }

    #[test]
    fn url_file_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        std::fs::write(
            &path,
            "# reading list\nhttps://a.example/one\n\n   https://b.example/two  \n#https://c.example/x\n",
        )
        .unwrap();
        assert_eq!(
            read_url_file(&path).unwrap(),
            vec!["https://a.example/one", "https://b.example/two"]
        );
    }
}
