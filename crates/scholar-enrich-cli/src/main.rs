use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use scholar_enrich_core::config_file::{apply_env, apply_file, load_config};
use scholar_enrich_core::{Config, Pipeline, ProgressEvent, RunStats, Waterfall};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod jsonl;
mod output;

use jsonl::{JsonlHarvester, JsonlStore};
use output::ColorMode;

/// Recover missing abstracts for harvested scholarly records
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log every source attempt (disables the progress bar)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enrich a JSON-lines file of harvested records
    Enrich {
        /// Input file, one harvested record per line
        input: PathBuf,

        /// Output file (default: <input>.enriched.jsonl); appended to if it exists
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after this many Works have been enriched
        #[arg(long)]
        max_papers: Option<usize>,

        /// Records read per page
        #[arg(long, default_value_t = 50)]
        page_size: usize,

        /// Contact address sent to polite-pool APIs
        #[arg(long)]
        contact_email: Option<String>,

        /// Query ACS article pages (off by default)
        #[arg(long)]
        enable_acs: bool,

        /// Skip the generic landing-page meta tag scrape
        #[arg(long)]
        no_html_scraping: bool,

        /// Do not derive tags from abstracts or titles
        #[arg(long)]
        no_keywords: bool,

        /// Comma-separated list of sources to skip
        #[arg(long, value_delimiter = ',')]
        disable_sources: Vec<String>,
    },

    /// Show the identifiers recognised in a URL or DOI
    Ids {
        /// URL or DOI
        value: String,
    },

    /// List the waterfall order and which sources are enabled
    Sources,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // target prefixes also cover scholar_enrich_core
    let default_filter = if cli.verbose {
        "scholar_enrich=debug,warn"
    } else {
        "scholar_enrich=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let color = ColorMode(!cli.no_color);
    let mut stdout = std::io::stdout();

    match cli.command {
        Command::Ids { value } => {
            output::print_identifiers(&mut stdout, &value, color)?;
            Ok(())
        }
        Command::Sources => {
            let config = resolve_config(|_| {});
            output::print_sources(&mut stdout, &config, color)?;
            Ok(())
        }
        Command::Enrich {
            input,
            output,
            max_papers,
            page_size,
            contact_email,
            enable_acs,
            no_html_scraping,
            no_keywords,
            disable_sources,
        } => {
            let config = resolve_config(|config| {
                if let Some(n) = max_papers {
                    config.max_papers = n;
                }
                if contact_email.is_some() {
                    config.contact_email = contact_email.clone();
                }
                if enable_acs {
                    config.enable_acs = true;
                }
                if no_html_scraping {
                    config.enable_html_scraping = false;
                }
                if no_keywords {
                    config.enable_nlp_keywords = false;
                }
                config.disabled_sources.extend(disable_sources.iter().cloned());
            });
            let output_path = output.unwrap_or_else(|| default_output_path(&input));
            enrich(&input, &output_path, page_size, config, cli.verbose, color).await
        }
    }
}

/// Defaults, then config file, then environment, then command-line flags.
fn resolve_config(flags: impl FnOnce(&mut Config)) -> Config {
    let mut config = Config::default();
    apply_file(&load_config(), &mut config);
    apply_env(&mut config, |name| std::env::var(name).ok());
    flags(&mut config);
    config
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "works".to_string());
    input.with_file_name(format!("{}.enriched.jsonl", stem))
}

async fn enrich(
    input: &Path,
    output_path: &Path,
    page_size: usize,
    config: Config,
    verbose: bool,
    color: ColorMode,
) -> anyhow::Result<()> {
    if !input.exists() {
        anyhow::bail!("File not found: {}", input.display());
    }
    if input == output_path {
        anyhow::bail!("Output file must differ from the input file");
    }

    let waterfall = Waterfall::from_config(&config)?;
    if config.enable_fulltext {
        tracing::warn!(
            "ENABLE_FULLTEXT is set but no full-text extractor is configured; fullText is left as harvested"
        );
    }
    tracing::info!(config = ?config, "configuration resolved");

    let mut harvester = JsonlHarvester::open(input, page_size)?;
    let mut store = JsonlStore::open(output_path)?;
    let pipeline = Pipeline::new(waterfall, config.max_papers);
    let mut stats = RunStats::new();

    let bar = if verbose {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(config.max_papers as u64)
    };
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{bar:30}] {pos}/{len} {wide_msg}")?
            .progress_chars("=> "),
    );

    let progress = {
        let bar = bar.clone();
        move |event: ProgressEvent| match event {
            ProgressEvent::Enriching { title, .. } => {
                bar.set_message(output::short_title(&title, 60));
            }
            ProgressEvent::Enriched {
                index,
                title,
                summary_source,
                completeness,
            } => {
                bar.inc(1);
                tracing::debug!(
                    index,
                    title = %title,
                    source = %summary_source,
                    completeness = completeness.label(),
                    "work enriched"
                );
            }
            ProgressEvent::Skipped { title, reason } => {
                tracing::debug!(title = ?title, reason = %reason, "record skipped");
            }
            ProgressEvent::CapReached { max_papers } => {
                tracing::info!(max_papers, "paper cap reached");
            }
            ProgressEvent::Page { records } => {
                tracing::debug!(records, "page harvested");
            }
            ProgressEvent::Interrupted { .. } => {
                bar.set_message("interrupted, writing enriched Works");
            }
        }
    };

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });

    let result = pipeline
        .run(&mut harvester, &mut store, &mut stats, progress, &cancel)
        .await;
    bar.finish_and_clear();
    let processed = result?;

    output::print_report(&mut std::io::stdout(), &stats, color)?;
    println!();
    println!(
        "Wrote {} of {} enriched Works to {}",
        store.written(),
        processed,
        output_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_sits_next_to_input() {
        assert_eq!(
            default_output_path(Path::new("/data/harvest.jsonl")),
            PathBuf::from("/data/harvest.enriched.jsonl")
        );
    }

    #[test]
    fn cli_parses_enrich_flags() {
        let cli = Cli::try_parse_from([
            "scholar-enrich",
            "-v",
            "enrich",
            "in.jsonl",
            "--max-papers",
            "10",
            "--disable-sources",
            "crossref,core",
            "--enable-acs",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Enrich {
                max_papers,
                disable_sources,
                enable_acs,
                page_size,
                ..
            } => {
                assert_eq!(max_papers, Some(10));
                assert_eq!(disable_sources, vec!["crossref", "core"]);
                assert!(enable_acs);
                assert_eq!(page_size, 50);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
