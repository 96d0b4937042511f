mod analysis;
mod config;
mod demo;
mod loader;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::loader::load_raw;
use crate::models::SourceKind;
use crate::pipeline::{Coverage, Pipeline, PipelineReport, RawBatch};
use crate::scraper::parsers::CompiledSchema;
use crate::storage::Exporter;

#[derive(Parser)]
#[command(
    name = "imovel-harvest",
    about = "Harvest auction and market real-estate listings and compare prices per m²",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory for exported artifacts (default: pipeline.output_dir)
    #[arg(short, long, global = true, env = "IMOVEL_OUTPUT")]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl the configured sources, then clean, compare and export
    Harvest {
        /// Only harvest these sources (repeatable)
        #[arg(short, long = "source")]
        sources: Vec<String>,
    },

    /// Clean and compare previously harvested raw listings (.json or .csv)
    Analyze {
        #[arg(long)]
        auction: PathBuf,

        #[arg(long)]
        market: PathBuf,
    },

    /// Run the offline path over seeded synthetic listings
    Demo {
        #[arg(short, long, default_value_t = 100)]
        count: usize,

        #[arg(short, long, default_value_t = 42)]
        seed: u64,
    },

    /// Validate configuration and compile every extraction schema
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "imovel_harvest=info,warn",
        1 => "imovel_harvest=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;
    let output = cli.output.clone().unwrap_or_else(|| config.pipeline.output_dir.clone());

    match cli.command {
        Command::Harvest { sources } => {
            if let Some(unknown) = sources.iter().find(|s| config.source(s).is_none()) {
                bail!("Unknown source `{}`", unknown);
            }
            let _t = utils::Timer::start("Harvest");
            let cancel = CancellationToken::new();
            spawn_ctrl_c(cancel.clone());

            let pipeline = Pipeline::new(config);
            let run = pipeline.run(&sources, &cancel).await?;

            // Raw listings are kept even when nothing is statistically usable.
            let exporter = Exporter::new(&output)?;
            for batch in &run.batches {
                exporter.write_raw(&batch.source, &batch.listings)?;
            }
            print_coverage(&run.coverage);

            let report = run.analysis?;
            export(&exporter, &report)?;
            print_report(&report);
        }

        Command::Analyze { auction, market } => {
            let _t = utils::Timer::start("Analyze");
            let batches = vec![
                file_batch(&config, &auction, SourceKind::Auction)?,
                file_batch(&config, &market, SourceKind::Market)?,
            ];
            let report = Pipeline::new(config).analyze(batches)?;
            export(&Exporter::new(&output)?, &report)?;
            print_report(&report);
        }

        Command::Demo { count, seed } => {
            let _t = utils::Timer::start("Demo");
            let report = Pipeline::new(config).analyze(demo::generate(count, seed))?;
            export(&Exporter::new(&output)?, &report)?;
            print_report(&report);
        }

        Command::CheckConfig => {
            println!("Configuration OK");
            for s in &config.sources {
                let schema = CompiledSchema::compile(&s.fields)?;
                println!(
                    "  {:<10} {:<8} {} ({} pages, {} listings){}",
                    s.name,
                    s.kind.as_str(),
                    s.base_url,
                    s.max_pages,
                    s.max_listings,
                    if s.enabled { "" } else { " [disabled]" }
                );
                println!("             fields: {}", schema.field_names().collect::<Vec<_>>().join(", "));
            }
        }
    }

    Ok(())
}

/// First Ctrl-C stops scheduling new fetches; collected listings are kept.
fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight requests");
            cancel.cancel();
        }
    });
}

/// Tag a file with the configured source of `kind`, falling back to the kind name.
fn file_batch(config: &AppConfig, path: &Path, kind: SourceKind) -> Result<RawBatch> {
    let source = config
        .sources
        .iter()
        .find(|s| s.kind == kind)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| kind.to_string());
    let listings = load_raw(path, &source)?;
    Ok(RawBatch { source, kind, listings })
}

fn export(exporter: &Exporter, report: &PipelineReport) -> Result<()> {
    for ds in &report.datasets {
        exporter.write_listings(&ds.source, &ds.listings)?;
    }
    exporter.write_listings("combinado", &report.combined.listings)?;
    exporter.write_summary(&report.summary)?;
    Ok(())
}

fn print_coverage(coverage: &[Coverage]) {
    for c in coverage {
        println!(
            "  {:<10} {} of {} listings extracted ({} fetch, {} extraction failures){}",
            c.source,
            c.extracted,
            c.attempted,
            c.fetch_failures,
            c.extraction_failures,
            if c.cancelled { " [cancelled]" } else { "" }
        );
    }
}

fn print_report(report: &PipelineReport) {
    println!("─────────────────────────────────────────────");
    println!("  Auction vs market price comparison");
    println!("─────────────────────────────────────────────");

    for (source, reason) in &report.skipped {
        println!("  {:<10} skipped: {}", source, reason);
    }

    let money = |v: Option<f64>| v.map(utils::fmt_brl).unwrap_or_else(|| "—".into());
    for (name, s) in &report.summary.sources {
        println!();
        println!("  {} ({})", name, s.kind);
        println!("    Listings         : {}", utils::fmt_thousands(s.count as i64, '.'));
        println!("    Mean price       : {}", money(s.mean_price));
        println!("    Median price     : {}", money(s.median_price));
        println!("    Mean price/m²    : {}", money(s.mean_price_per_m2));
        println!("    Median price/m²  : {}", money(s.median_price_per_m2));
        println!(
            "    Mean area        : {}",
            s.mean_area.map(|a| format!("{:.1} m²", a)).unwrap_or_else(|| "—".into())
        );
    }

    if let Some(cmp) = &report.summary.comparison {
        println!();
        println!("  {} relative to {}", cmp.other, cmp.baseline);
        println!("    Mean price diff     : {}", utils::fmt_pct(cmp.mean_price_diff_pct));
        println!("    Mean price/m² diff  : {}", utils::fmt_pct(cmp.mean_price_per_m2_diff_pct));
    }
    println!("─────────────────────────────────────────────");
    info!("{} listings in combined dataset", report.combined.count());
}
