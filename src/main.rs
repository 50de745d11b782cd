mod api;
mod db;
mod harvest;
mod normalize;
mod pager;

use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use crate::api::RegistryClient;
use crate::harvest::HarvestOptions;

#[derive(Parser)]
#[command(name = "rosa_harvester", about = "NYSED license registry harvester")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the licenses table if it does not exist
    Init,
    /// Walk the registry prefix by prefix and upsert every record
    Harvest {
        /// Prefixes to harvest, e.g. "ABC" (default: A-Z)
        #[arg(short, long)]
        prefixes: Option<String>,
        /// Records per page
        #[arg(long, default_value = "100")]
        page_size: u32,
        /// Profession code to query
        #[arg(long, default_value = api::DEFAULT_PROFESSION_CODE)]
        profession: String,
        /// Delay between page requests, in milliseconds
        #[arg(long, default_value = "200")]
        delay_ms: u64,
        /// Scan every page instead of stopping a prefix on the first page
        /// with no new license numbers
        #[arg(long)]
        exhaustive: bool,
    },
    /// Fetch a single page and summarize it (no writes)
    Probe {
        /// Name prefix to query
        #[arg(short, long)]
        prefix: char,
        /// Zero-based page number
        #[arg(long, default_value = "0")]
        page: u32,
        /// Records per page
        #[arg(long, default_value = "100")]
        page_size: u32,
        /// Profession code to query
        #[arg(long, default_value = api::DEFAULT_PROFESSION_CODE)]
        profession: String,
    },
    /// Show store statistics
    Stats,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            println!("Schema ready.");
            Ok(())
        }
        Commands::Harvest {
            prefixes,
            page_size,
            profession,
            delay_ms,
            exhaustive,
        } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let client = RegistryClient::from_env(&profession)?;

            let opts = HarvestOptions {
                prefixes: match prefixes {
                    Some(raw) => harvest::parse_prefixes(&raw)?,
                    None => harvest::ALL_PREFIXES.to_vec(),
                },
                page_size,
                page_delay: Duration::from_millis(delay_ms),
                exhaustive,
            };

            println!("Harvesting {} prefixes...", opts.prefixes.len());
            let summary = harvest::run(&conn, &client, &opts)?;
            println!(
                "Done: {} new rows across {} pages.",
                summary.new_rows, summary.pages
            );
            if summary.missing_identity > 0 {
                println!(
                    "Skipped {} records without a license number.",
                    summary.missing_identity
                );
            }
            Ok(())
        }
        Commands::Probe {
            prefix,
            page,
            page_size,
            profession,
        } => {
            use crate::api::FetchPage;

            let client = RegistryClient::from_env(&profession)?;
            let payload = client.fetch_page(prefix.to_ascii_uppercase(), page, page_size)?;

            let records = payload.content.as_ref().map(|c| c.len());
            println!("Prefix {} page {}:", prefix.to_ascii_uppercase(), page);
            println!(
                "  records:    {}",
                records.map(|n| n.to_string()).unwrap_or_else(|| "null".into())
            );
            println!(
                "  totalPages: {}",
                payload
                    .total_pages
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "-".into())
            );
            let rows = normalize::extract_rows(&payload)?;
            if let Some(first) = rows.first() {
                println!("  first:      {:?} {:?}", first.license_number, first.name);
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Licenses:     {}", s.total);
            println!("With address: {}", s.with_address);
            println!("With date:    {}", s.with_date);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
