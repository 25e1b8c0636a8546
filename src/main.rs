use std::env;
use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use dotenv::dotenv;

use log_fetch::{
    config,
    dates::{self, DateRange},
    fetch::{fetch_logs, AppendOrder, FetchJob, UndatedPolicy},
    store,
};

/// Downloads the log files of a date range from S3 and merges them into a
/// single file. Logs live under month prefixes (YYYYMM) and carry their day
/// in the file name (worker3-20161213.log.gz).
#[derive(Parser, Debug)]
#[command(version, about = "download and merge log files from S3 for a time period", long_about = None)]
struct Cli {
    #[arg(short, long, action = clap::ArgAction::Count, help = "Increase debug level (use -d for info, -dd for debug, -ddd for trace)")]
    debug: u8,

    /// start date in format YYYYMMDD
    #[arg(short = 's', long = "startdate", value_parser = parse_date_arg)]
    start_date: NaiveDate,

    /// end date in format YYYYMMDD, inclusive
    #[arg(short = 'e', long = "enddate", value_parser = parse_date_arg)]
    end_date: NaiveDate,

    /// destination file, appended to
    #[arg(short, long)]
    file: PathBuf,

    /// configuration file path, defaults to ~/.get_analytics_log.config.json
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// directly set an endpoint such as http://localhost:9000
    /// for local development or another s3 compatible API
    #[arg(short = 'p', long)]
    endpoint: Option<String>,

    /// directory where downloads are staged before being merged
    #[arg(short, long, default_value = ".")]
    workdir: PathBuf,

    /// merge files in the order of their file name date instead of listing order
    #[arg(long)]
    sort_by_date: bool,

    /// skip files without a date in their name instead of failing
    #[arg(long)]
    skip_undated: bool,
}

fn parse_date_arg(s: &str) -> Result<NaiveDate, String> {
    dates::parse_date(s).map_err(|e| e.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.debug {
        0 => {}
        1 => env::set_var("RUST_LOG", "info"),
        2 => env::set_var("RUST_LOG", "debug"),
        _ => env::set_var("RUST_LOG", "trace"),
    }
    env_logger::init();

    if let Err(e) = run(cli).await {
        log::error!("error: {:#}", e);
        println!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), anyhow::Error> {
    let range = DateRange::new(cli.start_date, cli.end_date)?;

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let config = config::load(&config_path)
        .with_context(|| format!("can't load config file {}", config_path.display()))?;

    let store = store::new(&config.s3, cli.endpoint.as_deref())?;

    let job = FetchJob {
        range,
        destination: cli.file,
        staging_dir: cli.workdir,
        order: if cli.sort_by_date {
            AppendOrder::EmbeddedDate
        } else {
            AppendOrder::Discovery
        },
        undated: if cli.skip_undated {
            UndatedPolicy::Skip
        } else {
            UndatedPolicy::Abort
        },
    };

    log::info!(
        "fetching logs {} - {} from bucket {} into {}",
        range.start(),
        range.end(),
        config.s3.bucket,
        job.destination.display()
    );

    let summary = fetch_logs(&store, &job).await?;

    println!(
        "Merged {} of {} files ({} bytes downloaded, {} bytes appended) into {}",
        summary.selected,
        summary.listed,
        summary.downloaded_bytes,
        summary.appended_bytes,
        job.destination.display()
    );
    if summary.skipped_undated > 0 {
        println!("Skipped {} files without a date", summary.skipped_undated);
    }

    Ok(())
}
