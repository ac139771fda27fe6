use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use proxy_harvester::{
    config::{self, Category, HarvestConfig},
    logging,
    proxy::{Candidate, Fetcher, HttpProbe, ParserKind, ValidatorConfig},
    Harvester, JsonFileSink,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Harvests public proxy lists and keeps the proxies that actually work
#[derive(Parser)]
#[command(name = "proxy-harvester")]
#[command(about = "Harvests public proxy lists and keeps the proxies that actually work")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log per-page and per-probe details
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl and validate in a loop until interrupted
    Run {
        #[command(flatten)]
        harvest: HarvestArgs,
        /// Seconds to wait between cycles
        #[arg(short, long, default_value = "3600")]
        interval: u64,
    },
    /// Run a single crawl and validation cycle
    Once {
        #[command(flatten)]
        harvest: HarvestArgs,
    },
    /// Run a parser over a saved page and print the addresses it finds
    Extract {
        /// Saved response body
        input: PathBuf,
        /// Parser name (api1, api2, article1, fpslist, html1-html4)
        #[arg(short, long)]
        parser: String,
    },
    /// Write the built-in source list to a TOML file
    InitSources {
        /// Destination file
        #[arg(default_value = "sources.toml")]
        output: PathBuf,
    },
}

#[derive(Args)]
struct HarvestArgs {
    /// TOML file with [[sources]] entries; built-in sources when absent
    #[arg(short, long)]
    sources: Option<PathBuf>,
    /// Which sources to crawl
    #[arg(short, long, value_enum, default_value_t = Category::All)]
    category: Category,
    /// Maximum probes in flight
    #[arg(short = 'n', long, default_value = "300")]
    workers: usize,
    /// Probe timeout in seconds
    #[arg(long, default_value = "10")]
    timeout: u64,
    /// Listing page timeout in seconds
    #[arg(long, default_value = "5")]
    fetch_timeout: u64,
    /// URL fetched through each candidate
    #[arg(long, default_value = "http://captive.apple.com/")]
    test_url: String,
    /// Text the test URL response must contain
    #[arg(long, default_value = "Success")]
    marker: String,
    /// Output JSON file, replaced every cycle
    #[arg(short, long, default_value = "proxy_ip.json")]
    output: PathBuf,
}

impl HarvestArgs {
    fn config(&self) -> HarvestConfig {
        let validator = ValidatorConfig::new()
            .with_workers(self.workers)
            .with_timeout(Duration::from_secs(self.timeout))
            .with_test_url(self.test_url.clone())
            .with_marker(self.marker.clone());

        HarvestConfig::new()
            .with_category(self.category)
            .with_fetch_timeout(Duration::from_secs(self.fetch_timeout))
            .with_validator(validator)
            .with_output(self.output.clone())
    }

    fn harvester(&self, config: &HarvestConfig) -> Result<Harvester<Fetcher, HttpProbe>> {
        let sources = config::load_sources(self.sources.as_deref())?;
        if sources.is_empty() {
            return Err(anyhow!("no usable sources configured"));
        }
        info!(
            sources = sources.len(),
            category = ?config.category,
            workers = config.validator.workers,
            test_url = %config.validator.test_url,
            "harvester configured"
        );
        Harvester::from_config(config, sources)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    match cli.command {
        Commands::Run { harvest, interval } => {
            let config = harvest.config().with_interval(Duration::from_secs(interval));
            let harvester = harvest.harvester(&config)?;
            let sink = JsonFileSink::new(&config.output);
            harvester.run_forever(&sink, config.interval).await?;
        }
        Commands::Once { harvest } => {
            let config = harvest.config();
            let harvester = harvest.harvester(&config)?;
            let sink = JsonFileSink::new(&config.output);
            let report = harvester.run_once(&sink).await?;
            println!(
                "Results: {} normal, {} anonymous (saved to {:?})",
                report.classified.normal.len(),
                report.classified.anonymous.len(),
                config.output
            );
        }
        Commands::Extract { input, parser } => {
            let kind = ParserKind::from_name(&parser)
                .ok_or_else(|| anyhow!("Unknown parser: {}", parser))?;
            let body = std::fs::read_to_string(&input)?;
            let raw = kind.extract(&body);
            let valid: Vec<Candidate> = raw.iter().filter_map(|s| Candidate::parse(s)).collect();

            for candidate in &valid {
                println!("{}", candidate);
            }
            eprintln!(
                "Extracted {} entries from {:?}, {} valid",
                raw.len(),
                input,
                valid.len()
            );
        }
        Commands::InitSources { output } => {
            config::write_default(&output)?;
            println!("Wrote default sources to {:?}", output);
        }
    }

    Ok(())
}
