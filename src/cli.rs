use crate::expander::{DEFAULT_CONCURRENCY, DEFAULT_MAX_DEPTH};
use crate::extractor::DEFAULT_STREAMING_THRESHOLD;
use crate::scraper::{DEFAULT_MAX_BODY_BYTES, DEFAULT_METADATA_TIMEOUT};
use clap::{Arg, ArgMatches, Command};
use std::ffi::OsString;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BATCH_SIZE: usize = 25;
pub const MAX_BATCH_SIZE: usize = 50;
pub const DEFAULT_SITEMAP_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

pub const USER_AGENT: &str = concat!(
    "sitemap-harvester/",
    env!("CARGO_PKG_VERSION"),
    " (+",
    env!("CARGO_PKG_HOMEPAGE"),
    ")"
);

/// Tunables shared by the sitemap client, the metadata fetcher and the job
/// pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub user_agent: String,
    pub sitemap_timeout: Duration,
    pub metadata_timeout: Duration,
    pub max_body_bytes: usize,
    pub streaming_threshold: usize,
    pub max_depth: usize,
    pub batch_size: usize,
    pub concurrency: usize,
    pub recursive: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            user_agent: USER_AGENT.to_string(),
            sitemap_timeout: DEFAULT_SITEMAP_TIMEOUT,
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            streaming_threshold: DEFAULT_STREAMING_THRESHOLD,
            max_depth: DEFAULT_MAX_DEPTH,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            recursive: true,
        }
    }
}

impl PipelineConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn with_metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Serve {
        bind: String,
    },
    Crawl {
        sitemap_url: String,
        user_id: String,
        domain: Option<String>,
    },
    Expand {
        sitemap_url: String,
    },
    Schema,
}

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub command: CliCommand,
    pub verbose: bool,
    pub config: PipelineConfig,
}

fn build_command() -> Command {
    let sitemap_arg = Arg::new("sitemap")
        .long("sitemap")
        .value_name("URL")
        .help("Root sitemap or sitemap index URL")
        .required(true);

    Command::new("sitemap-harvester")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Expands sitemap trees, extracts page metadata and tracks pollable jobs")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .global(true)
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("max-depth")
                .long("max-depth")
                .global(true)
                .value_name("N")
                .help("Maximum sitemap index nesting to follow")
                .value_parser(clap::value_parser!(usize))
                .default_value("5"),
        )
        .arg(
            Arg::new("batch-size")
                .long("batch-size")
                .global(true)
                .value_name("N")
                .help("URLs fetched concurrently per batch (1-50)")
                .value_parser(clap::value_parser!(usize))
                .default_value("25"),
        )
        .arg(
            Arg::new("concurrency")
                .long("concurrency")
                .global(true)
                .value_name("N")
                .help("Nested sitemaps fetched concurrently")
                .value_parser(clap::value_parser!(usize))
                .default_value("5"),
        )
        .arg(
            Arg::new("timeout-secs")
                .long("timeout-secs")
                .global(true)
                .value_name("SECONDS")
                .help("Timeout for each page metadata fetch")
                .value_parser(clap::value_parser!(u64))
                .default_value("15"),
        )
        .subcommand(
            Command::new("serve").about("Run the HTTP job API").arg(
                Arg::new("bind")
                    .long("bind")
                    .value_name("ADDR")
                    .env("BIND_ADDR")
                    .help("Address to listen on")
                    .default_value(DEFAULT_BIND_ADDR),
            ),
        )
        .subcommand(
            Command::new("crawl")
                .about("Run one job end-to-end and print its summary")
                .arg(sitemap_arg.clone())
                .arg(
                    Arg::new("user")
                        .long("user")
                        .value_name("ID")
                        .help("User the job is recorded for")
                        .required(true),
                )
                .arg(
                    Arg::new("domain")
                        .long("domain")
                        .value_name("DOMAIN")
                        .help("Domain to record (defaults to the sitemap host)"),
                ),
        )
        .subcommand(
            Command::new("expand")
                .about("Print the leaf URLs of a sitemap tree")
                .arg(sitemap_arg),
        )
        .subcommand(Command::new("schema").about("Print TypeScript declarations"))
}

impl CliArgs {
    pub fn parse() -> Result<Self, String> {
        Self::parse_from(std::env::args_os())
    }

    pub fn parse_from<I, T>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = build_command()
            .try_get_matches_from(args)
            .map_err(|e| e.to_string())?;

        let command = match matches.subcommand() {
            Some(("serve", sub)) => CliCommand::Serve {
                bind: string_arg(sub, "bind").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            },
            Some(("crawl", sub)) => CliCommand::Crawl {
                sitemap_url: Self::validate_sitemap_url(sub)?,
                user_id: string_arg(sub, "user").ok_or("Missing --user")?,
                domain: string_arg(sub, "domain"),
            },
            Some(("expand", sub)) => CliCommand::Expand {
                sitemap_url: Self::validate_sitemap_url(sub)?,
            },
            Some(("schema", _)) => CliCommand::Schema,
            _ => return Err("No command given".to_string()),
        };

        let mut config = PipelineConfig::default()
            .with_batch_size(*matches.get_one::<usize>("batch-size").unwrap_or(&DEFAULT_BATCH_SIZE))
            .with_metadata_timeout(Duration::from_secs(
                *matches.get_one::<u64>("timeout-secs").unwrap_or(&15),
            ));
        config.max_depth = *matches
            .get_one::<usize>("max-depth")
            .unwrap_or(&DEFAULT_MAX_DEPTH);
        config.concurrency = (*matches
            .get_one::<usize>("concurrency")
            .unwrap_or(&DEFAULT_CONCURRENCY))
        .max(1);

        Ok(CliArgs {
            command,
            verbose: matches.get_flag("verbose"),
            config,
        })
    }

    fn validate_sitemap_url(matches: &ArgMatches) -> Result<String, String> {
        let raw = string_arg(matches, "sitemap").ok_or("Missing --sitemap")?;
        match Url::parse(&raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url.to_string()),
            _ => Err(format!("Invalid URL: {raw}")),
        }
    }
}

fn string_arg(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.get_one::<String>(id).cloned()
}
