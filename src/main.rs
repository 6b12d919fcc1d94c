use dotenv::dotenv;
use sitemap_harvester::{
    cli::{CliArgs, CliCommand},
    generate_ts::generate_typescript_schema,
    pipeline::{JobPipeline, SubmitRequest},
    server,
    sitemap::SitemapClient,
    storage::MemoryStore,
    SitemapExpander,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenv().ok();

    let args = match CliArgs::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    // RUST_LOG wins over --verbose when set
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = args.config;

    match args.command {
        CliCommand::Serve { bind } => {
            let pipeline = match JobPipeline::new(Arc::new(MemoryStore::new()), config) {
                Ok(pipeline) => Arc::new(pipeline),
                Err(e) => {
                    error!("Failed to initialize pipeline: {}", e);
                    std::process::exit(1);
                }
            };

            info!("Starting sitemap-harvester API on {}", bind);
            if let Err(e) = server::serve(&bind, pipeline).await {
                error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        CliCommand::Crawl {
            sitemap_url,
            user_id,
            domain,
        } => {
            let pipeline = match JobPipeline::new(Arc::new(MemoryStore::new()), config) {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    error!("Failed to initialize pipeline: {}", e);
                    std::process::exit(1);
                }
            };

            let request = SubmitRequest {
                domain,
                ..SubmitRequest::new(&sitemap_url, &user_id)
            };
            let submission = match pipeline.submit(request).await {
                Ok(submission) => submission,
                Err(e) => {
                    error!("Failed to create job: {}", e);
                    std::process::exit(1);
                }
            };

            let outcome = pipeline.run(&submission).await;
            match serde_json::to_string_pretty(&outcome) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Failed to render summary: {}", e),
            }
            if outcome.error.is_some() {
                std::process::exit(1);
            }
        }
        CliCommand::Expand { sitemap_url } => {
            let client = match SitemapClient::new(&config) {
                Ok(client) => client,
                Err(e) => {
                    error!("Failed to initialize HTTP client: {}", e);
                    std::process::exit(1);
                }
            };

            let report = SitemapExpander::new(client)
                .with_max_depth(config.max_depth)
                .with_concurrency(config.concurrency)
                .expand_with_report(&sitemap_url)
                .await;

            for url in sitemap_harvester::dedup_preserving_order(report.urls) {
                println!("{}", url);
            }
            for failure in &report.failures {
                error!("{}: {}", failure.sitemap_url, failure.error);
            }
        }
        CliCommand::Schema => {
            print!("{}", generate_typescript_schema());
        }
    }
}
