use std::sync::Arc;

use clap::Parser;

mod classify;
mod cli;
mod config;
mod domains;
mod errors;
mod identity;
mod metadata;
mod scrape;
mod web;

use config::Config;
use metadata::types::FetchRequest;
use scrape::PageRenderer;

fn build_renderer(config: &Config, no_headless: bool) -> Arc<dyn PageRenderer> {
    #[cfg(feature = "headless")]
    {
        if !no_headless {
            return Arc::new(scrape::headless::ChromeRenderer::new(
                config.scrape.proxy.clone(),
            ));
        }
    }
    let _ = (config, no_headless);
    Arc::new(scrape::NoopRenderer)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();
    let config = Config::load("config.yaml");

    match args.command {
        cli::Command::Daemon {} => {
            let renderer = build_renderer(&config, false);
            web::start_daemon(config, renderer);
            Ok(())
        }

        cli::Command::Fetch {
            url,
            method,
            headers,
            body,
            no_headless,
        } => {
            let renderer = build_renderer(&config, no_headless);
            let request = FetchRequest {
                url,
                method,
                headers: Some(cli::parse_header_args(&headers)),
                body,
            };

            let response = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(async {
                    metadata::fetch_and_extract(&config, renderer, request).await
                })?;

            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}
