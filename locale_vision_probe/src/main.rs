use anyhow::Context;
use locale_vision::{AnalysisConfig, ErrorReport, Fetcher, ResourceLocator};
use std::env;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Logging ---
    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter())
        .with_writer(std::io::stderr)
        .init();

    // --- 2. Argument Parsing ---
    let Some(target) = env::args().nth(1) else {
        println!("Usage: locale_vision_probe <locator>");
        return Ok(());
    };

    // --- 3. Fetcher Initialization ---
    let config = AnalysisConfig::from_env().context("invalid LOCALE_VISION_* configuration")?;
    let fetcher = Fetcher::from_config(&config.fetch).context("failed to build the fetcher")?;
    let locator = ResourceLocator::from(target.as_str());
    info!(%locator, timeout = ?config.fetch.direct_timeout, "probing");

    // --- 4. Fetch & Report ---
    // No render engine is built here, so only the direct attempt runs.
    match fetcher.fetch(&locator, false, config.fetch.direct_timeout).await {
        Ok(fetched) => {
            println!("locator: {}", fetched.locator);
            println!("method:  {}", fetched.method);
            match fetched.http_status {
                Some(status) => println!("status:  {status}"),
                None => println!("status:  -"),
            }
            println!("bytes:   {}", fetched.content.len());
            println!("elapsed: {:?}", fetched.elapsed);
            Ok(())
        }
        Err(error) => {
            let report = serde_json::to_string_pretty(&ErrorReport::from(&error))?;
            println!("{report}");
            anyhow::bail!("fetch failed ({})", error.cause())
        }
    }
}

/// `LOCALE_VISION_LOG` first, then `RUST_LOG`, then `info`.
fn build_env_filter() -> EnvFilter {
    if let Ok(directives) = env::var("LOCALE_VISION_LOG")
        && let Ok(filter) = EnvFilter::try_new(&directives)
    {
        return filter;
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
