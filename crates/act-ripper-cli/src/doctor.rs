//! Environment readiness check.

use crate::fetch::HttpFetcher;
use crate::host::chromium::CHROMIUM_PATH_ENV;
use crate::host::find_chromium;
use act_ripper::{Fetcher, RipperConfig};
use anyhow::Result;

/// Check Chromium availability, the output directory, and network reach.
pub async fn run(config: &RipperConfig) -> Result<()> {
    println!("act-ripper doctor");
    println!("=================");
    println!();

    println!("OS:   {}", std::env::consts::OS);
    println!("Arch: {}", std::env::consts::ARCH);
    println!();

    let chromium = find_chromium();
    match &chromium {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!("[!!] Chromium NOT found. Install Chrome or set {CHROMIUM_PATH_ENV}."),
    }

    let out = &config.output_dir;
    if out.is_dir() {
        println!("[OK] Output directory: {}", out.display());
    } else {
        println!("[!!] Output directory does not exist: {}", out.display());
    }

    let fetcher = HttpFetcher::new(config.fetch_timeout_ms.min(10_000));
    match config.accepted_prefixes.first() {
        Some(prefix) => match fetcher.fetch(prefix).await {
            Ok(_) => println!("[OK] Reached {prefix}"),
            Err(e) => println!("[??] Could not reach {prefix}: {e}"),
        },
        None => println!("[??] No accepted URL prefixes configured"),
    }

    println!(
        "     concurrency {}, fetch timeout {}ms, settle {}ms",
        config.fetch_concurrency, config.fetch_timeout_ms, config.settle_ms
    );

    println!();
    if chromium.is_some() {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
    }

    Ok(())
}
