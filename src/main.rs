//! Hotpage - on-demand compile-and-load cache for native page modules
//!
//! Compiles and loads the pages named on the command line through the cache,
//! reporting failures with the compiler's diagnostics.
//!
//! Usage: `hotpage [--watch] <page>...`

use std::path::Path;

use anyhow::{bail, Context};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hotpage::{spawn_clock_task, Config, PageCache, PageError};

/// Main entry point for the hotpage command.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the page cache
/// 4. Start the background clock task
/// 5. Load every page once, or keep reloading them with `--watch`
/// 6. Print cache statistics as JSON
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hotpage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut watch = false;
    let mut pages = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--watch" => watch = true,
            _ => pages.push(arg),
        }
    }
    if pages.is_empty() {
        bail!("usage: hotpage [--watch] <page>...");
    }

    let config = Config::from_env();
    info!(
        "Configuration loaded: root={}, compiler={}, check_interval={}ms",
        config.root.display(),
        config.compiler,
        config.check_interval_ms
    );

    let cache = PageCache::new(&config);
    let tick_handle = spawn_clock_task(cache.clone(), config.tick_interval(), config.static_idle());

    let failures = if watch {
        watch_pages(&cache, &config.root, &pages, config.tick_interval()).await;
        0
    } else {
        load_pages(&cache, &config.root, &pages).await
    };

    tick_handle.abort();

    let stats = serde_json::to_string_pretty(&cache.stats()).context("serializing stats")?;
    println!("{stats}");

    if failures > 0 {
        bail!("{failures} of {} pages failed", pages.len());
    }
    Ok(())
}

/// Loads every page once, returning how many failed.
async fn load_pages(cache: &PageCache, root: &Path, pages: &[String]) -> usize {
    let mut failures = 0;
    for page in pages {
        match cache.load_module(root, page).await {
            Ok(module) => info!(
                page = %page,
                generation = module.generation(),
                object_size = module.object_size(),
                "page ready"
            ),
            Err(e) => {
                failures += 1;
                report(page, &e);
            }
        }
    }
    failures
}

/// Re-requests every page each tick until Ctrl+C or SIGTERM.
async fn watch_pages(cache: &PageCache, root: &Path, pages: &[String], tick: std::time::Duration) {
    let watch = async {
        let mut generations = vec![0u64; pages.len()];
        loop {
            for (page, seen) in pages.iter().zip(generations.iter_mut()) {
                match cache.load_module(root, page).await {
                    Ok(module) if module.generation() != *seen => {
                        *seen = module.generation();
                        info!(page = %page, generation = *seen, "page (re)loaded");
                    }
                    Ok(_) => {}
                    Err(e) => report(page, &e),
                }
            }
            tokio::time::sleep(tick).await;
        }
    };

    tokio::select! {
        _ = watch => {}
        _ = shutdown_signal() => {}
    }
}

fn report(page: &str, err: &PageError) {
    match err.compiler_output() {
        Some(output) => error!(page = %page, "{err}\n{output}"),
        None => error!(page = %page, "{err}"),
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping watch...");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping watch...");
        }
    }
}
