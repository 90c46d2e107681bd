//! 🖥️ lvx-cli — the thin shell around the logvex engine.
//!
//! 📦 Everything interesting lives in the `lvx` crate. This binary does the
//! unglamorous perimeter work: turn on the lights (tracing), find the map
//! (config), start the machine (`lvx::run`), and read the receipt out loud
//! when it stops. If main() ever grows past a page, the engine is leaking. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lvx::reliability::BreakerState;

/// 🗺️ Resolve the config path from argv.
///
/// One optional positional argument, defaulting to `lvx.toml`. A missing
/// file is a note, not a crash — running on `LVX_*` environment variables
/// alone is a supported way to live, and containers do it all the time.
fn config_path() -> Result<Option<PathBuf>> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("lvx.toml"));
    let exists = path.try_exists().with_context(|| {
        format!(
            "💀 Could not even CHECK whether '{}' exists. That's usually a \
             permissions problem on the parent directory, not a typo.",
            path.display()
        )
    })?;
    if !exists {
        warn!(
            "🗺️ no config file at '{}' — running on LVX_* environment variables alone",
            path.display()
        );
        return Ok(None);
    }
    Ok(Some(path))
}

#[tokio::main]
async fn main() -> Result<()> {
    // 📡 tracing before anything else — config loading is the first thing
    // worth seeing, and the first thing that goes wrong
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let path = config_path()?;
    let app_config = lvx::app_config::load_config(path.as_deref()).context(
        "💀 The configuration did not survive contact with serde. The error \
         below names the section and the key — start there, not at line 1.",
    )?;

    match lvx::run(app_config).await {
        Ok(report) => {
            // 🧾 the receipt: where every event ended up
            let lost =
                report.ingest.ingest_dropped + report.buffer.dropped + report.dlq.dropped;
            info!(
                "✅ pipeline drained: {} ingested, {} delivered, {} dead-lettered, {} lost to backpressure",
                report.ingest.ingested, report.router.delivered, report.dlq.size, lost
            );
            if report.ingest.parse_errors > 0 {
                info!("📄 {} empty line(s) skipped at parse", report.ingest.parse_errors);
            }
            // a non-empty DLQ is not a failure, but it IS homework
            if report.dlq.size > 0 {
                warn!(
                    "🪦 {} event(s) are waiting in the dead-letter queue — \
                     they exhausted their deliveries and want to talk to an operator",
                    report.dlq.size
                );
            }
            for (sink, state) in &report.breakers {
                if *state != BreakerState::Closed {
                    warn!("🚧 breaker for sink '{sink}' ended the run {state} — that sink needs attention");
                }
            }
            Ok(())
        }
        Err(err) => {
            // 💀 unwind the context chain, deepest cause last — the bottom
            // line is almost always the one to paste into the incident doc
            error!("💀 pipeline failed: {err}");
            for (depth, cause) in err.chain().skip(1).enumerate() {
                error!("   └ cause {}: {cause}", depth + 1);
            }
            std::process::exit(1);
        }
    }
}
