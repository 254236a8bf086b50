//! GameLens CLI - run the capture pipeline against a simulated game loop
//!
//! # Usage
//!
//! ```bash
//! # Build the CLI binary
//! cargo build --features cli --bin gamelens-cli
//!
//! # 5 seconds at 60 fps, storing captures under ./captures
//! ./target/debug/gamelens-cli -n 300 -d ./captures
//!
//! # Deliver to a local collector, JSON events for scripting
//! ./target/debug/gamelens-cli --endpoint http://localhost:4000 --game-id demo --json | jq .
//!
//! # Pause menu open between frames 60 and 120
//! ./target/debug/gamelens-cli --sensitive-at 60 --clear-at 120
//! ```

use anyhow::Result;
use clap::Parser;

use gamelens_lib::cli::{run_simulation, Args};
use gamelens_lib::{DEFAULT_LOG_FILTER, VERBOSE_LOG_FILTER};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging based on verbosity
    gamelens_lib::init_logging(if args.verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    });

    let summary = run_simulation(&args).await?;

    if args.json {
        println!("{}", serde_json::json!({ "source": "summary", "summary": summary }));
    } else {
        eprintln!(
            "[cli] {} frames, {} snaps queued, {} dropped, {} captures ({} failed), {} uploaded, {} upload failures",
            summary.frames,
            summary.snaps_queued,
            summary.snaps_dropped,
            summary.captures,
            summary.capture_failures,
            summary.uploads.delivered,
            summary.uploads.failed
        );
    }

    Ok(())
}
