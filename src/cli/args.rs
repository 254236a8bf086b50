//! CLI argument parsing using clap.
//!
//! Defines the command-line interface for gamelens-cli.

use clap::Parser;
use std::path::PathBuf;

/// GameLens CLI - run the capture pipeline against a simulated game loop
#[derive(Parser, Debug, Clone)]
#[command(name = "gamelens-cli")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Settings file (default: <data dir>/gamelens/settings.toml)
    #[arg(short = 's', long)]
    pub settings: Option<PathBuf>,

    /// Override where captures are stored
    #[arg(short = 'd', long)]
    pub data_dir: Option<PathBuf>,

    /// Collector base URL (overrides settings)
    #[arg(long, env = "GAMELENS_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Game identifier sent when creating a session
    #[arg(long, env = "GAMELENS_GAME_ID")]
    pub game_id: Option<String>,

    /// Number of frames to simulate
    #[arg(short = 'n', long, default_value_t = 120)]
    pub frames: u64,

    /// Simulated frame rate
    #[arg(long, default_value_t = 60.0)]
    pub fps: f64,

    /// Request an automatic snap every N frames
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub snap_every: u64,

    /// Frame at which the simulated context becomes sensitive
    #[arg(long)]
    pub sensitive_at: Option<u64>,

    /// Frame at which the simulated context stops being sensitive
    #[arg(long)]
    pub clear_at: Option<u64>,

    /// Start with capture disabled
    #[arg(long)]
    pub disabled: bool,

    /// Output events as JSON lines (for scripting/parsing)
    #[arg(long)]
    pub json: bool,

    /// Show verbose output (debug information)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Args {
    /// Validate argument combinations clap cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            anyhow::bail!("--fps must be positive, got {}", self.fps);
        }
        if let (Some(from), Some(to)) = (self.sensitive_at, self.clear_at) {
            if to < from {
                anyhow::bail!("--clear-at ({to}) is before --sensitive-at ({from})");
            }
        }
        Ok(())
    }
}
