//! CLI module for headless GameLens runs.
//!
//! The CLI drives the library exactly as a game host would, with a
//! synthetic frame grabber standing in for the renderer:
//!
//! ```text
//! +----------------+     +-----------+     +---------------+
//! | runner.rs      | --> | GameLens  | --> | output.rs     |
//! | (frame loop)   |     | (events)  |     | (print/JSON)  |
//! +----------------+     +-----------+     +---------------+
//! ```

mod args;
mod output;
mod runner;

pub use args::Args;
pub use output::run_event_loop;
pub use runner::{load_settings, run_simulation, synthetic_grabber, SimulationSummary};
