//! framecut
//!
//! Frame-accurate cutting of compressed video with minimal re-encoding:
//! whole GOPs are copied at the packet level and only the short runs between
//! each cut point and the next keyframe go through a decode/encode cycle.
//!
//! # Usage
//!
//! ```bash
//! framecut input.mp4 output.mp4 -k 10,20,40,50
//! framecut input.ts output.mkv -c 0,5
//! framecut input.mkv --inspect --json
//! ```

use clap::Parser;
use tracing::error;

use framecut::cli::{commands, Cli};
use framecut::FrameCutError;

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins when set; otherwise --log-level drives the filter
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("framecut={}", cli.log_level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = commands::run(cli) {
        error!("{:#}", e);
        std::process::exit(exit_code_for(&e));
    }
}

/// Map an error chain onto the documented exit codes; anything raised
/// outside the core (argument validation) is an argument error
fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<FrameCutError>())
        .map(|e| e.exit_code())
        .unwrap_or(2)
}
