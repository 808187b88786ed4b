//! framecut library
//!
//! Frame-accurate lossless-as-possible cutting of compressed video. Given an
//! input container and a list of time intervals to keep, produces an output
//! whose decoded video matches the input over those intervals while
//! re-encoding only the short runs between each cut point and the next
//! keyframe; everything else is copied at the packet level.

pub mod bitstream;
pub mod cli;
pub mod engine;
pub mod error;
pub mod index;
pub mod job;
pub mod mux;
pub mod planner;
pub mod probe;
pub mod streams;
pub mod timeline;
pub mod utils;

// Re-export commonly used types
pub use error::{FrameCutError, FrameCutResult};
pub use job::{CancelFlag, Job, JobOptions, JobReport};
pub use planner::{CutPlanner, SplicePlan};
pub use timeline::{TimeInterval, TimeResolver};

/// Initialize the underlying codec/container library
pub fn init() -> FrameCutResult<()> {
    ffmpeg_next::init()?;
    Ok(())
}
