//! Command-line argument definitions

use clap::Parser;

/// Frame-accurate smart cutting of compressed video
///
/// Copies full GOPs at the packet level and re-encodes only the short runs
/// between each cut point and the next keyframe.
#[derive(Parser, Debug)]
#[command(name = "framecut", version, about)]
pub struct Cli {
    /// Input video file path
    pub input: String,

    /// Output file path
    #[arg(required_unless_present = "inspect")]
    pub output: Option<String>,

    /// Time pairs to keep, comma separated (seconds, MM:SS.fff,
    /// HH:MM:SS.fff, frame indices like 720f, start/end, or negative
    /// offsets from end-of-file)
    #[arg(short = 'k', long = "keep", value_delimiter = ',', num_args = 1.., conflicts_with = "cut")]
    pub keep: Vec<String>,

    /// Time pairs to remove; the complement over the whole file is kept
    #[arg(short = 'c', long = "cut", value_delimiter = ',', num_args = 1..)]
    pub cut: Vec<String>,

    /// Log level
    #[arg(long, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: String,

    /// Quality preset for boundary re-encoding
    #[arg(long, default_value = "normal", value_parser = ["low", "normal", "high", "indistinguishable", "near-lossless", "lossless"])]
    pub quality: String,

    /// Cut on keyframes only (inaccurate boundaries, zero re-encoding)
    #[arg(long)]
    pub keyframe_mode: bool,

    /// Keep input timestamps instead of starting the output at zero
    #[arg(long)]
    pub preserve_timestamps: bool,

    /// Decode-window cap in frames for pathological long-GOP inputs
    #[arg(long, default_value_t = 600)]
    pub max_gop_frames: usize,

    /// Delete the partial output file when cancelled
    #[arg(long)]
    pub remove_partial: bool,

    /// Print stream and GOP information instead of cutting
    #[arg(long)]
    pub inspect: bool,

    /// Inspection output as JSON
    #[arg(long, requires = "inspect")]
    pub json: bool,
}
