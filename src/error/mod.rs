//! Error handling module for framecut

use thiserror::Error;

/// Main error type for framecut operations
#[derive(Error, Debug)]
pub enum FrameCutError {
    /// Unparseable time token on the command line
    #[error("Invalid time token: '{token}'. Expected seconds, MM:SS.fff, HH:MM:SS.fff, a frame index like 720f, or start/end")]
    InvalidTimeToken { token: String },

    /// Interval whose end precedes its start
    #[error("Invalid interval: end ({end}) must not precede start ({start})")]
    IntervalOrder { start: String, end: String },

    /// Time value beyond the input duration
    #[error("Time {value}s is out of range for input of duration {duration}s")]
    OutOfRange { value: String, duration: String },

    /// Input file missing, unreadable, or not a recognized container
    #[error("Cannot read input: {message}")]
    InputUnreadable { message: String },

    /// NAL parse or sequencing failure
    #[error("Malformed bitstream near pts {pts}: {message}")]
    BitstreamMalformed { pts: i64, message: String },

    /// Decoder could not produce a required reference frame even after
    /// widening the decode window
    #[error("Decoder reference missing near pts {pts}; seek landed past the required keyframe")]
    DecoderRefMissing { pts: i64 },

    /// Encoder cannot replicate the copied stream's exact parameters
    #[error("Encoder cannot replicate stream parameters: {message}")]
    EncoderParamMismatch { message: String },

    /// Codec-internal encoder failure
    #[error("Encoder failed: {message}")]
    EncoderExhausted { message: String },

    /// Output container write failure
    #[error("Failed to write output: {message}")]
    OutputWriteError { message: String },

    /// Decode window exceeded the configured cap
    #[error("GOP of {frames} frames exceeds the decode window cap of {cap}; raise --max-gop-frames if this input is expected")]
    GopTooLarge { frames: usize, cap: usize },

    /// Cooperative cancellation
    #[error("Cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// FFmpeg error
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
}

impl FrameCutError {
    /// Process exit code for this error kind
    pub fn exit_code(&self) -> i32 {
        match self {
            FrameCutError::InvalidTimeToken { .. }
            | FrameCutError::IntervalOrder { .. }
            | FrameCutError::OutOfRange { .. } => 2,
            FrameCutError::InputUnreadable { .. } | FrameCutError::Ffmpeg(_) => 3,
            FrameCutError::BitstreamMalformed { .. }
            | FrameCutError::DecoderRefMissing { .. }
            | FrameCutError::GopTooLarge { .. } => 4,
            FrameCutError::EncoderParamMismatch { .. }
            | FrameCutError::EncoderExhausted { .. } => 5,
            FrameCutError::OutputWriteError { .. } | FrameCutError::Io(_) => 6,
            FrameCutError::Cancelled => 130,
        }
    }
}

/// Result type alias for framecut operations
pub type FrameCutResult<T> = std::result::Result<T, FrameCutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_policy() {
        assert_eq!(
            FrameCutError::InvalidTimeToken { token: "x".into() }.exit_code(),
            2
        );
        assert_eq!(
            FrameCutError::InputUnreadable { message: "no".into() }.exit_code(),
            3
        );
        assert_eq!(
            FrameCutError::BitstreamMalformed { pts: 0, message: "bad".into() }.exit_code(),
            4
        );
        assert_eq!(
            FrameCutError::EncoderExhausted { message: "x".into() }.exit_code(),
            5
        );
        assert_eq!(
            FrameCutError::OutputWriteError { message: "x".into() }.exit_code(),
            6
        );
        assert_eq!(FrameCutError::Cancelled.exit_code(), 130);
    }
}
