//! Time token resolution
//!
//! Maps the user's raw time tokens (seconds, clock times, frame indices,
//! `start`/`end`, negative offsets from end-of-file) to sorted, merged,
//! non-overlapping presentation-time intervals in the reference video
//! stream's timebase.

use ffmpeg_next::Rational;
use tracing::debug;

use crate::error::{FrameCutError, FrameCutResult};

/// Half-open interval `[start_pts, end_pts)` in the reference video timebase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    pub start_pts: i64,
    pub end_pts: i64,
}

impl TimeInterval {
    pub fn new(start_pts: i64, end_pts: i64) -> Self {
        Self { start_pts, end_pts }
    }

    pub fn contains(&self, pts: i64) -> bool {
        pts >= self.start_pts && pts < self.end_pts
    }

    pub fn duration(&self) -> i64 {
        self.end_pts - self.start_pts
    }
}

/// Resolver for user time tokens against one input file
pub struct TimeResolver {
    /// Input duration in seconds
    duration: f64,
    /// Reference video frame rate (frames per second)
    frame_rate: f64,
    /// Reference video stream timebase
    time_base: Rational,
}

impl TimeResolver {
    pub fn new(duration: f64, frame_rate: f64, time_base: Rational) -> Self {
        Self {
            duration,
            frame_rate,
            time_base,
        }
    }

    /// Resolve `--keep` tokens to intervals
    ///
    /// Consecutive token pairs form intervals. The result is sorted, merged,
    /// and non-overlapping.
    pub fn resolve_keep(&self, tokens: &[String]) -> FrameCutResult<Vec<TimeInterval>> {
        if tokens.is_empty() {
            return Err(FrameCutError::InvalidTimeToken {
                token: "(empty interval list)".to_string(),
            });
        }
        if tokens.len() % 2 != 0 {
            return Err(FrameCutError::InvalidTimeToken {
                token: "(odd number of time tokens)".to_string(),
            });
        }

        let mut intervals = Vec::with_capacity(tokens.len() / 2);
        for pair in tokens.chunks(2) {
            let start = self.resolve_token(&pair[0])?;
            let end = self.resolve_token(&pair[1])?;
            if end <= start {
                return Err(FrameCutError::IntervalOrder {
                    start: format!("{:.3}", start),
                    end: format!("{:.3}", end),
                });
            }
            intervals.push(TimeInterval::new(
                self.seconds_to_pts(start),
                self.seconds_to_pts(end),
            ));
        }

        Ok(Self::merge(intervals))
    }

    /// Resolve `--cut` tokens to the complementary kept intervals over the
    /// whole file
    pub fn resolve_cut(&self, tokens: &[String]) -> FrameCutResult<Vec<TimeInterval>> {
        let removed = self.resolve_keep(tokens)?;
        let file_end = self.seconds_to_pts(self.duration);

        let mut kept = Vec::with_capacity(removed.len() + 1);
        let mut cursor = 0i64;
        for cut in &removed {
            if cut.start_pts > cursor {
                kept.push(TimeInterval::new(cursor, cut.start_pts));
            }
            cursor = cursor.max(cut.end_pts);
        }
        if cursor < file_end {
            kept.push(TimeInterval::new(cursor, file_end));
        }

        debug!(
            "Complemented {} cut intervals into {} kept intervals",
            removed.len(),
            kept.len()
        );

        if kept.is_empty() {
            return Err(FrameCutError::IntervalOrder {
                start: "0".to_string(),
                end: format!("{:.3}", self.duration),
            });
        }
        Ok(kept)
    }

    /// Resolve one token to seconds, applying the end-of-file and range rules
    pub fn resolve_token(&self, token: &str) -> FrameCutResult<f64> {
        let token = token.trim();
        let (negated, body) = match token.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, token),
        };

        let seconds = match body {
            "s" | "start" => 0.0,
            "e" | "end" => self.duration,
            _ => self.parse_value(body, token)?,
        };

        let resolved = if negated {
            // Negative offsets count back from end-of-file, clamped at 0
            (self.duration - seconds).max(0.0)
        } else {
            seconds
        };

        // Allow one frame of slack past the end before rejecting
        let slack = if self.frame_rate > 0.0 {
            1.0 / self.frame_rate
        } else {
            0.0
        };
        if resolved > self.duration + slack {
            return Err(FrameCutError::OutOfRange {
                value: format!("{:.3}", resolved),
                duration: format!("{:.3}", self.duration),
            });
        }

        Ok(resolved.min(self.duration))
    }

    /// Parse a non-keyword token body: seconds, clock time, or frame index
    fn parse_value(&self, body: &str, original: &str) -> FrameCutResult<f64> {
        // Frame index, marked with an `f` suffix
        if let Some(frames) = body.strip_suffix('f') {
            if let Ok(n) = frames.parse::<u64>() {
                if self.frame_rate <= 0.0 {
                    return Err(FrameCutError::InvalidTimeToken {
                        token: original.to_string(),
                    });
                }
                return Ok(n as f64 / self.frame_rate);
            }
        }

        // Plain seconds, integer or decimal; the sign was already consumed,
        // so another one here is garbage
        if let Ok(secs) = body.parse::<f64>() {
            if secs.is_finite() && secs >= 0.0 {
                return Ok(secs);
            }
            return Err(FrameCutError::InvalidTimeToken {
                token: original.to_string(),
            });
        }

        // Clock time: MM:SS[.fff] or HH:MM:SS[.fff]
        let parts: Vec<&str> = body.split(':').collect();
        let parse_part = |s: &str| -> FrameCutResult<f64> {
            match s.parse::<f64>() {
                Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
                _ => Err(FrameCutError::InvalidTimeToken {
                    token: original.to_string(),
                }),
            }
        };
        match parts.len() {
            2 => {
                let minutes = parse_part(parts[0])?;
                let seconds = parse_part(parts[1])?;
                if seconds >= 60.0 {
                    return Err(FrameCutError::InvalidTimeToken {
                        token: original.to_string(),
                    });
                }
                Ok(minutes * 60.0 + seconds)
            }
            3 => {
                let hours = parse_part(parts[0])?;
                let minutes = parse_part(parts[1])?;
                let seconds = parse_part(parts[2])?;
                if minutes >= 60.0 || seconds >= 60.0 {
                    return Err(FrameCutError::InvalidTimeToken {
                        token: original.to_string(),
                    });
                }
                Ok(hours * 3600.0 + minutes * 60.0 + seconds)
            }
            _ => Err(FrameCutError::InvalidTimeToken {
                token: original.to_string(),
            }),
        }
    }

    /// Convert seconds to the reference stream timebase, rounding to the
    /// nearest pts unit
    pub fn seconds_to_pts(&self, seconds: f64) -> i64 {
        let tb = self.time_base.numerator() as f64 / self.time_base.denominator() as f64;
        (seconds / tb).round() as i64
    }

    /// Sort intervals and merge overlapping or touching neighbours
    fn merge(mut intervals: Vec<TimeInterval>) -> Vec<TimeInterval> {
        intervals.sort_by_key(|i| i.start_pts);
        let mut merged: Vec<TimeInterval> = Vec::with_capacity(intervals.len());
        for interval in intervals {
            match merged.last_mut() {
                Some(last) if interval.start_pts <= last.end_pts => {
                    last.end_pts = last.end_pts.max(interval.end_pts);
                }
                _ => merged.push(interval),
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> TimeResolver {
        // 60 s input, 30 fps, 1/90000 timebase
        TimeResolver::new(60.0, 30.0, Rational::new(1, 90000))
    }

    fn toks(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_plain_seconds() {
        let r = resolver();
        assert_eq!(r.resolve_token("10").unwrap(), 10.0);
        assert_eq!(r.resolve_token("12.5").unwrap(), 12.5);
    }

    #[test]
    fn parses_clock_times() {
        let r = resolver();
        assert_eq!(r.resolve_token("0:30").unwrap(), 30.0);
        assert_eq!(r.resolve_token("0:00:30.5").unwrap(), 30.5);
    }

    #[test]
    fn rejects_out_of_range_clock_fields() {
        let r = resolver();
        assert!(matches!(
            r.resolve_token("0:75"),
            Err(FrameCutError::InvalidTimeToken { .. })
        ));
    }

    #[test]
    fn parses_start_and_end_keywords() {
        let r = resolver();
        assert_eq!(r.resolve_token("s").unwrap(), 0.0);
        assert_eq!(r.resolve_token("start").unwrap(), 0.0);
        assert_eq!(r.resolve_token("e").unwrap(), 60.0);
        assert_eq!(r.resolve_token("end").unwrap(), 60.0);
    }

    #[test]
    fn parses_frame_indices() {
        let r = resolver();
        // Frame 300 at 30 fps is 10 s
        assert_eq!(r.resolve_token("300f").unwrap(), 10.0);
        assert_eq!(r.seconds_to_pts(r.resolve_token("300f").unwrap()), 900_000);
    }

    #[test]
    fn negative_offsets_count_from_end() {
        let r = resolver();
        assert_eq!(r.resolve_token("-10").unwrap(), 50.0);
        assert_eq!(r.resolve_token("-0:30").unwrap(), 30.0);
        // Clamped at zero when the offset exceeds the duration
        assert_eq!(r.resolve_token("-2:30").unwrap(), 0.0);
    }

    #[test]
    fn negative_offset_past_duration_makes_empty_interval_an_error() {
        let r = resolver();
        // -1:30 on a 60 s file resolves to 0, so the interval collapses
        let err = r.resolve_keep(&toks(&["0", "-1:30"])).unwrap_err();
        assert!(matches!(err, FrameCutError::IntervalOrder { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn rejects_values_past_duration() {
        let r = resolver();
        assert!(matches!(
            r.resolve_token("61"),
            Err(FrameCutError::OutOfRange { .. })
        ));
        // One frame of slack is tolerated and clamped
        assert_eq!(r.resolve_token("60.01").unwrap(), 60.0);
    }

    #[test]
    fn keep_builds_sorted_merged_intervals() {
        let r = resolver();
        let intervals = r
            .resolve_keep(&toks(&["40", "50", "10", "20", "15", "25"]))
            .unwrap();
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0], TimeInterval::new(900_000, 2_250_000));
        assert_eq!(intervals[1], TimeInterval::new(3_600_000, 4_500_000));
    }

    #[test]
    fn keep_rejects_reversed_interval() {
        let r = resolver();
        assert!(matches!(
            r.resolve_keep(&toks(&["20", "10"])),
            Err(FrameCutError::IntervalOrder { .. })
        ));
    }

    #[test]
    fn keep_rejects_odd_token_count() {
        let r = resolver();
        assert!(matches!(
            r.resolve_keep(&toks(&["10"])),
            Err(FrameCutError::InvalidTimeToken { .. })
        ));
    }

    #[test]
    fn keep_rejects_empty_list() {
        let r = resolver();
        assert!(r.resolve_keep(&[]).is_err());
    }

    #[test]
    fn cut_complements_over_whole_file() {
        // 20 s file: --cut 0,5,15,20 keeps [5,15)
        let r = TimeResolver::new(20.0, 30.0, Rational::new(1, 90000));
        let kept = r.resolve_cut(&toks(&["0", "5", "15", "20"])).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0], TimeInterval::new(450_000, 1_350_000));
    }

    #[test]
    fn cut_of_whole_file_is_an_error() {
        let r = resolver();
        assert!(r.resolve_cut(&toks(&["s", "e"])).is_err());
    }
}
