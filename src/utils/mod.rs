//! Shared helpers

use ffmpeg_next::Rational;

/// Rescale a timestamp between timebases with round-to-nearest
pub fn rescale(ts: i64, from: Rational, to: Rational) -> i64 {
    if from == to {
        return ts;
    }
    let num = ts as i128 * from.numerator() as i128 * to.denominator() as i128;
    let den = from.denominator() as i128 * to.numerator() as i128;
    if den == 0 {
        return ts;
    }
    let half = den.abs() / 2;
    let rounded = if num >= 0 { num + half } else { num - half } / den;
    rounded as i64
}

/// Format seconds as `HH:MM:SS.mmm` for logs and reports
pub fn format_time(seconds: f64) -> String {
    let hours = (seconds / 3600.0) as u32;
    let minutes = ((seconds % 3600.0) / 60.0) as u32;
    let secs = (seconds % 60.0) as u32;
    let millis = ((seconds % 1.0) * 1000.0) as u32;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
    } else {
        format!("{:02}:{:02}.{:03}", minutes, secs, millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_between_common_timebases() {
        // 1 s in 1/90000 -> 1/1000
        assert_eq!(rescale(90_000, Rational::new(1, 90000), Rational::new(1, 1000)), 1000);
        assert_eq!(rescale(1000, Rational::new(1, 1000), Rational::new(1, 90000)), 90_000);
        // Identity
        assert_eq!(rescale(42, Rational::new(1, 48000), Rational::new(1, 48000)), 42);
        // Rounds to nearest
        assert_eq!(rescale(1, Rational::new(1, 3), Rational::new(1, 1)), 0);
        assert_eq!(rescale(2, Rational::new(1, 3), Rational::new(1, 1)), 1);
    }

    #[test]
    fn formats_times() {
        assert_eq!(format_time(61.5), "01:01.500");
        assert_eq!(format_time(3661.25), "01:01:01.250");
    }
}
