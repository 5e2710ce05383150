//! Cue timestamps: `HH:MM:SS,mmm` (SRT), `HH:MM:SS.mmm` (VTT), `H:MM:SS.cc` (ASS).

use crate::config::SubtitleFormat;
use crate::error::{Jp2SubsError, Result};

fn checked_seconds(seconds: f64, segment_id: Option<u32>) -> Result<f64> {
    if seconds.is_nan() || seconds.is_infinite() {
        return Err(Jp2SubsError::validation(segment_id, format!("timestamp {} is not a finite number", seconds)));
    }
    if seconds < 0.0 {
        return Err(Jp2SubsError::validation(segment_id, format!("timestamp {} is negative", seconds)));
    }
    Ok(seconds)
}

/// Render `seconds` in the timestamp syntax of `format`.
pub fn format_timestamp(seconds: f64, format: SubtitleFormat, segment_id: Option<u32>) -> Result<String> {
    let seconds = checked_seconds(seconds, segment_id)?;
    let text = match format {
        SubtitleFormat::Srt | SubtitleFormat::Vtt => {
            let total_ms = (seconds * 1000.0).round() as u64;
            let hours = total_ms / 3_600_000;
            let minutes = (total_ms % 3_600_000) / 60_000;
            let secs = (total_ms % 60_000) / 1_000;
            let millis = total_ms % 1_000;
            let sep = if format == SubtitleFormat::Srt { ',' } else { '.' };
            format!("{:02}:{:02}:{:02}{}{:03}", hours, minutes, secs, sep, millis)
        }
        SubtitleFormat::Ass => {
            let total_cs = (seconds * 100.0).round() as u64;
            let hours = total_cs / 360_000;
            let minutes = (total_cs % 360_000) / 6_000;
            let secs = (total_cs % 6_000) / 100;
            let centis = total_cs % 100;
            format!("{}:{:02}:{:02}.{:02}", hours, minutes, secs, centis)
        }
    };
    Ok(text)
}

/// Parse a timestamp written in the syntax of `format` back into seconds.
///
/// VTT also accepts the short `MM:SS.mmm` form.
pub fn parse_timestamp(text: &str, format: SubtitleFormat) -> Result<f64> {
    let text = text.trim();
    let invalid = || Jp2SubsError::validation(None, format!("invalid {} timestamp '{}'", format.extension(), text));

    let (clock, fraction) = match format {
        SubtitleFormat::Srt => text.split_once(',').ok_or_else(invalid)?,
        SubtitleFormat::Vtt | SubtitleFormat::Ass => text.split_once('.').ok_or_else(invalid)?,
    };

    let parts: Vec<&str> = clock.split(':').collect();
    let (hours, minutes, secs) = match (format, parts.as_slice()) {
        (_, [h, m, s]) => (*h, *m, *s),
        (SubtitleFormat::Vtt, [m, s]) => ("0", *m, *s),
        _ => return Err(invalid()),
    };
    let number = |s: &str| s.parse::<u64>().map_err(|_| invalid());
    let (hours, minutes, secs) = (number(hours)?, number(minutes)?, number(secs)?);
    if minutes >= 60 || secs >= 60 {
        return Err(invalid());
    }

    let expected_digits = if format == SubtitleFormat::Ass { 2 } else { 3 };
    if fraction.len() != expected_digits {
        return Err(invalid());
    }
    let fraction = number(fraction)? as f64 / 10f64.powi(expected_digits as i32);

    Ok((hours * 3600 + minutes * 60 + secs) as f64 + fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_srt_and_vtt() {
        assert_eq!(format_timestamp(0.0, SubtitleFormat::Srt, None).unwrap(), "00:00:00,000");
        assert_eq!(format_timestamp(2.5, SubtitleFormat::Srt, None).unwrap(), "00:00:02,500");
        assert_eq!(format_timestamp(65.123, SubtitleFormat::Srt, None).unwrap(), "00:01:05,123");
        assert_eq!(format_timestamp(3661.5, SubtitleFormat::Vtt, None).unwrap(), "01:01:01.500");
        // rounding carries into the next second
        assert_eq!(format_timestamp(59.9996, SubtitleFormat::Srt, None).unwrap(), "00:01:00,000");
    }

    #[test]
    fn test_format_ass_centiseconds() {
        assert_eq!(format_timestamp(0.0, SubtitleFormat::Ass, None).unwrap(), "0:00:00.00");
        assert_eq!(format_timestamp(4.0, SubtitleFormat::Ass, None).unwrap(), "0:00:04.00");
        assert_eq!(format_timestamp(3725.256, SubtitleFormat::Ass, None).unwrap(), "1:02:05.26");
    }

    #[test]
    fn test_invalid_values_are_validation_errors() {
        for bad in [f64::NAN, -0.5, f64::INFINITY] {
            let err = format_timestamp(bad, SubtitleFormat::Srt, Some(7)).unwrap_err();
            assert!(matches!(err, Jp2SubsError::Validation { segment_id: Some(7), .. }));
        }
    }

    #[test]
    fn test_round_trip_within_a_millisecond() {
        let samples = [0.0, 0.001, 2.5, 4.0, 59.999, 61.234, 3599.999, 3661.5, 12345.678];
        for format in [SubtitleFormat::Srt, SubtitleFormat::Vtt] {
            for &s in &samples {
                let text = format_timestamp(s, format, None).unwrap();
                let back = parse_timestamp(&text, format).unwrap();
                assert!((back - s).abs() <= 0.001, "{:?} {} -> {} -> {}", format, s, text, back);
            }
        }
        // centisecond-aligned values survive ASS exactly
        for &s in &[0.0, 2.5, 4.0, 61.23, 3661.5] {
            let text = format_timestamp(s, SubtitleFormat::Ass, None).unwrap();
            let back = parse_timestamp(&text, SubtitleFormat::Ass).unwrap();
            assert!((back - s).abs() <= 0.001, "ass {} -> {} -> {}", s, text, back);
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_timestamp("00:00:02.500", SubtitleFormat::Srt).is_err());
        assert!(parse_timestamp("00:61:02,500", SubtitleFormat::Srt).is_err());
        assert!(parse_timestamp("0:00:02.5", SubtitleFormat::Ass).is_err());
        assert_eq!(parse_timestamp("01:02.500", SubtitleFormat::Vtt).unwrap(), 62.5);
    }
}
