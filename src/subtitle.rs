//! SRT subtitle generation from transcript segments.
//!
//! This is the only place where synthetic timing is introduced: a segment
//! without an end gets `start + default_duration`.

use srtlib::{Subtitle, Timestamp};

use crate::transcript::TranscriptSegment;

/// Convert segments to SRT subtitles with 1-based indices.
pub fn to_subtitles(segments: &[TranscriptSegment], default_duration: f64) -> Vec<Subtitle> {
    segments
        .iter()
        .zip(1..)
        .map(|(segment, index)| create_subtitle(segment, index, default_duration))
        .collect()
}

/// Render segments as SRT file content.
pub fn to_subtitle_track(segments: &[TranscriptSegment], default_duration: f64) -> String {
    let mut track = to_subtitles(segments, default_duration)
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join("\n\n");
    if !track.is_empty() {
        track.push('\n');
    }
    track
}

fn create_subtitle(segment: &TranscriptSegment, index: usize, default_duration: f64) -> Subtitle {
    let start = segment.start.map_or(0.0, sanitize);
    let end = match segment.end {
        Some(end) if end.is_finite() => end.max(start),
        _ => start + default_duration.max(0.0),
    };
    Subtitle::new(
        index,
        secs_to_timestamp(start),
        secs_to_timestamp(end),
        segment.text.trim().to_string(),
    )
}

fn sanitize(secs: f64) -> f64 {
    if secs.is_finite() && secs > 0.0 { secs } else { 0.0 }
}

fn secs_to_timestamp(secs: f64) -> Timestamp {
    let millis = (secs * 1000.0).round().clamp(0.0, f64::from(u32::MAX));
    Timestamp::from_milliseconds(millis as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_end_gets_default_duration() {
        let segments = vec![
            TranscriptSegment::new(Some(0.0), Some(2.0), "hello"),
            TranscriptSegment::new(Some(2.0), None, "world"),
        ];
        let track = to_subtitle_track(&segments, 2.0);
        assert_eq!(
            track,
            "1\n00:00:00,000 --> 00:00:02,000\nhello\n\n2\n00:00:02,000 --> 00:00:04,000\nworld\n"
        );
    }

    #[test]
    fn missing_or_invalid_start_defaults_to_zero() {
        let segments = vec![
            TranscriptSegment::new(None, Some(1.5), "a"),
            TranscriptSegment::new(Some(f64::NAN), None, "b"),
            TranscriptSegment::new(Some(-3.0), Some(1.0), "c"),
        ];
        let subs = to_subtitles(&segments, 2.0);
        assert_eq!(subs[0].start_time, Timestamp::from_milliseconds(0));
        assert_eq!(subs[0].end_time, Timestamp::from_milliseconds(1500));
        assert_eq!(subs[1].start_time, Timestamp::from_milliseconds(0));
        assert_eq!(subs[1].end_time, Timestamp::from_milliseconds(2000));
        assert_eq!(subs[2].start_time, Timestamp::from_milliseconds(0));
    }

    #[test]
    fn text_is_trimmed_and_long_times_format() {
        let segments = vec![TranscriptSegment::new(
            Some(3723.456),
            Some(3725.0),
            "  spoken words ",
        )];
        let track = to_subtitle_track(&segments, 2.0);
        assert!(track.starts_with("1\n01:02:03,456 --> 01:02:05,000\nspoken words"));
    }

    #[test]
    fn empty_transcript_is_empty_track() {
        assert_eq!(to_subtitle_track(&[], 2.0), "");
    }
}
