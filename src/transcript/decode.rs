//! Whisper chunked-timestamp decode.
//!
//! Turns the ordered list of pending windows into one transcript. Windows overlap
//! by their stride margins; timestamps inside a margin are dropped and the text of
//! a segment that spans several windows is stitched with
//! [`longest_common_sequence`].
//!
//! Both functions are pure: the same windows always give the same snapshot.

use super::types::{PendingWindow, TranscriptSegment, TranscriptSnapshot};
use super::vocabulary::Vocabulary;

/// Decode all windows into a snapshot.
///
/// `time_precision` is the number of seconds one timestamp token stands for.
pub fn decode_windows(
    windows: &[PendingWindow],
    vocabulary: &dyn Vocabulary,
    time_precision: f64,
) -> TranscriptSnapshot {
    let timestamp_begin = vocabulary.timestamp_begin();
    let token_secs = |token: u32| f64::from(token - timestamp_begin) * time_precision;

    let mut segments = Vec::new();
    let mut open = OpenSegment::default();
    let mut time_offset = 0.0_f64;
    let mut previous_tokens: Vec<Vec<u32>> = Vec::new();
    let mut skip = false;

    for window in windows {
        let tokens = &window.tokens;
        let mut last_timestamp: Option<u32> = None;
        let mut first_timestamp = f64::from(timestamp_begin);

        if let Some(stride) = window.stride {
            time_offset -= stride.left;
            let right_stride_start = stride.chunk_len - stride.right;
            if stride.left > 0.0 {
                first_timestamp = stride.left / time_precision + f64::from(timestamp_begin);
            }
            if stride.right > 0.0 {
                // earliest timestamp inside the right margin, or the final one
                for &token in tokens.iter().rev() {
                    if token >= timestamp_begin {
                        if last_timestamp.is_some() && token_secs(token) < right_stride_start {
                            break;
                        }
                        last_timestamp = Some(token);
                    }
                }
            }
        }

        let mut current_tokens = Vec::new();
        for &token in tokens {
            if token >= timestamp_begin {
                let time = round2(token_secs(token) + time_offset);
                if last_timestamp.is_some_and(|last| token >= last) {
                    skip = true;
                } else if skip
                    || (!previous_tokens.is_empty() && f64::from(token) < first_timestamp)
                {
                    skip = false;
                } else if let Some(start) = open.start {
                    if time != start {
                        open.end = Some(time);
                        previous_tokens.push(std::mem::take(&mut current_tokens));
                        let resolved = longest_common_sequence(&previous_tokens);
                        segments.push(open.close(vocabulary.decode(&resolved)));
                        previous_tokens.clear();
                    }
                } else {
                    open.start = Some(time);
                }
            } else if !vocabulary.is_special(token) {
                current_tokens.push(token);
            }
        }

        if let Some(stride) = window.stride {
            time_offset += stride.chunk_len - stride.right;
        }

        if !current_tokens.is_empty() {
            previous_tokens.push(current_tokens);
        } else if previous_tokens.iter().all(Vec::is_empty) {
            open = OpenSegment::default();
            previous_tokens.clear();
        }
    }

    if !previous_tokens.is_empty() {
        let resolved = longest_common_sequence(&previous_tokens);
        segments.push(open.close(vocabulary.decode(&resolved)));
    }

    let text = segments.iter().map(|s| s.text.as_str()).collect();
    TranscriptSnapshot { text, segments }
}

/// Merge overlapping token runs into one sequence.
///
/// For each adjacent pair the alignment with the best score
/// `matches / overlap + overlap / 10000` is chosen, considering only alignments
/// with more than one matching token. The two runs are then cut at the middle of
/// the overlap. Without a qualifying alignment the runs are concatenated.
pub fn longest_common_sequence(sequences: &[Vec<u32>]) -> Vec<u32> {
    let Some((first, rest)) = sequences.split_first() else {
        return Vec::new();
    };

    let mut left: &[u32] = first;
    let mut total = Vec::new();

    for right in rest {
        let left_len = left.len();
        let right_len = right.len();
        let mut best = 0.0_f64;
        let mut bounds = (left_len, left_len, 0, 0);

        for j in 1..left_len + right_len {
            let left_start = left_len.saturating_sub(j);
            let left_stop = left_len.min(left_len + right_len - j);
            let right_start = j.saturating_sub(left_len);
            let right_stop = right_len.min(j);

            let matches = left[left_start..left_stop]
                .iter()
                .zip(&right[right_start..right_stop])
                .filter(|(a, b)| a == b)
                .count();
            let score = matches as f64 / j as f64 + j as f64 / 10000.0;
            if matches > 1 && score > best {
                best = score;
                bounds = (left_start, left_stop, right_start, right_stop);
            }
        }

        let (left_start, left_stop, right_start, right_stop) = bounds;
        let left_mid = (left_start + left_stop) / 2;
        let right_mid = (right_start + right_stop) / 2;
        total.extend_from_slice(&left[..left_mid]);
        left = &right[right_mid..];
    }

    total.extend_from_slice(left);
    total
}

#[derive(Debug, Default)]
struct OpenSegment {
    start: Option<f64>,
    end: Option<f64>,
}

impl OpenSegment {
    fn close(&mut self, text: String) -> TranscriptSegment {
        let closed = std::mem::take(self);
        TranscriptSegment {
            start: closed.start,
            end: closed.end,
            text,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
