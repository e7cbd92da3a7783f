//! Token vocabulary consumed by the chunked decode.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Maps recognizer token ids back to text.
///
/// Ids at or above [`timestamp_begin`](Vocabulary::timestamp_begin) are timestamp
/// tokens. `is_special` must return `false` for them.
pub trait Vocabulary: Send + Sync {
    fn timestamp_begin(&self) -> u32;

    fn is_special(&self, id: u32) -> bool;

    /// Decode a run of text tokens. Unknown ids decode to nothing.
    fn decode(&self, ids: &[u32]) -> String;
}

/// Vocabulary backed by an id → bytes table.
///
/// Pieces are raw bytes because byte-level BPE tokens may split a UTF-8
/// character; decoding joins the bytes first and converts once.
///
/// Entries can be added while decoding is in progress, which is how the Whisper
/// adapter exposes the pieces it sees during inference.
#[derive(Debug, Default)]
pub struct TableVocabulary {
    timestamp_begin: u32,
    pieces: RwLock<HashMap<u32, Vec<u8>>>,
    special: RwLock<HashSet<u32>>,
}

impl TableVocabulary {
    pub fn new(timestamp_begin: u32) -> Self {
        Self {
            timestamp_begin,
            pieces: RwLock::new(HashMap::new()),
            special: RwLock::new(HashSet::new()),
        }
    }

    /// Build a table from `(id, piece)` pairs.
    pub fn with_pieces<I, S>(timestamp_begin: u32, pieces: I) -> Self
    where
        I: IntoIterator<Item = (u32, S)>,
        S: AsRef<[u8]>,
    {
        let vocabulary = Self::new(timestamp_begin);
        for (id, text) in pieces {
            vocabulary.insert(id, text);
        }
        vocabulary
    }

    pub fn insert(&self, id: u32, piece: impl AsRef<[u8]>) {
        let mut pieces = self.pieces.write().unwrap_or_else(|e| e.into_inner());
        pieces.insert(id, piece.as_ref().to_vec());
    }

    pub fn contains(&self, id: u32) -> bool {
        let pieces = self.pieces.read().unwrap_or_else(|e| e.into_inner());
        pieces.contains_key(&id)
    }

    pub fn mark_special(&self, id: u32) {
        let mut special = self.special.write().unwrap_or_else(|e| e.into_inner());
        special.insert(id);
    }

    pub fn len(&self) -> usize {
        self.pieces.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Vocabulary for TableVocabulary {
    fn timestamp_begin(&self) -> u32 {
        self.timestamp_begin
    }

    fn is_special(&self, id: u32) -> bool {
        id < self.timestamp_begin
            && self
                .special
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&id)
    }

    fn decode(&self, ids: &[u32]) -> String {
        let pieces = self.pieces.read().unwrap_or_else(|e| e.into_inner());
        let bytes: Vec<u8> = ids
            .iter()
            .filter_map(|id| pieces.get(id))
            .flatten()
            .copied()
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_concatenates_pieces_in_order() {
        let vocab = TableVocabulary::with_pieces(100, [(1, " hello"), (2, " world")]);
        assert_eq!(vocab.decode(&[1, 2]), " hello world");
        assert_eq!(vocab.decode(&[2, 1]), " world hello");
    }

    #[test]
    fn unknown_ids_decode_to_nothing() {
        let vocab = TableVocabulary::with_pieces(100, [(1, "a")]);
        assert_eq!(vocab.decode(&[1, 42, 1]), "aa");
    }

    #[test]
    fn split_utf8_pieces_join_cleanly() {
        let e_acute = "é".as_bytes();
        let vocab = TableVocabulary::with_pieces(100, [(1, &e_acute[..1]), (2, &e_acute[1..])]);
        assert_eq!(vocab.decode(&[1, 2]), "é");
    }

    #[test]
    fn timestamps_are_never_special() {
        let vocab = TableVocabulary::new(100);
        vocab.mark_special(50);
        vocab.mark_special(150);
        assert!(vocab.is_special(50));
        assert!(!vocab.is_special(150));
        assert!(!vocab.is_special(51));
    }

    #[test]
    fn insert_while_shared() {
        let vocab = std::sync::Arc::new(TableVocabulary::new(10));
        let writer = std::sync::Arc::clone(&vocab);
        std::thread::spawn(move || writer.insert(3, "x"))
            .join()
            .unwrap();
        assert_eq!(vocab.decode(&[3]), "x");
        assert_eq!(vocab.len(), 1);
    }
}
