//! Sliding-window text chunker.
//!
//! Splits extracted document text into overlapping fixed-size windows that
//! advance by `chunk_size - overlap` characters. Windows whose trimmed
//! length falls below `min_chunk_chars` are dropped. Splitting is not
//! sentence or paragraph aware.
//!
//! Lengths are counted in `char`s so a window never cuts a UTF-8 sequence.
//! Output is fully deterministic for a given input and parameters, which the
//! content-addressed point ids produced by [`point_id`] rely on.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Characters of chunk text mixed into the point id.
const ID_PREFIX_CHARS: usize = 50;

/// Fixed random namespace for chunk point ids. Changing it changes every
/// stored id, so re-uploads would no longer overwrite.
const POINT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b9e_5d3a_4e71_9a0c_7b2d_8e4f_1a60);

/// Split text into overlapping windows. Returns chunks with contiguous
/// indices starting at 0.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let size = config.chunk_size;
    let step = size.saturating_sub(config.overlap);
    if size == 0 || step == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let window: String = chars[start..end].iter().collect();

        if window.trim().chars().count() >= config.min_chunk_chars {
            chunks.push(Chunk {
                chunk_index: chunks.len(),
                text: window,
            });
        }

        if end == chars.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// Deterministic point id for a chunk.
///
/// UUID v5 over user, filename, index and the first 50 characters of the
/// chunk text. Fields are joined with the ASCII unit separator so that
/// `("ab", "c")` and `("a", "bc")` produce different keys.
pub fn point_id(user_id: &str, filename: &str, chunk_index: usize, text: &str) -> String {
    let prefix: String = text.chars().take(ID_PREFIX_CHARS).collect();
    let key = format!(
        "{}\u{1f}{}\u{1f}{}\u{1f}{}",
        user_id, filename, chunk_index, prefix
    );
    Uuid::new_v5(&POINT_NAMESPACE, key.as_bytes()).to_string()
}

/// Hex SHA-256 of the chunk text.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(chunk_size: usize, overlap: usize, min_chunk_chars: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            overlap,
            min_chunk_chars,
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Patient has mild hypertension.", &cfg(500, 50, 20));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Patient has mild hypertension.");
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", &cfg(500, 50, 20)).is_empty());
        assert!(chunk_text("   \n\n  ", &cfg(500, 50, 1)).is_empty());
    }

    #[test]
    fn test_windows_overlap_by_configured_amount() {
        let text: String = ('a'..='z').collect();
        let chunks = chunk_text(&text, &cfg(10, 4, 1));
        // starts at 0, 6, 12, 18; the window at 18 reaches the end
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcdefghij", "ghijklmnop", "mnopqrstuv", "stuvwxyz"]);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].text.chars().skip(6).collect();
            assert!(pair[1].text.starts_with(&tail));
        }
    }

    #[test]
    fn test_short_trailing_window_dropped() {
        let text = format!("{}{}", "x".repeat(30), "yz");
        let chunks = chunk_text(&text, &cfg(30, 0, 5));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "x".repeat(30));
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..200)
            .map(|i| format!("Sentence number {}.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text(&text, &cfg(120, 20, 10));
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_multibyte_text_not_split_mid_char() {
        let text = "Température élevée à 39°C — fièvre persistante. ".repeat(20);
        let chunks = chunk_text(&text, &cfg(37, 7, 5));
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.text.chars().count() <= 37);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma delta epsilon zeta eta theta iota kappa. ".repeat(40);
        let c1 = chunk_text(&text, &cfg(100, 25, 20));
        let c2 = chunk_text(&text, &cfg(100, 25, 20));
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_point_id_is_stable_and_distinct() {
        let a = point_id("user-1", "report.pdf", 0, "Patient has mild hypertension.");
        let b = point_id("user-1", "report.pdf", 0, "Patient has mild hypertension.");
        assert_eq!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());

        assert_ne!(a, point_id("user-2", "report.pdf", 0, "Patient has mild hypertension."));
        assert_ne!(a, point_id("user-1", "other.pdf", 0, "Patient has mild hypertension."));
        assert_ne!(a, point_id("user-1", "report.pdf", 1, "Patient has mild hypertension."));
    }

    #[test]
    fn test_point_id_pinned() {
        let id = point_id("user-1", "report.pdf", 0, "Patient has mild hypertension.");
        assert_eq!(id, "1fa8bbb7-27e8-5e2b-87a4-08a7bd284bcf");
        assert_eq!(Uuid::parse_str(&id).unwrap().get_version_num(), 5);
    }

    #[test]
    fn test_point_id_field_boundaries() {
        assert_ne!(point_id("ab", "c", 0, "t"), point_id("a", "bc", 0, "t"));
    }

    #[test]
    fn test_point_id_uses_only_prefix() {
        let base = "p".repeat(50);
        let a = point_id("u", "f.pdf", 0, &format!("{}tail one", base));
        let b = point_id("u", "f.pdf", 0, &format!("{}tail two", base));
        assert_eq!(a, b);
    }

    #[test]
    fn test_content_hash_hex() {
        let h = content_hash("hello");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
