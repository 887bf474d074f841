//! Hybrid persistence layer.
//!
//! One SQLite database, three lookup primitives over the same facts: FTS5
//! keyword match, sqlite-vec KNN, and a k-hop walk over entity relations.
//! Writing one fact commits to all three paths in a single transaction, so a
//! reader never observes a fact present in one index but absent from another.

pub mod entities;
pub mod facts;
pub mod graph;
pub mod markers;
pub mod relations;
pub mod types;

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Decode a sqlite-vec embedding blob back into f32 values.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(std::mem::size_of::<f32>())
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Recover cosine similarity from an L2 distance between normalized vectors:
/// `cos = 1 - d²/2`.
pub fn l2_to_cosine(distance: f64) -> f64 {
    1.0 - (distance * distance) / 2.0
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Stable non-cryptographic content hash (FNV-1a, 64-bit) as lowercase hex.
///
/// Used for the `(project_id, text_hash)` uniqueness key and for session
/// marker prefix hashes. Must stay stable across releases — markers persist.
pub fn content_hash(text: &str) -> String {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in text.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    format!("{hash:016x}")
}

/// Normalize an entity name for key lookup: trim, collapse internal
/// whitespace, lowercase. Repeated mention of "Deploy  Script" and
/// "deploy script" must resolve to the same entity.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_to_cosine_known_points() {
        assert!((l2_to_cosine(0.0) - 1.0).abs() < 1e-9);
        assert!(l2_to_cosine(std::f64::consts::SQRT_2).abs() < 1e-9);
        assert!((l2_to_cosine(2.0) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_basics() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn content_hash_is_stable_and_distinct() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        // Known FNV-1a vector
        assert_eq!(content_hash(""), "cbf29ce484222325");
    }

    #[test]
    fn normalize_name_collapses_case_and_whitespace() {
        assert_eq!(normalize_name("  Deploy   Script "), "deploy script");
        assert_eq!(normalize_name("deploy script"), "deploy script");
        assert_eq!(normalize_name("INFRA/Deploy.sh"), "infra/deploy.sh");
    }

    #[test]
    fn embedding_bytes_length() {
        let v = vec![0.5f32; 8];
        assert_eq!(embedding_to_bytes(&v).len(), 32);
    }

    #[test]
    fn embedding_bytes_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(bytes_to_embedding(embedding_to_bytes(&v)), v);
    }
}
