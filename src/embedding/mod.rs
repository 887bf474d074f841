//! Text-to-vector embedding pipeline.
//!
//! Provides the [`EmbeddingProvider`] trait and a remote implementation over
//! any OpenAI-compatible `/embeddings` endpoint. Vectors are L2-normalized
//! and exactly [`EMBEDDING_DIM`] wide; the producing model's identifier is
//! pinned in `schema_meta` so that vectors from different models are never
//! compared (see [`verify_model`]).

pub mod remote;

use anyhow::Result;
use rusqlite::Connection;

pub use crate::db::schema::EMBEDDING_DIM;

/// Trait for embedding text into vectors.
///
/// Implementations produce L2-normalized vectors of exactly [`EMBEDDING_DIM`]
/// dimensions and must be deterministic for a given model version.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for
    /// batched requests.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Identifier of the model producing the vectors.
    fn model_id(&self) -> &str;

    /// Number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Create an embedding provider from config.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    Ok(Box::new(remote::RemoteProvider::new(config)?))
}

/// Check the configured model against the one pinned in the database.
///
/// A mismatch is a configuration error: similarity between mixed-model
/// vectors is meaningless, so we refuse to run rather than degrade silently.
pub fn verify_model(conn: &Connection, configured: &str) -> Result<()> {
    match crate::db::migrations::get_embedding_model(conn)? {
        Some(stored) if stored != configured => anyhow::bail!(
            "embedding model mismatch: database vectors were produced by '{stored}' \
             but config requests '{configured}'. Run `tacit re-embed` or restore the \
             previous model setting."
        ),
        Some(_) => Ok(()),
        None => {
            crate::db::migrations::set_embedding_model(conn, configured)?;
            Ok(())
        }
    }
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        crate::db::migrations::run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn l2_normalize_unit_length() {
        let mut v = vec![3.0f32, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_zero_vector_untouched() {
        let mut v = vec![0.0f32; 4];
        l2_normalize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn verify_model_pins_on_first_use() {
        let conn = test_db();
        verify_model(&conn, "model-a").unwrap();
        assert_eq!(
            crate::db::migrations::get_embedding_model(&conn).unwrap(),
            Some("model-a".to_string())
        );
    }

    #[test]
    fn fresh_db_accepts_any_configured_model() {
        // A brand-new store carries no vectors, so a non-default model must
        // pass verification and become the pin
        let conn = test_db();
        verify_model(&conn, "my-custom-model").unwrap();
        assert_eq!(
            crate::db::migrations::get_embedding_model(&conn).unwrap(),
            Some("my-custom-model".to_string())
        );
        verify_model(&conn, "my-custom-model").unwrap();
    }

    #[test]
    fn verify_model_rejects_mismatch() {
        let conn = test_db();
        verify_model(&conn, "model-a").unwrap();
        let err = verify_model(&conn, "model-b").unwrap_err();
        assert!(err.to_string().contains("mismatch"));
    }
}
