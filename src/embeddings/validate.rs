//! Embedding vector checks.

use crate::error::{Error, Result};

/// Reject vectors that would poison similarity search.
///
/// # Errors
///
/// Returns `Error::Embedding` if the vector is empty, has the wrong number of
/// dimensions, contains NaN or infinite components, or has zero norm.
pub fn validate_embedding(vector: &[f32], expected_dimensions: Option<usize>) -> Result<()> {
    if vector.is_empty() {
        return Err(Error::Embedding("embedding is empty".to_string()));
    }
    if let Some(expected) = expected_dimensions {
        if vector.len() != expected {
            return Err(Error::Embedding(format!(
                "embedding has {} dimensions, expected {expected}",
                vector.len()
            )));
        }
    }
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        return Err(Error::Embedding(format!(
            "embedding component {pos} is not finite"
        )));
    }
    let norm: f64 = vector.iter().map(|v| f64::from(*v) * f64::from(*v)).sum::<f64>().sqrt();
    if norm <= f64::EPSILON {
        return Err(Error::Embedding("embedding has zero norm".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_well_formed_vector() {
        assert!(validate_embedding(&[0.1, -0.2, 0.3], Some(3)).is_ok());
        assert!(validate_embedding(&[1.0], None).is_ok());
    }

    #[test]
    fn test_rejects_bad_vectors() {
        assert!(validate_embedding(&[], None).is_err());
        assert!(validate_embedding(&[0.1, 0.2], Some(3)).is_err());
        assert!(validate_embedding(&[0.1, f32::NAN], None).is_err());
        assert!(validate_embedding(&[f32::INFINITY, 0.0], None).is_err());
        assert!(matches!(
            validate_embedding(&[0.0, 0.0, 0.0], Some(3)),
            Err(Error::Embedding(msg)) if msg.contains("zero norm")
        ));
    }
}
