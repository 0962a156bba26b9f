// Cosine similarity between two face embeddings.
//
// The score is the raw cosine of the angle between the vectors, computed in f64.
// It is not clamped or rescaled: the match decision compares it directly against
// the fixed threshold. Inputs that make the cosine meaningless (different lengths,
// a zero vector, NaN or infinite components) are model failures, never a score.

use crate::error::ModelError;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, ModelError> {
    if a.len() != b.len() {
        return Err(ModelError::DegenerateOutput(format!(
            "embedding lengths differ ({} vs {})",
            a.len(),
            b.len()
        )));
    }
    if a.is_empty() {
        return Err(ModelError::DegenerateOutput("empty embedding".to_string()));
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if !(dot.is_finite() && norm_a.is_finite() && norm_b.is_finite()) {
        return Err(ModelError::DegenerateOutput("non-finite embedding component".to_string()));
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(ModelError::DegenerateOutput("zero-norm embedding".to_string()));
    }

    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_directions_score_one() {
        let score = cosine_similarity(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]).unwrap();
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn orthogonal_and_opposite_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap(), 0.0);
        let opposite = cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]).unwrap();
        assert!((opposite + 1.0).abs() < 1e-12);
    }

    #[test]
    fn is_symmetric() {
        let a = [0.3, -0.7, 0.2, 0.9];
        let b = [0.1, 0.4, -0.5, 0.6];
        assert_eq!(cosine_similarity(&a, &b).unwrap(), cosine_similarity(&b, &a).unwrap());
    }

    #[test]
    fn rejects_degenerate_embeddings() {
        assert!(matches!(
            cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]),
            Err(ModelError::DegenerateOutput(_))
        ));
        assert!(matches!(
            cosine_similarity(&[1.0, f32::NAN], &[1.0, 0.0]),
            Err(ModelError::DegenerateOutput(_))
        ));
        assert!(matches!(
            cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0]),
            Err(ModelError::DegenerateOutput(_))
        ));
        assert!(matches!(cosine_similarity(&[], &[]), Err(ModelError::DegenerateOutput(_))));
    }
}
