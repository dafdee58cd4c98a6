use streamscribe_foundation::DiarError;

/// Speaker-embedding model seam.
///
/// Synchronous and CPU-bound, driven only from the worker thread. The
/// implementation computes whatever feature representation it needs
/// (mel filterbank is typical) internally; the caller normalizes the
/// returned vector.
pub trait SpeakerEmbedder: Send {
    /// Embedding dimensionality, fixed per model (commonly 192 or 256).
    fn dim(&self) -> usize;

    fn embed(&mut self, samples_16k: &[i16]) -> Result<Vec<f32>, DiarError>;
}

/// Scale `v` to unit L2 norm in place. A zero vector is left unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_norm() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_is_untouched() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }
}
