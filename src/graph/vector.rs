//! Vector math over fixed-length `f32` embeddings.

/// Cosine similarity of two vectors.
///
/// Returns `None` when the vectors are not comparable: different lengths, empty,
/// zero magnitude, or a non-finite result. Callers must skip such pairs rather
/// than treat them as a low score.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    sim.is_finite().then_some(sim as f32)
}

/// Elementwise mean of a set of vectors.
///
/// An empty input yields an empty vector, which callers read as "no aggregate".
/// Vectors whose length differs from the first one are ignored.
pub fn average_vectors<V: AsRef<[f32]>>(vectors: &[V]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let dim = first.as_ref().len();

    let mut sum = vec![0.0f64; dim];
    let mut count = 0usize;
    for v in vectors.iter().map(AsRef::as_ref).filter(|v| v.len() == dim) {
        for (acc, &x) in sum.iter_mut().zip(v) {
            *acc += f64::from(x);
        }
        count += 1;
    }

    let n = count as f64;
    sum.into_iter().map(|s| (s / n) as f32).collect()
}
