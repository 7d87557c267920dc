//! Pure projection / dimension math (spec §4.2 `scaleEmbedding`, component
//! C1). No I/O, no suspension points — safe to call from anywhere.

/// L2-normalizes `v` in place. A zero vector is left as-is (there is no
/// direction to normalize to).
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Downsamples `v` (length `d`) to length `d'` by averaging contiguous
/// cells `floor(i*r)..floor((i+1)*r)` with `r = d/d'`, then L2-normalizes.
fn downsample(v: &[f32], target: usize) -> Vec<f32> {
    let d = v.len();
    let r = d as f64 / target as f64;
    let mut out = Vec::with_capacity(target);
    for i in 0..target {
        let start = (i as f64 * r).floor() as usize;
        let end = (((i + 1) as f64 * r).floor() as usize).clamp(start + 1, d);
        let slice = &v[start..end];
        let avg = slice.iter().sum::<f32>() / slice.len() as f32;
        out.push(avg);
    }
    out
}

/// Upsamples `v` (length `d`) to length `d'` by linear interpolation over
/// `r = (d-1)/(d'-1)`, then L2-normalizes.
fn upsample(v: &[f32], target: usize) -> Vec<f32> {
    let d = v.len();
    if d == 1 {
        return vec![v[0]; target];
    }
    let r = (d - 1) as f64 / (target - 1).max(1) as f64;
    let mut out = Vec::with_capacity(target);
    for i in 0..target {
        let pos = i as f64 * r;
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(d - 1);
        let frac = (pos - lo as f64) as f32;
        let value = v[lo] * (1.0 - frac) + v[hi] * frac;
        out.push(value);
    }
    out
}

/// Length-adapts `v` to `target` dimensions, L2-normalizing the result.
/// `target == v.len()` is a cheap no-op copy (still normalized, per the
/// round-trip law in spec §8: the *shape* is stable, identity is not
/// required).
pub fn scale_embedding(v: &[f32], target: usize) -> Vec<f32> {
    if v.is_empty() || target == 0 {
        return vec![0.0; target];
    }
    let mut out = if v.len() == target {
        v.to_vec()
    } else if v.len() > target {
        downsample(v, target)
    } else {
        upsample(v, target)
    };
    l2_normalize(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_zero_vector_untouched() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn scale_downsample_has_target_length_and_unit_norm() {
        let v: Vec<f32> = (0..1536).map(|i| (i as f32).sin()).collect();
        let out = scale_embedding(&v, 1024);
        assert_eq!(out.len(), 1024);
        assert!((l2_norm(&out) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn scale_upsample_has_target_length_and_unit_norm() {
        let v: Vec<f32> = (0..512).map(|i| (i as f32).cos()).collect();
        let out = scale_embedding(&v, 1024);
        assert_eq!(out.len(), 1024);
        assert!((l2_norm(&out) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn scale_same_dimension_is_normalized_passthrough() {
        let v = vec![1.0, 2.0, 3.0];
        let out = scale_embedding(&v, 3);
        assert_eq!(out.len(), 3);
        assert!((l2_norm(&out) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn round_trip_shape_stability() {
        // scaleEmbedding(scaleEmbedding(v, d'), d).length == v.len() and unit norm.
        let v: Vec<f32> = (0..768).map(|i| ((i * 7) as f32).sin()).collect();
        let down = scale_embedding(&v, 256);
        let back = scale_embedding(&down, 768);
        assert_eq!(back.len(), v.len());
        assert!((l2_norm(&back) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn scale_empty_vector_is_total() {
        let out = scale_embedding(&[], 8);
        assert_eq!(out.len(), 8);
        assert!(out.iter().all(|x| *x == 0.0));
    }
}
