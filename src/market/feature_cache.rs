// =============================================================================
// FeatureSequenceCache — rolling feature matrix for sequence models
// =============================================================================
//
// Keeps the most recent S feature frames (default 10). Each pushed frame is
// a name → value map; the cache flattens it into a fixed-order vector using
// the name list supplied at construction, padding absent names with zero.
// `scaled_matrix` applies an optional per-dimension affine transform before
// returning, so a model trained on standardized inputs sees the same
// normalization live.
// =============================================================================

use std::collections::{HashMap, VecDeque};

/// Default sequence length.
pub const DEFAULT_SEQUENCE_LENGTH: usize = 10;

/// Per-dimension affine transform: `(x - mean) / std`.
#[derive(Debug, Clone)]
pub struct FeatureScaler {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl FeatureScaler {
    pub fn new(mean: Vec<f64>, std: Vec<f64>) -> Self {
        Self { mean, std }
    }

    fn apply(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(i, x)| {
                let m = self.mean.get(i).copied().unwrap_or(0.0);
                let s = self.std.get(i).copied().unwrap_or(1.0);
                if s > 0.0 {
                    (x - m) / s
                } else {
                    x - m
                }
            })
            .collect()
    }
}

/// Ring of the most recent feature vectors in a frozen dimension order.
pub struct FeatureSequenceCache {
    sequence_length: usize,
    names: Vec<String>,
    buffer: VecDeque<Vec<f64>>,
    scaler: Option<FeatureScaler>,
}

impl FeatureSequenceCache {
    pub fn new(sequence_length: usize, names: Vec<String>) -> Self {
        Self {
            sequence_length,
            buffer: VecDeque::with_capacity(sequence_length),
            names,
            scaler: None,
        }
    }

    pub fn feature_dim(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn set_scaler(&mut self, scaler: FeatureScaler) {
        self.scaler = Some(scaler);
    }

    /// Map a named-feature frame into the fixed dimension order; missing
    /// names become zero.
    pub fn push(&mut self, features: &HashMap<String, f64>) {
        let row: Vec<f64> = self
            .names
            .iter()
            .map(|name| features.get(name).copied().unwrap_or(0.0))
            .collect();
        if self.buffer.len() == self.sequence_length {
            self.buffer.pop_front();
        }
        self.buffer.push_back(row);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.buffer.len() >= self.sequence_length
    }

    /// The raw S×D matrix; all-zero until the sequence is full.
    pub fn matrix(&self) -> Vec<Vec<f64>> {
        if !self.is_ready() {
            return vec![vec![0.0; self.names.len()]; self.sequence_length];
        }
        self.buffer.iter().cloned().collect()
    }

    /// The matrix with the configured scaler applied (raw when none is set).
    pub fn scaled_matrix(&self) -> Vec<Vec<f64>> {
        let matrix = self.matrix();
        match &self.scaler {
            Some(scaler) => matrix.iter().map(|row| scaler.apply(row)).collect(),
            None => matrix,
        }
    }

    /// Most recent frame as a named map.
    pub fn latest(&self) -> HashMap<String, f64> {
        match self.buffer.back() {
            Some(row) => self
                .names
                .iter()
                .zip(row.iter())
                .map(|(n, v)| (n.clone(), *v))
                .collect(),
            None => self.names.iter().map(|n| (n.clone(), 0.0)).collect(),
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl std::fmt::Debug for FeatureSequenceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FeatureSequenceCache(size={}/{}, dim={})",
            self.buffer.len(),
            self.sequence_length,
            self.names.len()
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(names: &[&str], seq: usize) -> FeatureSequenceCache {
        FeatureSequenceCache::new(seq, names.iter().map(|s| s.to_string()).collect())
    }

    fn frame(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn missing_names_pad_with_zero() {
        let mut c = cache(&["a", "b", "c"], 2);
        c.push(&frame(&[("a", 1.0), ("c", 3.0)]));
        c.push(&frame(&[("b", 2.0)]));

        let m = c.matrix();
        assert_eq!(m, vec![vec![1.0, 0.0, 3.0], vec![0.0, 2.0, 0.0]]);
    }

    #[test]
    fn matrix_is_zero_until_ready() {
        let mut c = cache(&["a"], 3);
        c.push(&frame(&[("a", 9.0)]));
        assert!(!c.is_ready());
        assert_eq!(c.matrix(), vec![vec![0.0], vec![0.0], vec![0.0]]);

        c.push(&frame(&[("a", 9.0)]));
        c.push(&frame(&[("a", 9.0)]));
        assert!(c.is_ready());
        assert_eq!(c.matrix()[0], vec![9.0]);
    }

    #[test]
    fn ring_evicts_oldest_frame() {
        let mut c = cache(&["a"], 2);
        for i in 0..4 {
            c.push(&frame(&[("a", i as f64)]));
        }
        assert_eq!(c.matrix(), vec![vec![2.0], vec![3.0]]);
    }

    #[test]
    fn scaler_is_affine_per_dimension() {
        let mut c = cache(&["a", "b"], 1);
        c.set_scaler(FeatureScaler::new(vec![10.0, 0.0], vec![2.0, 0.0]));
        c.push(&frame(&[("a", 14.0), ("b", 5.0)]));

        let scaled = c.scaled_matrix();
        assert_eq!(scaled[0][0], 2.0);
        // Zero-std dimensions are centred only.
        assert_eq!(scaled[0][1], 5.0);

        // Raw matrix is untouched.
        assert_eq!(c.matrix()[0], vec![14.0, 5.0]);
    }

    #[test]
    fn latest_exposes_named_view() {
        let mut c = cache(&["x", "y"], 2);
        assert_eq!(c.latest()["x"], 0.0);
        c.push(&frame(&[("x", 1.0), ("y", 2.0)]));
        let latest = c.latest();
        assert_eq!(latest["x"], 1.0);
        assert_eq!(latest["y"], 2.0);
    }
}
