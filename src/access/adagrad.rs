//! Dense AdaGrad access method.
//!
//! The concrete policy used by the embedding-style training apps: each
//! key owns a dense weight vector plus a per-coordinate squared-gradient
//! accumulator, and pushed gradients step the weights by
//! `lr * g / sqrt(g2sum + fudge_factor)`.

use crate::access::method::{Gradient, PullAccess, PushAccess};
use crate::error::{Result, SparrowError};
use crate::table::DumpValue;
use crate::types::Key;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Server-side parameter: weights and the AdaGrad accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseParam {
    pub weight: Vec<f32>,
    pub g2sum: Vec<f32>,
}

/// Worker-side gradient accumulator: summed contributions and their
/// count, averaged by `normalize` before the push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DenseGrad {
    pub sum: Vec<f32>,
    pub count: u32,
}

impl DenseGrad {
    /// Record one training instance's contribution.
    ///
    /// # Panics
    ///
    /// Panics when `grad` does not match the dimension of previously
    /// recorded contributions; a key's gradient dimension is fixed for
    /// the lifetime of a mini-batch.
    pub fn add(&mut self, grad: &[f32]) {
        if self.sum.is_empty() {
            self.sum = vec![0.0; grad.len()];
        }
        assert_eq!(
            self.sum.len(),
            grad.len(),
            "gradient dimension changed mid-batch"
        );
        for (acc, g) in self.sum.iter_mut().zip(grad) {
            *acc += g;
        }
        self.count += 1;
    }
}

impl Gradient for DenseGrad {
    fn accumulate(&mut self, other: &Self) {
        if other.sum.is_empty() {
            return;
        }
        if self.sum.is_empty() {
            self.sum = vec![0.0; other.sum.len()];
        }
        assert_eq!(
            self.sum.len(),
            other.sum.len(),
            "gradient dimension changed mid-batch"
        );
        for (acc, g) in self.sum.iter_mut().zip(&other.sum) {
            *acc += g;
        }
        self.count += other.count;
    }

    fn normalize(&mut self) {
        if self.count > 1 {
            let n = self.count as f32;
            for g in &mut self.sum {
                *g /= n;
            }
            self.count = 1;
        }
    }
}

/// AdaGrad pull/push policy over dense vectors of a fixed dimension.
#[derive(Debug, Clone)]
pub struct AdaGradMethod {
    dim: usize,
    learning_rate: f32,
    fudge_factor: f32,
    init_scale: f32,
}

impl AdaGradMethod {
    pub fn new(dim: usize, learning_rate: f32, fudge_factor: f32) -> Self {
        Self {
            dim,
            learning_rate,
            fudge_factor,
            init_scale: 1.0,
        }
    }

    /// Scale of the random initialization; `0.0` makes `init_param`
    /// deterministic (all-zero weights).
    pub fn with_init_scale(mut self, scale: f32) -> Self {
        self.init_scale = scale;
        self
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl PullAccess for AdaGradMethod {
    type Param = DenseParam;
    type Pull = Vec<f32>;
    type Local = Vec<f32>;

    fn init_param(&self, _key: Key) -> DenseParam {
        let mut rng = rand::thread_rng();
        let weight = (0..self.dim)
            .map(|_| (rng.gen::<f32>() - 0.5) / self.dim as f32 * self.init_scale)
            .collect();
        DenseParam {
            weight,
            g2sum: vec![0.0; self.dim],
        }
    }

    fn pull_value(&self, _key: Key, param: &DenseParam) -> Vec<f32> {
        param.weight.clone()
    }

    fn apply_pull(&self, _key: Key, local: &mut Vec<f32>, pull: &Vec<f32>) {
        local.clone_from(pull);
    }
}

impl PushAccess for AdaGradMethod {
    type Param = DenseParam;
    type Grad = DenseGrad;

    fn fold(&self, _key: Key, param: &mut DenseParam, grad: &DenseGrad) {
        if grad.sum.is_empty() || grad.count == 0 {
            // A key can sit in a mini-batch without receiving any
            // contribution; folding nothing is correct.
            return;
        }
        debug_assert_eq!(param.weight.len(), grad.sum.len());
        for i in 0..param.weight.len() {
            let g = grad.sum[i];
            param.g2sum[i] += g * g;
            param.weight[i] +=
                self.learning_rate * g / (param.g2sum[i] + self.fudge_factor).sqrt();
        }
    }
}

impl DumpValue for DenseParam {
    fn write_fields(&self, out: &mut String) {
        for (i, w) in self.weight.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&w.to_string());
        }
        for s in &self.g2sum {
            out.push(' ');
            out.push_str(&s.to_string());
        }
    }

    fn parse_fields(fields: &str) -> Result<Self> {
        let values: Vec<f32> = fields
            .split_whitespace()
            .map(|f| {
                f.parse::<f32>().map_err(|_| SparrowError::DumpFormat {
                    line: 0,
                    reason: format!("bad float `{f}`"),
                })
            })
            .collect::<Result<_>>()?;
        if values.is_empty() || values.len() % 2 != 0 {
            return Err(SparrowError::DumpFormat {
                line: 0,
                reason: format!("expected an even field count, got {}", values.len()),
            });
        }
        let dim = values.len() / 2;
        Ok(DenseParam {
            weight: values[..dim].to_vec(),
            g2sum: values[dim..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_deterministic_init_with_zero_scale() {
        let m = AdaGradMethod::new(4, 0.1, 1e-6).with_init_scale(0.0);
        let p = m.init_param(1);
        assert_eq!(p.weight, vec![0.0; 4]);
        assert_eq!(p.g2sum, vec![0.0; 4]);
    }

    #[test]
    fn test_random_init_within_scale() {
        let m = AdaGradMethod::new(8, 0.1, 1e-6);
        let p = m.init_param(1);
        assert_eq!(p.weight.len(), 8);
        for w in &p.weight {
            assert!(w.abs() <= 0.5 / 8.0 + 1e-6);
        }
    }

    #[test]
    fn test_grad_accumulate_and_normalize() {
        let mut g = DenseGrad::default();
        g.add(&[1.0, 2.0]);
        g.add(&[3.0, 4.0]);
        g.add(&[2.0, 0.0]);
        assert_eq!(g.count, 3);
        assert_eq!(g.sum, vec![6.0, 6.0]);

        g.normalize();
        assert_eq!(g.count, 1);
        assert!(close(g.sum[0], 2.0) && close(g.sum[1], 2.0));

        // Normalizing twice must not divide again.
        g.normalize();
        assert!(close(g.sum[0], 2.0));
    }

    #[test]
    #[should_panic(expected = "gradient dimension changed mid-batch")]
    fn test_add_dimension_mismatch_is_fatal() {
        let mut g = DenseGrad::default();
        g.add(&[1.0, 2.0]);
        g.add(&[1.0]);
    }

    #[test]
    #[should_panic(expected = "gradient dimension changed mid-batch")]
    fn test_accumulate_dimension_mismatch_is_fatal() {
        let mut a = DenseGrad::default();
        a.add(&[1.0, 2.0]);
        let mut b = DenseGrad::default();
        b.add(&[1.0, 2.0, 3.0]);
        a.accumulate(&b);
    }

    #[test]
    fn test_accumulate_merges_counts() {
        let mut a = DenseGrad::default();
        a.add(&[1.0]);
        let mut b = DenseGrad::default();
        b.add(&[2.0]);
        b.add(&[3.0]);

        a.accumulate(&b);
        assert_eq!(a.count, 3);
        assert_eq!(a.sum, vec![6.0]);
    }

    #[test]
    fn test_fold_applies_adagrad_step() {
        let lr = 0.5f32;
        let eps = 1e-6f32;
        let m = AdaGradMethod::new(2, lr, eps);
        let mut p = DenseParam {
            weight: vec![0.0, 1.0],
            g2sum: vec![0.0, 0.0],
        };
        let mut g = DenseGrad::default();
        g.add(&[1.0, -2.0]);

        m.fold(7, &mut p, &g);
        assert!(close(p.g2sum[0], 1.0));
        assert!(close(p.g2sum[1], 4.0));
        assert!(close(p.weight[0], lr * 1.0 / (1.0f32 + eps).sqrt()));
        assert!(close(p.weight[1], 1.0 + lr * -2.0 / (4.0f32 + eps).sqrt()));
    }

    #[test]
    fn test_fold_empty_grad_is_noop() {
        let m = AdaGradMethod::new(2, 0.1, 1e-6);
        let mut p = DenseParam {
            weight: vec![1.0, 2.0],
            g2sum: vec![0.5, 0.5],
        };
        let before = p.clone();
        m.fold(7, &mut p, &DenseGrad::default());
        assert_eq!(p, before);
    }

    #[test]
    fn test_dump_fields_roundtrip() {
        let p = DenseParam {
            weight: vec![0.25, -1.5],
            g2sum: vec![4.0, 0.0],
        };
        let mut fields = String::new();
        p.write_fields(&mut fields);
        let back = DenseParam::parse_fields(&fields).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_parse_fields_odd_count_rejected() {
        assert!(DenseParam::parse_fields("1.0 2.0 3.0").is_err());
        assert!(DenseParam::parse_fields("").is_err());
    }
}
