//! Quantile-bin classification of trade returns.
//!
//! Bins are built offline from historical return distributions and loaded
//! once per run; the engine only ever reads them.

use std::collections::HashMap;

use crate::domain::error::QuantraderError;

/// Ordered interior boundaries for one asset. A sequence of `n_bins - 1`
/// values plus the implicit ±infinity endpoints defines `n_bins` buckets,
/// each open on the left and closed on the right.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantileBins {
    interior: Vec<f64>,
}

impl QuantileBins {
    pub fn new(interior: Vec<f64>) -> Self {
        Self { interior }
    }

    pub fn n_bins(&self) -> usize {
        self.interior.len() + 1
    }

    /// Interior boundary at `idx`, counting from the lowest.
    pub fn boundary(&self, idx: usize) -> Option<f64> {
        self.interior.get(idx).copied()
    }

    /// Smallest bucket index `i` such that `edges[i] < value <= edges[i+1]`,
    /// where `edges` is the interior sequence extended with ±infinity.
    ///
    /// Total for every finite input; falling through means the input was not
    /// a real number (NaN from corrupt upstream data) and is fatal.
    pub fn classify(&self, value: f64) -> Result<usize, QuantraderError> {
        let mut lower = f64::NEG_INFINITY;
        for (idx, upper) in self
            .interior
            .iter()
            .copied()
            .chain(std::iter::once(f64::INFINITY))
            .enumerate()
        {
            if lower < value && value <= upper {
                return Ok(idx);
            }
            lower = upper;
        }
        Err(QuantraderError::InvariantViolation {
            reason: format!("return {value} fell outside every quantile bucket"),
        })
    }
}

/// Per-asset bins plus the common bucket count.
#[derive(Debug, Clone)]
pub struct BinsMap {
    bins: HashMap<String, QuantileBins>,
    n_bins: usize,
}

impl BinsMap {
    /// Build from per-asset boundary sequences. Every asset must carry the
    /// same number of boundaries.
    pub fn new(bins: HashMap<String, QuantileBins>) -> Result<Self, QuantraderError> {
        let mut n_bins = None;
        for (asset, b) in &bins {
            match n_bins {
                None => n_bins = Some(b.n_bins()),
                Some(n) if n != b.n_bins() => {
                    return Err(QuantraderError::Dataset {
                        reason: format!(
                            "asset {asset} has {} bins, expected {n}",
                            b.n_bins()
                        ),
                    });
                }
                Some(_) => {}
            }
        }
        let n_bins = n_bins.ok_or_else(|| QuantraderError::Dataset {
            reason: "no quantile bins loaded".into(),
        })?;
        Ok(Self { bins, n_bins })
    }

    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    pub fn get(&self, asset: &str) -> Result<&QuantileBins, QuantraderError> {
        self.bins
            .get(asset)
            .ok_or_else(|| QuantraderError::InvariantViolation {
                reason: format!("no quantile bins for asset {asset}"),
            })
    }
}
