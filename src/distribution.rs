//! Zipf-Mandelbrot popularity weights.
//!
//! Rank `r` (1-based) gets raw weight `(r + q)^(-s)`; the vector is then
//! normalized so it sums to one. Index 0 is always the most popular target.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DistributionError {
    #[error("cannot build a distribution over zero items")]
    Empty,
    #[error("rank offset q must be finite and >= 0, got {0}")]
    InvalidOffset(f64),
    #[error("exponent s must be finite and > 0, got {0}")]
    InvalidExponent(f64),
    #[error("raw weights sum to {0}, cannot normalize")]
    Degenerate(f64),
}

/// Builds the normalized Zipf-Mandelbrot weight vector for `n` ranked items.
pub fn zipf_mandelbrot(n: usize, q: f64, s: f64) -> Result<Vec<f64>, DistributionError> {
    if n == 0 {
        return Err(DistributionError::Empty);
    }
    if !q.is_finite() || q < 0.0 {
        return Err(DistributionError::InvalidOffset(q));
    }
    if !s.is_finite() || s <= 0.0 {
        return Err(DistributionError::InvalidExponent(s));
    }

    let raw: Vec<f64> = (1..=n).map(|rank| (rank as f64 + q).powf(-s)).collect();
    let sum: f64 = raw.iter().sum();
    if !sum.is_finite() || sum <= 0.0 {
        return Err(DistributionError::Degenerate(sum));
    }

    Ok(raw.into_iter().map(|w| w / sum).collect())
}
