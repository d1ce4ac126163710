//! Greedy without-replacement walk down a weight vector.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("all {pool} targets have already been selected")]
    Exhausted { pool: usize },
}

/// Yields the highest remaining weight each call, lowest index on ties,
/// and zeroes what it returns so it is never picked again.
pub struct Selector {
    weights: Vec<f64>,
    exhausted: Vec<bool>,
    remaining: usize,
}

impl Selector {
    pub fn new(weights: Vec<f64>) -> Self {
        let len = weights.len();
        Self {
            weights,
            exhausted: vec![false; len],
            remaining: len,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn next_index(&mut self) -> Result<usize, SelectorError> {
        // Tracked separately from the weights so entries that underflowed to
        // zero are still eligible.
        let mut best: Option<usize> = None;
        for (i, &w) in self.weights.iter().enumerate() {
            if self.exhausted[i] {
                continue;
            }
            match best {
                Some(b) if self.weights[b] >= w => {}
                _ => best = Some(i),
            }
        }

        let idx = best.ok_or(SelectorError::Exhausted {
            pool: self.weights.len(),
        })?;
        self.weights[idx] = 0.0;
        self.exhausted[idx] = true;
        self.remaining -= 1;
        Ok(idx)
    }
}
