#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A robust loss `ρ(s)` applied to the squared RMS error `s` of one observation.
///
/// The scale is the RMS error (in image intensity units) at which the loss starts
/// to bound the influence of an observation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum RobustLoss {
    /// Plain least squares, `ρ(s) = s`.
    Trivial,
    /// Quadratic up to the scale and linear after it.
    Huber,
    /// Logarithmic growth, heavily downweighting gross outliers.
    Cauchy,
}

impl Default for RobustLoss {
    fn default() -> Self {
        Self::Huber
    }
}

impl RobustLoss {
    /// Evaluates `ρ(s)` for the squared error `s`.
    pub fn rho(self, s: f64, scale: f64) -> f64 {
        let b = scale * scale;
        match self {
            Self::Trivial => s,
            Self::Huber => {
                if s <= b {
                    s
                } else {
                    2.0 * (s * b).sqrt() - b
                }
            }
            Self::Cauchy => b * (1.0 + s / b).ln(),
        }
    }

    /// The factor by which a block of `n` residuals with squared norm `squared_norm` is
    /// scaled so that its new squared norm is `n * ρ(squared_norm / n)`.
    ///
    /// The factor is treated as a constant when scaling the Jacobian of the block.
    pub fn block_scale(self, squared_norm: f64, n: usize, scale: f64) -> f64 {
        if n == 0 || squared_norm <= 0.0 {
            return 1.0;
        }
        let s = squared_norm / n as f64;
        (self.rho(s, scale) / s).sqrt()
    }
}
