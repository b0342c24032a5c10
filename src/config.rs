use crate::error::CannonError;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Effective noise variance given to objects with zero (or non-finite) inverse variance
pub const ZERO_IVAR_VARIANCE: f64 = 100.0 * 100.0;

/// Largest accepted number of [ScatterGrid] nodes
pub const MAX_GRID_NODES: usize = 4096;

/// Log-spaced grid of trial scatter values
///
/// Grid nodes are `ln_min + i * step` for every `i` such that the node is strictly below `ln_max`,
/// so the upper bound itself is never evaluated.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ScatterGrid {
    pub ln_min: f64,
    pub ln_max: f64,
    pub step: f64,
}

impl ScatterGrid {
    pub fn new(ln_min: f64, ln_max: f64, step: f64) -> Result<Self, CannonError> {
        let grid = Self {
            ln_min,
            ln_max,
            step,
        };
        grid.validate()?;
        Ok(grid)
    }

    pub fn validate(&self) -> Result<(), CannonError> {
        if !(self.ln_min.is_finite() && self.ln_max.is_finite() && self.step.is_finite()) {
            return Err(CannonError::InvalidScatterGrid("bounds and step must be finite"));
        }
        if self.step <= 0.0 {
            return Err(CannonError::InvalidScatterGrid("step must be positive"));
        }
        if (self.ln_max - self.ln_min) / self.step > MAX_GRID_NODES as f64 {
            return Err(CannonError::InvalidScatterGrid(
                "step is too small for the range, too many nodes",
            ));
        }
        if self.len() < 3 {
            return Err(CannonError::InvalidScatterGrid(
                "at least three nodes are required to bracket a minimum",
            ));
        }
        Ok(())
    }

    /// Number of grid nodes
    pub fn len(&self) -> usize {
        let span = (self.ln_max - self.ln_min) / self.step;
        if span.is_finite() && span > 0.0 {
            span.ceil() as usize
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `ln(scatter)` of the `i`-th node
    #[inline]
    pub fn ln_scatter(&self, i: usize) -> f64 {
        self.ln_min + self.step * (i as f64)
    }

    pub fn ln_scatters(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.len()).map(|i| self.ln_scatter(i))
    }
}

impl Default for ScatterGrid {
    /// From `1e-4` to unity with half-e-fold steps
    fn default() -> Self {
        Self {
            ln_min: 1e-4_f64.ln(),
            ln_max: 0.0,
            step: 0.5,
        }
    }
}

/// Highest total power of the mean-centred labels in the basis
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum PolynomialOrder {
    Linear,
    #[default]
    Quadratic,
}

impl PolynomialOrder {
    /// Number of basis functions for `nlabels` labels
    pub fn basis_len(self, nlabels: usize) -> usize {
        match self {
            Self::Linear => 1 + nlabels,
            Self::Quadratic => 1 + nlabels + nlabels * (nlabels + 1) / 2,
        }
    }
}

/// What to do with a pixel whose weighted normal equations cannot be solved
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum SingularFitPolicy {
    /// Fail the whole run with [CannonError::SingularFit] for the lowest failing pixel
    #[default]
    Abort,
    /// NaN-fill the pixel, flag it as [crate::PixelStatus::Singular] and go on
    MaskPixel,
}

/// Options of a [crate::ModelTrainer] run
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TrainerConfig {
    pub grid: ScatterGrid,
    pub order: PolynomialOrder,
    pub singular_policy: SingularFitPolicy,
    pub zero_ivar_variance: f64,
    pub parallel: bool,
}

impl TrainerConfig {
    pub fn with_grid(mut self, grid: ScatterGrid) -> Self {
        self.grid = grid;
        self
    }

    pub fn with_order(mut self, order: PolynomialOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_singular_policy(mut self, policy: SingularFitPolicy) -> Self {
        self.singular_policy = policy;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            grid: ScatterGrid::default(),
            order: PolynomialOrder::default(),
            singular_policy: SingularFitPolicy::default(),
            zero_ivar_variance: ZERO_IVAR_VARIANCE,
            parallel: true,
        }
    }
}
