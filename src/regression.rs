//! Weighted least squares of a single pixel at a fixed intrinsic scatter
//!
//! For every object the effective variance is the measurement variance plus `scatter²`, its
//! inverse `c_n` weights the normal equations
//!
//! ```text
//! (Xᵀ diag(c) X) θ = Xᵀ (c ⊙ f)
//! ```
//!
//! The Gram matrix is Jacobi-equilibrated before the Cholesky factorisation, so the singularity
//! test does not depend on the scale of the label columns.

use crate::error::CannonError;

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};

/// Smallest accepted squared pivot of the equilibrated Cholesky factor
const MIN_EQUILIBRATED_PIVOT: f64 = 64.0 * f64::EPSILON;

/// Result of [PixelRegression::solve]
#[derive(Clone, Debug, PartialEq)]
pub struct FixedScatterFit {
    /// Basis coefficients
    pub coefficients: Array1<f64>,
    /// Inverse of the weighted Gram matrix
    pub covariance: Array2<f64>,
    /// `sqrt(c) ⊙ (f - X θ)` for every object
    pub residuals: Array1<f64>,
    /// `Σ ln c`
    pub log_det_precision: f64,
}

impl FixedScatterFit {
    pub fn chi2(&self) -> f64 {
        self.residuals.dot(&self.residuals)
    }

    /// Negative log-likelihood up to additive and multiplicative constants
    pub fn objective(&self) -> f64 {
        self.chi2() - self.log_det_precision
    }
}

/// One pixel's flux column regressed against the shared design matrix
#[derive(Clone, Debug)]
pub struct PixelRegression<'a> {
    pixel: usize,
    fluxes: ArrayView1<'a, f64>,
    noise_variances: Array1<f64>,
    design: ArrayView2<'a, f64>,
}

impl<'a> PixelRegression<'a> {
    /// Objects with zero or non-finite `inverse_variances` get noise variance `zero_ivar_variance`
    pub fn new(
        pixel: usize,
        fluxes: ArrayView1<'a, f64>,
        inverse_variances: ArrayView1<f64>,
        design: ArrayView2<'a, f64>,
        zero_ivar_variance: f64,
    ) -> Result<Self, CannonError> {
        CannonError::check_len("flux column", design.nrows(), fluxes.len())?;
        CannonError::check_len(
            "inverse variance column",
            design.nrows(),
            inverse_variances.len(),
        )?;
        let noise_variances = inverse_variances.mapv(|ivar| {
            if ivar.is_finite() && ivar > 0.0 {
                ivar.recip()
            } else {
                zero_ivar_variance
            }
        });
        Ok(Self {
            pixel,
            fluxes,
            noise_variances,
            design,
        })
    }

    pub fn pixel(&self) -> usize {
        self.pixel
    }

    fn singular(&self, scatter: f64) -> CannonError {
        CannonError::SingularFit {
            pixel: self.pixel,
            scatter,
        }
    }

    /// Per-object precision `1 / (σ² + scatter²)`
    pub fn precision(&self, scatter: f64) -> Array1<f64> {
        let scatter2 = scatter * scatter;
        self.noise_variances.mapv(|var| (var + scatter2).recip())
    }

    pub fn solve(&self, scatter: f64) -> Result<FixedScatterFit, CannonError> {
        let precision = self.precision(scatter);
        let nbasis = self.design.ncols();

        let weighted = &self.design * &precision.view().insert_axis(Axis(1));
        let gram = weighted.t().dot(&self.design);
        let rhs = weighted.t().dot(&self.fluxes);

        let scale = gram.diag().mapv(|g| g.sqrt().recip());
        if !scale.iter().all(|s| s.is_finite() && *s > 0.0) {
            return Err(self.singular(scatter));
        }
        let equilibrated = DMatrix::from_fn(nbasis, nbasis, |i, j| {
            scale[i] * gram[(i, j)] * scale[j]
        });
        let cholesky = equilibrated
            .cholesky()
            .ok_or_else(|| self.singular(scatter))?;
        let min_pivot = cholesky
            .l_dirty()
            .diagonal()
            .iter()
            .fold(f64::INFINITY, |acc, &l| acc.min(l * l));
        if min_pivot < MIN_EQUILIBRATED_PIVOT {
            return Err(self.singular(scatter));
        }

        let scaled_rhs = DVector::from_iterator(nbasis, rhs.iter().zip(&scale).map(|(r, s)| r * s));
        let solution = cholesky.solve(&scaled_rhs);
        let coefficients = Array1::from_iter(solution.iter().zip(&scale).map(|(x, s)| x * s));
        if !coefficients.iter().all(|x| x.is_finite()) {
            return Err(self.singular(scatter));
        }

        let inverse = cholesky.inverse();
        let covariance =
            Array2::from_shape_fn((nbasis, nbasis), |(i, j)| scale[i] * inverse[(i, j)] * scale[j]);

        let model = self.design.dot(&coefficients);
        let mut residuals = Array1::zeros(self.fluxes.len());
        Zip::from(&mut residuals)
            .and(&self.fluxes)
            .and(&model)
            .and(&precision)
            .for_each(|r, &f, &m, &c| *r = c.sqrt() * (f - m));
        let log_det_precision = precision.iter().map(|c| c.ln()).sum();

        Ok(FixedScatterFit {
            coefficients,
            covariance,
            residuals,
            log_det_precision,
        })
    }
}
