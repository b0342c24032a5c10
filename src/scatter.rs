//! Profile-likelihood search of the intrinsic scatter
//!
//! The objective `J(s)` is evaluated on every node of a [ScatterGrid] in `ln s`. When the discrete
//! minimum is an interior node, a parabola through it and its two neighbours gives the refined
//! `ln s`, and the fit is evaluated once more at that scatter. Otherwise a grid fit is returned as
//! is:
//!
//! - any non-finite objective: the last (largest) scatter node
//! - minimum on the first or the last node: that node

use crate::array_stats::{argmin, parabola_vertex};
use crate::config::ScatterGrid;
use crate::error::CannonError;
use crate::regression::{FixedScatterFit, PixelRegression};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Fits that can be evaluated at an arbitrary fixed scatter
pub trait ScatterProfile {
    type Fit;

    fn fit_at_scatter(&self, scatter: f64) -> Result<Self::Fit, CannonError>;

    /// Value to minimise, the negative log-likelihood up to constants
    fn objective(&self, fit: &Self::Fit) -> f64;
}

impl ScatterProfile for PixelRegression<'_> {
    type Fit = FixedScatterFit;

    fn fit_at_scatter(&self, scatter: f64) -> Result<Self::Fit, CannonError> {
        self.solve(scatter)
    }

    fn objective(&self, fit: &Self::Fit) -> f64 {
        fit.objective()
    }
}

/// How the scatter of a [ScatterOptimum] was chosen
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ScatterSearchOutcome {
    /// Parabolic refinement around an interior grid minimum
    Refined,
    /// Grid minimum on the smallest scatter node
    LowerBoundary,
    /// Grid minimum on the largest scatter node
    UpperBoundary,
    /// Some grid objective was not finite, the largest scatter node is used
    NonFiniteObjective,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScatterOptimum<F> {
    pub fit: F,
    pub scatter: f64,
    pub outcome: ScatterSearchOutcome,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScatterOptimizer {
    grid: ScatterGrid,
}

impl ScatterOptimizer {
    pub fn new(grid: ScatterGrid) -> Result<Self, CannonError> {
        grid.validate()?;
        Ok(Self { grid })
    }

    pub fn grid(&self) -> &ScatterGrid {
        &self.grid
    }

    pub fn optimize<P>(&self, profile: &P) -> Result<ScatterOptimum<P::Fit>, CannonError>
    where
        P: ScatterProfile,
    {
        let ln_scatters: Vec<f64> = self.grid.ln_scatters().collect();
        let mut fits = ln_scatters
            .iter()
            .map(|ln_scatter| profile.fit_at_scatter(ln_scatter.exp()))
            .collect::<Result<Vec<_>, _>>()?;
        let objectives: Vec<f64> = fits.iter().map(|fit| profile.objective(fit)).collect();

        let last = fits.len() - 1;
        let grid_optimum = |mut fits: Vec<P::Fit>, i: usize, outcome: ScatterSearchOutcome| {
            ScatterOptimum {
                fit: fits.swap_remove(i),
                scatter: ln_scatters[i].exp(),
                outcome,
            }
        };

        if !objectives.iter().all(|j| j.is_finite()) {
            return Ok(grid_optimum(fits, last, ScatterSearchOutcome::NonFiniteObjective));
        }
        let lowest = argmin(&objectives).unwrap_or(0);
        if lowest == 0 {
            return Ok(grid_optimum(fits, 0, ScatterSearchOutcome::LowerBoundary));
        }
        if lowest == last {
            return Ok(grid_optimum(fits, last, ScatterSearchOutcome::UpperBoundary));
        }

        let bracket = [lowest - 1, lowest, lowest + 1];
        let ln_scatter = parabola_vertex(
            bracket.map(|i| ln_scatters[i]),
            bracket.map(|i| objectives[i]),
        )
        .unwrap_or(ln_scatters[lowest]);
        let scatter = ln_scatter.exp();
        // grid fits are dropped before the final evaluation
        fits.clear();
        let fit = profile.fit_at_scatter(scatter)?;
        Ok(ScatterOptimum {
            fit,
            scatter,
            outcome: ScatterSearchOutcome::Refined,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unreadable_literal)]
mod tests {
    use super::*;
    use crate::config::{PolynomialOrder, ZERO_IVAR_VARIANCE};
    use crate::label_basis::LabelBasis;
    use crate::tests::*;

    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::cell::Cell;

    /// `J(ln s) = curvature (ln s - vertex)^2 + offset`, with a call counter
    struct ParabolicProfile {
        vertex: f64,
        curvature: f64,
        nan_at: Option<f64>,
        calls: Cell<usize>,
    }

    impl ParabolicProfile {
        fn new(vertex: f64) -> Self {
            Self {
                vertex,
                curvature: 2.5,
                nan_at: None,
                calls: Cell::new(0),
            }
        }
    }

    impl ScatterProfile for ParabolicProfile {
        type Fit = (f64, f64);

        fn fit_at_scatter(&self, scatter: f64) -> Result<Self::Fit, CannonError> {
            self.calls.set(self.calls.get() + 1);
            let ln_scatter = scatter.ln();
            if self.nan_at.is_some_and(|x| (x - ln_scatter).abs() < 1e-9) {
                return Ok((scatter, f64::NAN));
            }
            Ok((
                scatter,
                self.curvature * (ln_scatter - self.vertex).powi(2) - 13.0,
            ))
        }

        fn objective(&self, fit: &Self::Fit) -> f64 {
            fit.1
        }
    }

    #[test]
    fn refinement_hits_the_vertex() {
        let optimizer = ScatterOptimizer::default();
        for &vertex in &[-8.1, -4.321, -2.0, -0.6] {
            let profile = ParabolicProfile::new(vertex);
            let optimum = optimizer.optimize(&profile).unwrap();
            assert_eq!(optimum.outcome, ScatterSearchOutcome::Refined);
            assert_relative_eq!(optimum.scatter.ln(), vertex, epsilon = 1e-10);
            assert_relative_eq!(optimum.fit.0, optimum.scatter);
            assert_eq!(profile.calls.get(), optimizer.grid().len() + 1);
        }
    }

    #[test]
    fn minimum_below_grid_returns_first_node() {
        let optimizer = ScatterOptimizer::default();
        let profile = ParabolicProfile::new(-12.0);
        let optimum = optimizer.optimize(&profile).unwrap();
        assert_eq!(optimum.outcome, ScatterSearchOutcome::LowerBoundary);
        assert_eq!(optimum.scatter, optimizer.grid().ln_scatter(0).exp());
        assert_eq!(optimum.fit.0, optimum.scatter);
        assert_eq!(profile.calls.get(), optimizer.grid().len());
    }

    #[test]
    fn minimum_above_grid_returns_last_node() {
        let optimizer = ScatterOptimizer::default();
        let profile = ParabolicProfile::new(3.0);
        let optimum = optimizer.optimize(&profile).unwrap();
        let last = optimizer.grid().len() - 1;
        assert_eq!(optimum.outcome, ScatterSearchOutcome::UpperBoundary);
        assert_eq!(optimum.scatter, optimizer.grid().ln_scatter(last).exp());
        assert_eq!(profile.calls.get(), optimizer.grid().len());
    }

    #[test]
    fn flat_objective_picks_the_smallest_scatter() {
        let optimizer = ScatterOptimizer::default();
        let mut profile = ParabolicProfile::new(0.0);
        profile.curvature = 0.0;
        let optimum = optimizer.optimize(&profile).unwrap();
        assert_eq!(optimum.outcome, ScatterSearchOutcome::LowerBoundary);
        assert_eq!(optimum.scatter, optimizer.grid().ln_scatter(0).exp());
    }

    #[test]
    fn non_finite_objective_falls_back_to_largest_scatter() {
        let optimizer = ScatterOptimizer::default();
        let mut profile = ParabolicProfile::new(-4.0);
        profile.nan_at = Some(optimizer.grid().ln_scatter(4));
        let optimum = optimizer.optimize(&profile).unwrap();
        let last = optimizer.grid().len() - 1;
        assert_eq!(optimum.outcome, ScatterSearchOutcome::NonFiniteObjective);
        assert_eq!(optimum.scatter, optimizer.grid().ln_scatter(last).exp());
        assert_eq!(optimum.fit.0, optimum.scatter);
        assert_eq!(profile.calls.get(), optimizer.grid().len());
    }

    #[test]
    fn singular_fit_propagates() {
        struct Singular;
        impl ScatterProfile for Singular {
            type Fit = ();
            fn fit_at_scatter(&self, scatter: f64) -> Result<(), CannonError> {
                Err(CannonError::SingularFit { pixel: 9, scatter })
            }
            fn objective(&self, _fit: &()) -> f64 {
                0.0
            }
        }
        let optimizer = ScatterOptimizer::default();
        assert!(matches!(
            optimizer.optimize(&Singular),
            Err(CannonError::SingularFit { pixel: 9, .. })
        ));
    }

    #[test]
    fn recovers_injected_scatter() {
        let set = synthetic_set(400, 2, 1, 0.01, 0.05, 42);
        let basis = LabelBasis::from_training_labels(set.labels.view(), PolynomialOrder::Quadratic)
            .unwrap();
        let design = basis.design_matrix(set.labels.view()).unwrap();
        let regression = PixelRegression::new(
            0,
            set.fluxes.column(0),
            set.inverse_variances.column(0),
            design.view(),
            ZERO_IVAR_VARIANCE,
        )
        .unwrap();
        let optimum = ScatterOptimizer::default().optimize(&regression).unwrap();
        assert_eq!(optimum.outcome, ScatterSearchOutcome::Refined);
        assert_relative_eq!(optimum.scatter, 0.05, max_relative = 0.2);
        assert_eq!(optimum.fit, regression.solve(optimum.scatter).unwrap());
    }

    #[test]
    fn noiseless_pixel_sits_on_lower_boundary() {
        let set = synthetic_set(25, 3, 1, 0.0, 0.0, 3);
        let basis = LabelBasis::from_training_labels(set.labels.view(), PolynomialOrder::Quadratic)
            .unwrap();
        let design = basis.design_matrix(set.labels.view()).unwrap();
        let fluxes = design.dot(&set.coefficients.row(0));
        let regression = PixelRegression::new(
            0,
            fluxes.view(),
            set.inverse_variances.column(0),
            design.view(),
            ZERO_IVAR_VARIANCE,
        )
        .unwrap();
        let optimizer = ScatterOptimizer::default();
        let optimum = optimizer.optimize(&regression).unwrap();
        assert_eq!(optimum.outcome, ScatterSearchOutcome::LowerBoundary);
        assert_eq!(optimum.scatter, optimizer.grid().ln_scatter(0).exp());
        assert_eq!(optimum.fit, regression.solve(optimum.scatter).unwrap());
    }

    /// Fluxes in units `1/sqrt(k)` of the original ones with `k = e^2` shift the optimum by
    /// exactly two grid nodes
    #[test]
    fn argmin_is_invariant_under_flux_units() {
        let set = synthetic_set(300, 2, 1, 0.01, 0.05, 11);
        let basis = LabelBasis::from_training_labels(set.labels.view(), PolynomialOrder::Quadratic)
            .unwrap();
        let design = basis.design_matrix(set.labels.view()).unwrap();
        let k = 2.0_f64.exp();
        let ivars = set.inverse_variances.column(0);
        let scaled_ivars = ivars.mapv(|x| x * k);
        let scaled_fluxes = set.fluxes.column(0).mapv(|f| f / k.sqrt());

        let optimizer = ScatterOptimizer::default();
        let optimum = optimizer
            .optimize(
                &PixelRegression::new(
                    0,
                    set.fluxes.column(0),
                    ivars,
                    design.view(),
                    ZERO_IVAR_VARIANCE,
                )
                .unwrap(),
            )
            .unwrap();
        let scaled_optimum = optimizer
            .optimize(
                &PixelRegression::new(
                    0,
                    scaled_fluxes.view(),
                    scaled_ivars.view(),
                    design.view(),
                    ZERO_IVAR_VARIANCE,
                )
                .unwrap(),
            )
            .unwrap();

        assert_eq!(optimum.outcome, ScatterSearchOutcome::Refined);
        assert_eq!(scaled_optimum.outcome, ScatterSearchOutcome::Refined);
        assert_relative_eq!(
            scaled_optimum.scatter * k.sqrt(),
            optimum.scatter,
            max_relative = 1e-8
        );
        assert_abs_diff_eq!(
            scaled_optimum.fit.coefficients.mapv(|x| x * k.sqrt()),
            optimum.fit.coefficients,
            epsilon = 1e-8
        );
        assert_abs_diff_eq!(
            scaled_optimum.fit.residuals,
            optimum.fit.residuals,
            epsilon = 1e-8
        );
    }
}
