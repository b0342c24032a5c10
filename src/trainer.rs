use crate::config::{SingularFitPolicy, TrainerConfig};
use crate::error::CannonError;
use crate::label_basis::{LabelBasis, ModelShape};
use crate::model::{PixelArena, PixelModel, PixelStatus, TrainedModel};
use crate::regression::PixelRegression;
use crate::scatter::ScatterOptimizer;

use log::{debug, error, info, warn};
use ndarray::{Array1, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Zip};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag, checked before every pixel
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

fn check_finite(what: &'static str, values: ArrayView2<f64>) -> Result<(), CannonError> {
    match values.indexed_iter().find(|(_, x)| !x.is_finite()) {
        Some(((row, column), _)) => Err(CannonError::NonFiniteInput { what, row, column }),
        None => Ok(()),
    }
}

/// Fits every pixel of a training set against the shared label basis
///
/// ```
/// use cannon_train::{ModelTrainer, PolynomialOrder, TrainerConfig};
/// use ndarray::{Array1, Array2};
///
/// let labels = Array2::from_shape_fn((12, 2), |(i, j)| (i * (j + 1)) as f64 % 5.0 + 0.1 * i as f64);
/// let wavelengths = Array1::linspace(5000.0, 5010.0, 4);
/// let fluxes = Array2::from_shape_fn((12, 4), |(i, p)| 1.0 - 0.01 * labels[(i, 0)] * p as f64);
/// let ivars = Array2::from_elem((12, 4), 1e4);
///
/// let trainer = ModelTrainer::new(TrainerConfig::default().with_order(PolynomialOrder::Linear)).unwrap();
/// let model = trainer
///     .train(labels.view(), wavelengths.view(), fluxes.view(), ivars.view())
///     .unwrap();
/// assert_eq!(model.coefficients().dim(), (4, 3));
/// ```
#[derive(Clone, Debug)]
pub struct ModelTrainer {
    config: TrainerConfig,
    optimizer: ScatterOptimizer,
    cancellation: CancellationToken,
}

impl ModelTrainer {
    pub fn new(config: TrainerConfig) -> Result<Self, CannonError> {
        let optimizer = ScatterOptimizer::new(config.grid)?;
        Ok(Self {
            config,
            optimizer,
            cancellation: CancellationToken::default(),
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    fn validate(
        &self,
        label_values: ArrayView2<f64>,
        wavelengths: ArrayView1<f64>,
        fluxes: ArrayView2<f64>,
        inverse_variances: ArrayView2<f64>,
    ) -> Result<ModelShape, CannonError> {
        let (nobjects, nlabels) = label_values.dim();
        let npixels = wavelengths.len();
        CannonError::check_len("flux matrix rows", nobjects, fluxes.nrows())?;
        CannonError::check_len("flux matrix columns", npixels, fluxes.ncols())?;
        CannonError::check_len("inverse variance matrix rows", nobjects, inverse_variances.nrows())?;
        CannonError::check_len(
            "inverse variance matrix columns",
            npixels,
            inverse_variances.ncols(),
        )?;

        let shape = ModelShape::new(nobjects, nlabels, npixels, self.config.order);
        if nobjects < shape.nbasis {
            return Err(CannonError::TooFewObjects {
                objects: nobjects,
                basis: shape.nbasis,
            });
        }
        if npixels <= nlabels {
            return Err(CannonError::TooFewPixels {
                pixels: npixels,
                labels: nlabels,
            });
        }

        check_finite("label matrix", label_values)?;
        check_finite("flux matrix", fluxes)?;
        Ok(shape)
    }

    /// Scatter search and final fit of a single pixel
    pub fn fit_pixel<'a>(
        &self,
        pixel: usize,
        fluxes: ArrayView1<'a, f64>,
        inverse_variances: ArrayView1<f64>,
        design: ArrayView2<'a, f64>,
    ) -> Result<PixelModel, CannonError> {
        let regression = PixelRegression::new(
            pixel,
            fluxes,
            inverse_variances,
            design,
            self.config.zero_ivar_variance,
        )?;
        let model: PixelModel = self.optimizer.optimize(&regression)?.into();
        if model.status.is_fallback() {
            debug!(
                "pixel {pixel}: scatter search ended with {:?} at scatter {}",
                model.status, model.scatter
            );
        }
        Ok(model)
    }

    /// Trains the model
    ///
    /// `label_values` is `nobjects x nlabels`, `fluxes` and `inverse_variances` are
    /// `nobjects x npixels`. Wavelengths are carried over to the model untouched. Non-finite
    /// inverse variances are treated as zero.
    pub fn train(
        &self,
        label_values: ArrayView2<f64>,
        wavelengths: ArrayView1<f64>,
        fluxes: ArrayView2<f64>,
        inverse_variances: ArrayView2<f64>,
    ) -> Result<TrainedModel, CannonError> {
        let shape = self.validate(label_values, wavelengths, fluxes, inverse_variances)?;
        let basis = LabelBasis::from_training_labels(label_values, shape.order)?;
        let design = basis.design_matrix(label_values)?;
        info!(
            "training {} pixels on {} objects with {} labels ({} basis terms)",
            shape.npixels, shape.nobjects, shape.nlabels, shape.nbasis
        );

        let mut arena = PixelArena::nan(&shape);
        let mut outcomes: Array1<Option<Result<PixelStatus, CannonError>>> =
            Array1::from_elem(shape.npixels, None);
        let stop = AtomicBool::new(false);

        let fit = |pixel: usize,
                   mut coefficients: ArrayViewMut1<f64>,
                   mut covariance: ArrayViewMut2<f64>,
                   scatter: &mut f64,
                   mut residuals: ArrayViewMut1<f64>,
                   outcome: &mut Option<Result<PixelStatus, CannonError>>| {
            if self.cancellation.is_cancelled() || stop.load(Ordering::Relaxed) {
                return;
            }
            let result = self.fit_pixel(
                pixel,
                fluxes.column(pixel),
                inverse_variances.column(pixel),
                design.view(),
            );
            *outcome = Some(match result {
                Ok(model) => {
                    coefficients.assign(&model.coefficients);
                    covariance.assign(&model.covariance);
                    *scatter = model.scatter;
                    residuals.assign(&model.residuals);
                    Ok(model.status)
                }
                Err(CannonError::SingularFit { scatter: at, .. })
                    if self.config.singular_policy == SingularFitPolicy::MaskPixel =>
                {
                    warn!("pixel {pixel} is singular at scatter {at}, masking it");
                    Ok(PixelStatus::Singular { scatter: at })
                }
                Err(err) => {
                    stop.store(true, Ordering::Relaxed);
                    Err(err)
                }
            });
        };

        let zip = Zip::indexed(arena.coefficients.rows_mut())
            .and(arena.covariances.outer_iter_mut())
            .and(&mut arena.scatters)
            .and(arena.residuals.columns_mut())
            .and(&mut outcomes);
        if self.config.parallel {
            zip.par_for_each(fit);
        } else {
            zip.for_each(fit);
        }

        if self.cancellation.is_cancelled() {
            info!("training cancelled");
            return Err(CannonError::Cancelled);
        }
        if let Some(err) = outcomes
            .iter()
            .find_map(|outcome| outcome.as_ref().and_then(|result| result.as_ref().err()))
        {
            error!("training aborted: {err}");
            return Err(err.clone());
        }
        let status = outcomes
            .iter()
            .map(|outcome| match outcome {
                Some(Ok(status)) => Some(*status),
                _ => None,
            })
            .collect::<Option<Array1<_>>>()
            .ok_or(CannonError::Cancelled)?;

        let model = TrainedModel::from_arena(
            shape,
            basis,
            wavelengths.to_owned(),
            design,
            arena,
            status,
        );
        info!(
            "training done, {} of {} pixels went through a fallback",
            model.fallback_pixels().len(),
            shape.npixels
        );
        Ok(model)
    }
}
