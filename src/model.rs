use crate::error::CannonError;
use crate::label_basis::{LabelBasis, ModelShape};
use crate::regression::FixedScatterFit;
use crate::scatter::{ScatterOptimum, ScatterSearchOutcome};

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, Zip};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How a pixel's model was obtained
///
/// Everything except [PixelStatus::Refined] is a recovery path, [PixelStatus::Singular] pixels
/// are NaN-filled.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub enum PixelStatus {
    Refined,
    LowerBoundary,
    UpperBoundary,
    NonFiniteObjective,
    Singular { scatter: f64 },
}

impl PixelStatus {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Singular { .. })
    }

    pub fn is_fallback(&self) -> bool {
        !matches!(self, Self::Refined)
    }
}

impl From<ScatterSearchOutcome> for PixelStatus {
    fn from(outcome: ScatterSearchOutcome) -> Self {
        match outcome {
            ScatterSearchOutcome::Refined => Self::Refined,
            ScatterSearchOutcome::LowerBoundary => Self::LowerBoundary,
            ScatterSearchOutcome::UpperBoundary => Self::UpperBoundary,
            ScatterSearchOutcome::NonFiniteObjective => Self::NonFiniteObjective,
        }
    }
}

/// Final model of a single pixel
#[derive(Clone, Debug, PartialEq)]
pub struct PixelModel {
    pub coefficients: Array1<f64>,
    pub covariance: Array2<f64>,
    pub scatter: f64,
    /// Noise-normalised residuals at `scatter`
    pub residuals: Array1<f64>,
    pub status: PixelStatus,
}

impl From<ScatterOptimum<FixedScatterFit>> for PixelModel {
    fn from(optimum: ScatterOptimum<FixedScatterFit>) -> Self {
        let ScatterOptimum {
            fit,
            scatter,
            outcome,
        } = optimum;
        Self {
            coefficients: fit.coefficients,
            covariance: fit.covariance,
            scatter,
            residuals: fit.residuals,
            status: outcome.into(),
        }
    }
}

/// Trained spectral model: per-pixel coefficients, covariances and scatters on a shared basis
///
/// Pixel-indexed arrays have the pixel axis first, object-indexed arrays have the object axis
/// first.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrainedModel {
    shape: ModelShape,
    basis: LabelBasis,
    wavelengths: Array1<f64>,
    design: Array2<f64>,
    coefficients: Array2<f64>,
    covariances: Array3<f64>,
    scatters: Array1<f64>,
    residuals: Array2<f64>,
    status: Array1<PixelStatus>,
    pixel_chi2: Array1<f64>,
    object_reduced_chi2: Array1<f64>,
}

/// Per-pixel arrays filled by the trainer, `residuals` is `nobjects x npixels`
pub(crate) struct PixelArena {
    pub coefficients: Array2<f64>,
    pub covariances: Array3<f64>,
    pub scatters: Array1<f64>,
    pub residuals: Array2<f64>,
}

impl PixelArena {
    pub fn nan(shape: &ModelShape) -> Self {
        Self {
            coefficients: Array2::from_elem((shape.npixels, shape.nbasis), f64::NAN),
            covariances: Array3::from_elem((shape.npixels, shape.nbasis, shape.nbasis), f64::NAN),
            scatters: Array1::from_elem(shape.npixels, f64::NAN),
            residuals: Array2::from_elem((shape.nobjects, shape.npixels), f64::NAN),
        }
    }
}

impl TrainedModel {
    pub(crate) fn from_arena(
        shape: ModelShape,
        basis: LabelBasis,
        wavelengths: Array1<f64>,
        design: Array2<f64>,
        arena: PixelArena,
        status: Array1<PixelStatus>,
    ) -> Self {
        let PixelArena {
            coefficients,
            covariances,
            scatters,
            residuals,
        } = arena;

        let pixel_chi2 = residuals.map_axis(Axis(0), |column| column.dot(&column));

        // masked pixels and pixels with non-finite residuals are left out of the object sums
        let counted = Zip::from(&status)
            .and(&pixel_chi2)
            .map_collect(|s, chi2| s.is_valid() && chi2.is_finite());
        let counted_pixels = counted.iter().filter(|&&c| c).count();
        let dof = counted_pixels as f64 - shape.nlabels as f64;
        let object_reduced_chi2 = residuals.map_axis(Axis(1), |row| {
            let chi2 = Zip::from(&row)
                .and(&counted)
                .fold(0.0, |acc, &r, &c| if c { acc + r * r } else { acc });
            if dof > 0.0 { chi2 / dof } else { f64::NAN }
        });

        Self {
            shape,
            basis,
            wavelengths,
            design,
            coefficients,
            covariances,
            scatters,
            residuals,
            status,
            pixel_chi2,
            object_reduced_chi2,
        }
    }

    pub fn shape(&self) -> &ModelShape {
        &self.shape
    }

    pub fn label_basis(&self) -> &LabelBasis {
        &self.basis
    }

    pub fn pivots(&self) -> ArrayView1<'_, f64> {
        self.basis.pivots()
    }

    pub fn wavelengths(&self) -> ArrayView1<'_, f64> {
        self.wavelengths.view()
    }

    /// Training design matrix, `nobjects x nbasis`
    pub fn design_matrix(&self) -> ArrayView2<'_, f64> {
        self.design.view()
    }

    /// `npixels x nbasis`
    pub fn coefficients(&self) -> ArrayView2<'_, f64> {
        self.coefficients.view()
    }

    /// `npixels x nbasis x nbasis`
    pub fn covariances(&self) -> ArrayView3<'_, f64> {
        self.covariances.view()
    }

    pub fn scatters(&self) -> ArrayView1<'_, f64> {
        self.scatters.view()
    }

    /// Noise-normalised residuals, `nobjects x npixels`
    pub fn residuals(&self) -> ArrayView2<'_, f64> {
        self.residuals.view()
    }

    pub fn status(&self) -> ArrayView1<'_, PixelStatus> {
        self.status.view()
    }

    /// Sum of squared residuals of every pixel
    pub fn pixel_chi2(&self) -> ArrayView1<'_, f64> {
        self.pixel_chi2.view()
    }

    /// Chi-squared of every object over counted pixels, divided by `counted pixels - nlabels`
    ///
    /// A pixel is counted unless it is [PixelStatus::Singular] or its [Self::pixel_chi2] is not
    /// finite, e.g. after a [PixelStatus::NonFiniteObjective] recovery.
    pub fn object_reduced_chi2(&self) -> ArrayView1<'_, f64> {
        self.object_reduced_chi2.view()
    }

    /// Indices of pixels which went through any recovery path
    pub fn fallback_pixels(&self) -> Vec<usize> {
        self.status
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.is_fallback().then_some(i))
            .collect()
    }

    pub fn pixel_model(&self, pixel: usize) -> Option<PixelModel> {
        let status = *self.status.get(pixel)?;
        Some(PixelModel {
            coefficients: self.coefficients.row(pixel).to_owned(),
            covariance: self.covariances.index_axis(Axis(0), pixel).to_owned(),
            scatter: self.scatters[pixel],
            residuals: self.residuals.column(pixel).to_owned(),
            status,
        })
    }

    /// Zeroth-order coefficient of every pixel, the model spectrum at the pivot labels
    pub fn baseline_spectrum(&self) -> ArrayView1<'_, f64> {
        self.coefficients.column(0)
    }

    /// First-order coefficient of `label` for every pixel
    pub fn label_coefficients(&self, label: usize) -> Option<ArrayView1<'_, f64>> {
        (label < self.shape.nlabels).then(|| self.coefficients.column(label + 1))
    }

    /// Model spectrum of an object with the given labels
    pub fn predict_spectrum(&self, labels: ArrayView1<f64>) -> Result<Array1<f64>, CannonError> {
        let row = self.basis.row(labels)?;
        Ok(self.coefficients.dot(&row))
    }

    /// Model spectra, `nobjects x npixels`, for a `nobjects x nlabels` label matrix
    pub fn predict_spectra(&self, labels: ArrayView2<f64>) -> Result<Array2<f64>, CannonError> {
        let design = self.basis.design_matrix(labels)?;
        Ok(design.dot(&self.coefficients.t()))
    }
}
