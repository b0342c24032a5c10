use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Label ranges resembling (Teff, log g, [Fe/H]), further labels are abundance-like
const LABEL_RANGES: [(f64, f64); 3] = [(4000.0, 5500.0), (1.0, 3.5), (-1.0, 0.3)];
const EXTRA_LABEL_RANGE: (f64, f64) = (-0.2, 0.4);

/// Inverse variance used for noiseless sets
pub const NOISELESS_IVAR: f64 = 1e12;

/// Parameters of a [SyntheticTrainingSet]
#[derive(Clone, Debug)]
pub struct SyntheticSpec {
    pub nobjects: usize,
    pub nlabels: usize,
    pub npixels: usize,
    /// Measurement noise, reported through the inverse variances
    pub noise_sigma: f64,
    /// Unreported Gaussian scatter added on top of the noise
    pub scatter: f64,
    /// Draw second-order coefficients, otherwise fluxes are linear in labels
    pub quadratic: bool,
    pub seed: u64,
}

impl SyntheticSpec {
    pub fn new(nobjects: usize, nlabels: usize, npixels: usize) -> Self {
        Self {
            nobjects,
            nlabels,
            npixels,
            noise_sigma: 0.01,
            scatter: 0.0,
            quadratic: true,
            seed: 0,
        }
    }

    pub fn noise(mut self, noise_sigma: f64) -> Self {
        self.noise_sigma = noise_sigma;
        self
    }

    pub fn scatter(mut self, scatter: f64) -> Self {
        self.scatter = scatter;
        self
    }

    pub fn linear(mut self) -> Self {
        self.quadratic = false;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn generate(&self) -> SyntheticTrainingSet {
        SyntheticTrainingSet::generate(self)
    }
}

/// Continuum-normalised fake spectra drawn from a known quadratic-in-labels model
///
/// `coefficients` follow the basis layout: bias, centred labels, then `x_i x_j` for `i <= j`,
/// with labels centred on their sample means.
#[derive(Clone, Debug)]
pub struct SyntheticTrainingSet {
    /// `nobjects x nlabels`
    pub labels: Array2<f64>,
    pub wavelengths: Array1<f64>,
    /// `nobjects x npixels`
    pub fluxes: Array2<f64>,
    /// `nobjects x npixels`
    pub inverse_variances: Array2<f64>,
    /// `npixels x nbasis`
    pub coefficients: Array2<f64>,
}

fn label_range(i: usize) -> (f64, f64) {
    LABEL_RANGES.get(i).copied().unwrap_or(EXTRA_LABEL_RANGE)
}

fn basis_row(centred: &[f64], quadratic: bool) -> Vec<f64> {
    let mut row = Vec::with_capacity(1 + centred.len() * (centred.len() + 3) / 2);
    row.push(1.0);
    row.extend_from_slice(centred);
    if quadratic {
        for i in 0..centred.len() {
            for j in i..centred.len() {
                row.push(centred[i] * centred[j]);
            }
        }
    }
    row
}

impl SyntheticTrainingSet {
    fn generate(spec: &SyntheticSpec) -> Self {
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let nlabels = spec.nlabels;

        let labels = Array2::from_shape_fn((spec.nobjects, nlabels), |(_, j)| {
            let (lo, hi) = label_range(j);
            rng.random_range(lo..hi)
        });
        let pivots = labels
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(nlabels));
        let half_ranges: Vec<f64> = (0..nlabels)
            .map(|j| {
                let (lo, hi) = label_range(j);
                0.5 * (hi - lo)
            })
            .collect();

        // second-order coefficients are always drawn so that the linear and quadratic sets share
        // their first-order part for the same seed
        let first_order = basis_row(&half_ranges, false);
        let second_order = basis_row(&half_ranges, true);
        let coefficients = Array2::from_shape_fn((spec.npixels, second_order.len()), |(_, k)| {
            let z: f64 = rng.sample(StandardNormal);
            if k == 0 {
                0.8 + 0.1 * z
            } else if k < first_order.len() {
                0.05 * z / second_order[k]
            } else {
                0.02 * z / second_order[k]
            }
        });
        let coefficients = if spec.quadratic {
            coefficients
        } else {
            coefficients
                .slice(ndarray::s![.., ..first_order.len()])
                .to_owned()
        };

        let ivar = if spec.noise_sigma > 0.0 {
            spec.noise_sigma.powi(-2)
        } else {
            NOISELESS_IVAR
        };
        let inverse_variances = Array2::from_elem((spec.nobjects, spec.npixels), ivar);

        let mut fluxes = Array2::zeros((spec.nobjects, spec.npixels));
        for (object_labels, mut object_fluxes) in labels.rows().into_iter().zip(fluxes.rows_mut()) {
            let centred: Vec<f64> = object_labels
                .iter()
                .zip(&pivots)
                .map(|(x, p)| x - p)
                .collect();
            let row = Array1::from(basis_row(&centred, spec.quadratic));
            for (flux, pixel_coefficients) in object_fluxes.iter_mut().zip(coefficients.rows()) {
                let scatter: f64 = rng.sample(StandardNormal);
                let noise: f64 = rng.sample(StandardNormal);
                *flux = pixel_coefficients.dot(&row)
                    + spec.scatter * scatter
                    + spec.noise_sigma * noise;
            }
        }

        let wavelengths = Array1::linspace(15100.0, 16900.0, spec.npixels);

        Self {
            labels,
            wavelengths,
            fluxes,
            inverse_variances,
            coefficients,
        }
    }

    pub fn nbasis(&self) -> usize {
        self.coefficients.ncols()
    }
}
