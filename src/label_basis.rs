use crate::config::PolynomialOrder;
use crate::error::CannonError;

use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis, Zip, s};
use serde::{Deserialize, Serialize};

/// Sizes of a training run, derived once from the inputs and shared by every pixel
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ModelShape {
    pub nobjects: usize,
    pub nlabels: usize,
    pub npixels: usize,
    pub nbasis: usize,
    pub order: PolynomialOrder,
}

impl ModelShape {
    pub fn new(nobjects: usize, nlabels: usize, npixels: usize, order: PolynomialOrder) -> Self {
        Self {
            nobjects,
            nlabels,
            npixels,
            nbasis: order.basis_len(nlabels),
            order,
        }
    }

    /// Degrees of freedom of the per-object chi-squared
    pub fn dof(&self) -> usize {
        self.npixels.saturating_sub(self.nlabels)
    }
}

/// Polynomial basis in mean-centred labels
///
/// A basis row is the bias term, the `nlabels` centred labels and, for the quadratic order, the
/// products `x_i x_j` for `i <= j` in row-major upper-triangle order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LabelBasis {
    pivots: Array1<f64>,
    order: PolynomialOrder,
}

impl LabelBasis {
    /// Basis pivoted on the column means of `labels` (`nobjects x nlabels`)
    pub fn from_training_labels(
        labels: ArrayView2<f64>,
        order: PolynomialOrder,
    ) -> Result<Self, CannonError> {
        let pivots = labels
            .mean_axis(Axis(0))
            .ok_or(CannonError::TooFewObjects {
                objects: 0,
                basis: order.basis_len(labels.ncols()),
            })?;
        Ok(Self { pivots, order })
    }

    pub fn with_pivots(pivots: Array1<f64>, order: PolynomialOrder) -> Self {
        Self { pivots, order }
    }

    pub fn pivots(&self) -> ArrayView1<'_, f64> {
        self.pivots.view()
    }

    pub fn order(&self) -> PolynomialOrder {
        self.order
    }

    pub fn nlabels(&self) -> usize {
        self.pivots.len()
    }

    pub fn len(&self) -> usize {
        self.order.basis_len(self.nlabels())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the basis row of a single object into `row`
    pub fn fill_row(&self, labels: ArrayView1<f64>, mut row: ArrayViewMut1<f64>) {
        debug_assert_eq!(labels.len(), self.nlabels());
        debug_assert_eq!(row.len(), self.len());

        let centred: Array1<f64> = &labels - &self.pivots;
        row[0] = 1.0;
        row.slice_mut(s![1..=self.nlabels()]).assign(&centred);
        if self.order == PolynomialOrder::Quadratic {
            let quadratic = (0..self.nlabels())
                .combinations_with_replacement(2)
                .map(|pair| centred[pair[0]] * centred[pair[1]]);
            for (x, value) in row.iter_mut().skip(1 + self.nlabels()).zip(quadratic) {
                *x = value;
            }
        }
    }

    /// Basis row of a single object
    pub fn row(&self, labels: ArrayView1<f64>) -> Result<Array1<f64>, CannonError> {
        CannonError::check_len("label vector", self.nlabels(), labels.len())?;
        let mut row = Array1::zeros(self.len());
        self.fill_row(labels, row.view_mut());
        Ok(row)
    }

    /// Design matrix `nobjects x nbasis` for the label matrix `nobjects x nlabels`
    pub fn design_matrix(&self, labels: ArrayView2<f64>) -> Result<Array2<f64>, CannonError> {
        CannonError::check_len("label matrix columns", self.nlabels(), labels.ncols())?;
        let mut design = Array2::zeros((labels.nrows(), self.len()));
        Zip::from(labels.rows())
            .and(design.rows_mut())
            .for_each(|labels, row| self.fill_row(labels, row));
        Ok(design)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    #[test]
    fn pivots_are_column_means() {
        let labels = arr2(&[[4000.0, 1.0, -0.5], [5000.0, 2.0, 0.0], [6000.0, 3.0, 0.5]]);
        let basis = LabelBasis::from_training_labels(labels.view(), PolynomialOrder::Quadratic)
            .unwrap();
        assert_abs_diff_eq!(basis.pivots(), arr1(&[5000.0, 2.0, 0.0]).view(), epsilon = 1e-12);
    }

    #[test]
    fn quadratic_row_layout() {
        let basis = LabelBasis::with_pivots(arr1(&[1.0, 2.0]), PolynomialOrder::Quadratic);
        let row = basis.row(arr1(&[3.0, 5.0]).view()).unwrap();
        // centred labels are (2, 3)
        assert_abs_diff_eq!(
            row,
            arr1(&[1.0, 2.0, 3.0, 4.0, 6.0, 9.0]),
            epsilon = 1e-12
        );
    }

    #[test]
    fn linear_row_layout() {
        let basis = LabelBasis::with_pivots(arr1(&[1.0, 2.0, 3.0]), PolynomialOrder::Linear);
        let row = basis.row(arr1(&[0.0, 0.0, 0.0]).view()).unwrap();
        assert_abs_diff_eq!(row, arr1(&[1.0, -1.0, -2.0, -3.0]), epsilon = 1e-12);
    }

    #[test]
    fn design_matrix_rows_match_single_rows() {
        let labels = arr2(&[[1.0, 0.5], [2.0, -0.5], [4.0, 1.5], [0.0, 0.0]]);
        let basis = LabelBasis::from_training_labels(labels.view(), PolynomialOrder::Quadratic)
            .unwrap();
        let design = basis.design_matrix(labels.view()).unwrap();
        assert_eq!(design.dim(), (4, 6));
        for (labels, design_row) in labels.rows().into_iter().zip(design.rows()) {
            assert_abs_diff_eq!(basis.row(labels).unwrap().view(), design_row, epsilon = 1e-12);
        }
        // centred linear columns sum to zero
        for column in 1..3 {
            assert_abs_diff_eq!(design.column(column).sum(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn row_rejects_wrong_label_count() {
        let basis = LabelBasis::with_pivots(arr1(&[1.0, 2.0]), PolynomialOrder::Quadratic);
        assert_eq!(
            basis.row(arr1(&[1.0]).view()),
            Err(CannonError::DimensionMismatch {
                what: "label vector",
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn dof() {
        let shape = ModelShape::new(20, 5, 50, PolynomialOrder::Quadratic);
        assert_eq!(shape.nbasis, 21);
        assert_eq!(shape.dof(), 45);
    }
}
