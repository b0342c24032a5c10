/// Error returned from [crate::ModelTrainer] and the per-pixel fitting routines
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum CannonError {
    #[error("{what} has length {actual}, but {expected} is expected")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{objects} training objects cannot constrain {basis} basis coefficients")]
    TooFewObjects { objects: usize, basis: usize },

    #[error("{pixels} pixels leave no degrees of freedom for {labels} labels")]
    TooFewPixels { pixels: usize, labels: usize },

    #[error("{what} has a non-finite value at [{row}, {column}]")]
    NonFiniteInput {
        what: &'static str,
        row: usize,
        column: usize,
    },

    #[error("invalid scatter grid: {0}")]
    InvalidScatterGrid(&'static str),

    #[error("weighted normal equations are singular for pixel {pixel} at scatter {scatter}")]
    SingularFit { pixel: usize, scatter: f64 },

    #[error("training was cancelled")]
    Cancelled,
}

impl CannonError {
    pub(crate) fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::DimensionMismatch {
                what,
                expected,
                actual,
            })
        }
    }
}
