#![doc = include_str!("../README.md")]


mod array_stats;

mod config;
pub use config::{
    MAX_GRID_NODES, PolynomialOrder, ScatterGrid, SingularFitPolicy, TrainerConfig,
    ZERO_IVAR_VARIANCE,
};

mod error;
pub use error::CannonError;

mod label_basis;
pub use label_basis::{LabelBasis, ModelShape};

mod model;
pub use model::{PixelModel, PixelStatus, TrainedModel};

mod regression;
pub use regression::{FixedScatterFit, PixelRegression};

mod scatter;
pub use scatter::{ScatterOptimizer, ScatterOptimum, ScatterProfile, ScatterSearchOutcome};

mod trainer;
pub use trainer::{CancellationToken, ModelTrainer};

pub use ndarray;
