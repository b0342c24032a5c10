pub use synthetic::{SyntheticSpec, SyntheticTrainingSet};

mod synthetic;
