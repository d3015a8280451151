//! Black-box hyperparameter search over structured spaces.

pub mod cma_es;
pub mod fit;
pub mod space;

pub use cma_es::CmaEs;
pub use fit::{fit, CancelToken, FitOptions, FitReport, TraceEntry};
pub use space::{Constraint, ParamRange, SearchLeaf, SearchSpace};
