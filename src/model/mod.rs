pub mod observation;
pub mod params;
pub mod portfolio;

pub use observation::{Observation, ObservationRow};
pub use params::{apply_params, param_set, ParamSet, ParamValue, StrategyConfig};
pub use portfolio::portfolio_vector;
