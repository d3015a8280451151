pub mod moving_average;
pub mod tsf;

pub use moving_average::{Ewm, Kama, MeanType, Sma};
pub use tsf::tsf;
