pub mod backtest;
pub mod config;
pub mod error;
pub mod indicator;
pub mod math;
pub mod model;
pub mod optimize;
pub mod strategy;
