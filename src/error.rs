use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpsError {
    #[error("data insufficiency: need {needed} rows of history, window has {available}")]
    DataInsufficiency { needed: usize, available: usize },

    #[error("config error: {0}")]
    Config(String),

    #[error("shape error: {0}")]
    Shape(String),

    #[error("environment error: {0}")]
    Environment(String),

    #[error("numerical error: {0}")]
    Numerical(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OpsError {
    pub fn is_data_insufficiency(&self) -> bool {
        matches!(self, Self::DataInsufficiency { .. })
    }
}

pub type Result<T> = std::result::Result<T, OpsError>;
