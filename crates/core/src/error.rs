use thiserror::Error;

pub type BanditResult<T> = Result<T, BanditError>;

#[derive(Error, Debug)]
pub enum BanditError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Action {action} out of range for {nr_actions} actions")]
    ActionOutOfRange { action: usize, nr_actions: usize },

    #[error("only 'mean' and 'no' are valid for 'reduce', but '{0}' is given")]
    InvalidReduce(String),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BanditError {
    /// Fails with [`BanditError::DimensionMismatch`] unless `got == expected`.
    pub fn check_dims(expected: usize, got: usize) -> BanditResult<()> {
        if expected == got {
            Ok(())
        } else {
            Err(BanditError::DimensionMismatch { expected, got })
        }
    }
}

impl From<config::ConfigError> for BanditError {
    fn from(err: config::ConfigError) -> Self {
        BanditError::Config(err.to_string())
    }
}
