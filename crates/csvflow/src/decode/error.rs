use thiserror::Error;

/// Errors raised while turning uploaded bytes into [`Record`](super::Record)s.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("File is not valid {encoding}: {reason}")]
    Encoding {
        encoding: &'static str,
        reason: String,
    },

    #[error("Missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("Row {row}: missing value for column '{column}'")]
    MissingField { row: usize, column: &'static str },

    #[error("Row {row}: age '{value}' is not an integer")]
    InvalidAge { row: usize, value: String },

    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),
}
