use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used across the model, loss and training modules.
pub type Result<T> = std::result::Result<T, MlErr>;

/// Errors produced while building or running a model.
#[derive(Debug)]
pub enum MlErr {
    /// An input is invalid for semantic or domain reasons.
    InvalidInput(&'static str),

    /// Two lengths that must agree do not.
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },

    /// A tensor arrived with the wrong number of axes.
    RankMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "size mismatch for {what}: got {got}, expected {expected}"),
            MlErr::RankMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "rank mismatch for {what}: got a rank-{got} tensor, expected rank {expected}"
            ),
        }
    }
}

impl Error for MlErr {}
