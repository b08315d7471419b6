use thiserror::Error;

/// Errors produced by constructors, setters, and call-time validation
/// throughout the simulation engine.
///
/// Invariants are checked eagerly, at the point where a bad value enters the
/// system; nothing here is recovered silently.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// A construction or call-time invariant was violated: a negative rate,
    /// a quantum efficiency outside `[0, 1]`, inverted limits, a mismatched
    /// array shape, negative photons handed to a detector, and so on.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// `Simulator::reset` was called on a simulator built without a
    /// snapshot (`backup == false`).
    #[error("state invalidated: {message}")]
    StateInvalidated { message: String },
}

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn state_invalidated(message: impl Into<String>) -> Self {
        Error::StateInvalidated {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
