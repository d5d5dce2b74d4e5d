use thiserror::Error;

/// The error type for U²-Net model construction and execution.
#[derive(Error, Debug)]
pub enum U2NetError {
    /// The configuration is logically inconsistent and no module can be built from it.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// An input tensor does not have the shape the network expects.
    #[error("Invalid input tensor shape: expected {expected}, got {actual}")]
    InvalidTensorShape {
        /// The expected tensor shape.
        expected: String,
        /// The actual tensor shape.
        actual: String,
    },
}

/// A specialized `Result` type for U²-Net operations.
pub type U2NetResult<T> = Result<T, U2NetError>;
