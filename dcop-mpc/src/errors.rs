#[derive(thiserror::Error, Debug)]
pub enum DcopMpcError {
    /// Error when creating a field with a modulus that is not an odd prime
    /// below the 31-bit serialization cap.
    #[error("InvalidModulus: {0}")]
    InvalidModulus(String),
    /// Error when trying to find a modular inverse that doesn't exist.
    #[error("NoInverse: {0}")]
    NoInverse(String),
    #[error("DimensionMismatch: {0}")]
    DimensionMismatch(String),
    #[error("InternalError: {0}")]
    InternalError(String),

    #[error("InvalidParameters: {0}")]
    InvalidParameters(String),
    /// A share or reconstructed value left the configured field range.
    #[error("ValueOutOfRange: {0}")]
    ValueOutOfRange(String),

    #[error("Key generation gave up after {0} attempts")]
    KeyGenerationFailed(usize),
    #[error("Ciphertext component is not an element of Z_{{n^2}}")]
    MalformedCiphertext,

    /// A message arrived that the current protocol phase cannot accept.
    #[error("ProtocolViolation: {0}")]
    ProtocolViolation(String),
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Data serialization: {0}")]
    SerializationError(#[from] serde_json::Error),
}
