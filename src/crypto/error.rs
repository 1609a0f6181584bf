//! Cryptographic error types

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Encoded key material could not be decoded (bad base64, wrong version,
    /// truncated bytes or an invalid curve point)
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// The provided key has an invalid length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },

    /// Signature verification failed - the signature is invalid
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// Encryption operation failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed - authentication tag mismatch (possibly tampered data)
    #[error("Decryption failed: authentication tag mismatch")]
    DecryptionFailed,

    /// Decrypted bytes are not a well-formed signed wrapper
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
}

impl CryptoError {
    /// Whether this error came from decoding key material rather than from
    /// an encrypt/decrypt operation
    pub fn is_key_format(&self) -> bool {
        matches!(
            self,
            CryptoError::InvalidKeyFormat(_) | CryptoError::InvalidKeyLength { .. }
        )
    }
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
