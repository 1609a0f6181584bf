//! Asymmetric identity: an Ed25519 signing key paired with an X25519
//! encryption key.
//!
//! A peer's public half travels during the handshake as base64 of the
//! encoded form `version || ed25519_verifying_key || x25519_public`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use super::error::{CryptoError, CryptoResult};
use super::hash::Hash;

/// Size of each raw key (signing or encryption) in bytes
pub const KEY_SIZE: usize = 32;

/// Size of a signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Version byte leading the encoded public key
pub const PUBLIC_KEY_VERSION: u8 = 0x01;

/// Length of the encoded public key: version + verifying key + exchange key
pub const ENCODED_PUBLIC_KEY_SIZE: usize = 1 + KEY_SIZE + KEY_SIZE;

/// Signature algorithm used to sign envelopes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    /// Ed25519 (RFC 8032)
    Ed25519,
}

impl SignatureAlgorithm {
    /// Identifier carried on the wire
    pub fn id(self) -> u8 {
        match self {
            SignatureAlgorithm::Ed25519 => 1,
        }
    }

    /// Look up an algorithm by its wire identifier
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(SignatureAlgorithm::Ed25519),
            _ => None,
        }
    }
}

/// The public half of an [`Identity`]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey {
    verifying: [u8; KEY_SIZE],
    exchange: [u8; KEY_SIZE],
}

impl PublicKey {
    /// Ed25519 verifying key bytes
    pub fn verifying_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.verifying
    }

    /// X25519 public key bytes, used to encrypt data for this key's owner
    pub fn exchange_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.exchange
    }

    /// Standard encoded form: `version || verifying || exchange`
    pub fn to_bytes(&self) -> [u8; ENCODED_PUBLIC_KEY_SIZE] {
        let mut bytes = [0u8; ENCODED_PUBLIC_KEY_SIZE];
        bytes[0] = PUBLIC_KEY_VERSION;
        bytes[1..1 + KEY_SIZE].copy_from_slice(&self.verifying);
        bytes[1 + KEY_SIZE..].copy_from_slice(&self.exchange);
        bytes
    }

    /// Parse the standard encoded form
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != ENCODED_PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: ENCODED_PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes[0] != PUBLIC_KEY_VERSION {
            return Err(CryptoError::InvalidKeyFormat(format!(
                "unknown public key version {:#04x}",
                bytes[0]
            )));
        }

        let mut verifying = [0u8; KEY_SIZE];
        verifying.copy_from_slice(&bytes[1..1 + KEY_SIZE]);
        let mut exchange = [0u8; KEY_SIZE];
        exchange.copy_from_slice(&bytes[1 + KEY_SIZE..]);

        // Reject verifying keys that are not valid curve points up front so a
        // bad advertisement fails the handshake instead of every later verify.
        VerifyingKey::from_bytes(&verifying)
            .map_err(|_| CryptoError::InvalidKeyFormat("invalid Ed25519 point".to_string()))?;

        Ok(PublicKey {
            verifying,
            exchange,
        })
    }

    /// Deterministic base64 of the encoded form
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Decode a base64 public key as sent in a key advertisement
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Short hex fingerprint for logs
    pub fn fingerprint(&self) -> String {
        Hash::fingerprint(&self.to_bytes())
    }

    /// Verify an Ed25519 signature made by this key's owner
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> CryptoResult<()> {
        let verifying_key = VerifyingKey::from_bytes(&self.verifying)
            .map_err(|_| CryptoError::InvalidKeyFormat("invalid Ed25519 point".to_string()))?;

        let sig = Signature::from_bytes(&signature.0);

        verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({}...)", self.fingerprint())
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

/// A signature produced by an identity
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignatureBytes(pub [u8; SIGNATURE_SIZE]);

impl SignatureBytes {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: SIGNATURE_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; SIGNATURE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(SignatureBytes(arr))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}...)", &hex::encode(self.0)[..16])
    }
}

/// A cryptographic identity: signing and encryption keypairs plus the
/// signature algorithm they are used with
///
/// Secret keys are zeroized when dropped.
#[derive(ZeroizeOnDrop)]
pub struct Identity {
    #[zeroize(skip)]
    public_key: PublicKey,
    #[zeroize(skip)]
    algorithm: SignatureAlgorithm,
    signing_secret: [u8; KEY_SIZE],
    exchange_secret: [u8; KEY_SIZE],
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let exchange_secret = StaticSecret::random_from_rng(OsRng);
        let exchange_public = X25519Public::from(&exchange_secret);

        Identity {
            public_key: PublicKey {
                verifying: signing_key.verifying_key().to_bytes(),
                exchange: exchange_public.to_bytes(),
            },
            algorithm: SignatureAlgorithm::Ed25519,
            signing_secret: signing_key.to_bytes(),
            exchange_secret: exchange_secret.to_bytes(),
        }
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Algorithm this identity signs with
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Base64 of the encoded public key, as advertised during the handshake
    pub fn encode_public_key(&self) -> String {
        self.public_key.to_base64()
    }

    /// X25519 secret used to open data sealed to this identity
    pub(crate) fn exchange_secret(&self) -> StaticSecret {
        StaticSecret::from(self.exchange_secret)
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        let signing_key = SigningKey::from_bytes(&self.signing_secret);
        let signature = signing_key.sign(message);
        SignatureBytes(signature.to_bytes())
    }

    /// Verify a signature (convenience method)
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> CryptoResult<()> {
        self.public_key.verify(message, signature)
    }
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Identity {
            public_key: self.public_key,
            algorithm: self.algorithm,
            signing_secret: self.signing_secret,
            exchange_secret: self.exchange_secret,
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}
