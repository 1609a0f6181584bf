//! BLAKE3 Hashing and Key Derivation

/// Size of a hash output in bytes
pub const HASH_SIZE: usize = 32;

/// A hash output
pub type HashOutput = [u8; HASH_SIZE];

/// Bytes of the hash shown in a fingerprint
const FINGERPRINT_LEN: usize = 8;

/// Hashing and key derivation operations
pub struct Hash;

impl Hash {
    /// Compute hash of data
    pub fn hash(data: &[u8]) -> HashOutput {
        blake3::hash(data).into()
    }

    /// Derive a key from key material and a context string
    ///
    /// The context should be a unique string identifying the purpose
    /// of the derived key (e.g., "sealed-chat key transport v1")
    pub fn derive_key(context: &str, material: &[u8]) -> [u8; 32] {
        blake3::derive_key(context, material)
    }

    /// Short hex digest for log lines, never for comparisons
    pub fn fingerprint(data: &[u8]) -> String {
        hex::encode(&Self::hash(data)[..FINGERPRINT_LEN])
    }
}
