//! Cryptographic primitives for the chat protocol
//!
//! This module provides all the cryptographic building blocks:
//! - `identity`: Ed25519 signing + X25519 encryption keypairs
//! - `exchange`: encrypting a secret to a peer's public key
//! - `cipher`: ChaCha20-Poly1305 AEAD and the shared symmetric key
//! - `hash`: BLAKE3 hashing and key derivation

pub mod cipher;
pub mod error;
pub mod exchange;
pub mod hash;
pub mod identity;

// Re-export commonly used types
pub use cipher::{Cipher, SymmetricKey};
pub use error::{CryptoError, CryptoResult};
pub use exchange::{open_with, seal_to};
pub use hash::Hash;
pub use identity::{Identity, PublicKey, SignatureAlgorithm, SignatureBytes};

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn test_key_transport_then_encryption() {
        // Server holds the room key, client proves nothing but its public key
        let server_key = SymmetricKey::generate();
        let client = Identity::generate();

        let transported = seal_to(client.public_key(), server_key.as_bytes()).unwrap();
        let recovered =
            SymmetricKey::from_bytes(&open_with(&client, &transported).unwrap()).unwrap();
        assert_eq!(recovered, server_key);

        let ciphertext = Cipher::encrypt(server_key.as_bytes(), b"hi").unwrap();
        let plaintext = Cipher::decrypt(recovered.as_bytes(), &ciphertext).unwrap();
        assert_eq!(plaintext, b"hi");
    }

    #[test]
    fn test_identity_and_signature_flow() {
        let alice = Identity::generate();
        let advertised = PublicKey::from_base64(&alice.encode_public_key()).unwrap();

        let signature = alice.sign(b"alice: hi");
        assert!(advertised.verify(b"alice: hi", &signature).is_ok());
        assert!(advertised.verify(b"alice: bye", &signature).is_err());
    }
}
