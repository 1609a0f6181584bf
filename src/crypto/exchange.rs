//! Public-key encryption for key transport
//!
//! Encrypts a small secret (the shared symmetric key) so only the holder
//! of a given [`Identity`]'s X25519 secret can recover it:
//!
//! 1. Generate an ephemeral X25519 keypair
//! 2. ECDH with the recipient's X25519 public key
//! 3. Derive a one-time key with BLAKE3 over `shared || ephemeral || recipient`
//! 4. Encrypt with ChaCha20-Poly1305
//!
//! Output layout: `ephemeral_public (32) || nonce || ciphertext || tag`

use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public};

use super::cipher::{Cipher, NONCE_SIZE, TAG_SIZE};
use super::error::{CryptoError, CryptoResult};
use super::hash::Hash;
use super::identity::{Identity, PublicKey};

/// Size of the ephemeral public key prefix
pub const EPHEMERAL_SIZE: usize = 32;

const KEY_TRANSPORT_CONTEXT: &str = "sealed-chat 2024 key transport v1";

fn transport_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> [u8; 32] {
    let mut material = [0u8; 96];
    material[..32].copy_from_slice(shared);
    material[32..64].copy_from_slice(ephemeral);
    material[64..].copy_from_slice(recipient);
    Hash::derive_key(KEY_TRANSPORT_CONTEXT, &material)
}

/// Encrypt `plaintext` so that only `recipient` can read it
pub fn seal_to(recipient: &PublicKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519Public::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&X25519Public::from(*recipient.exchange_bytes()));

    let key = transport_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        recipient.exchange_bytes(),
    );
    let ciphertext = Cipher::encrypt(&key, plaintext)?;

    let mut result = Vec::with_capacity(EPHEMERAL_SIZE + ciphertext.len());
    result.extend_from_slice(ephemeral_public.as_bytes());
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt data produced by [`seal_to`] with the recipient's identity
pub fn open_with(identity: &Identity, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
    if sealed.len() < EPHEMERAL_SIZE + NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let mut ephemeral = [0u8; EPHEMERAL_SIZE];
    ephemeral.copy_from_slice(&sealed[..EPHEMERAL_SIZE]);

    let shared = identity
        .exchange_secret()
        .diffie_hellman(&X25519Public::from(ephemeral));

    let key = transport_key(
        shared.as_bytes(),
        &ephemeral,
        identity.public_key().exchange_bytes(),
    );
    Cipher::decrypt(&key, &sealed[EPHEMERAL_SIZE..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let recipient = Identity::generate();
        let secret = b"thirty-two bytes of key material";

        let sealed = seal_to(recipient.public_key(), secret).unwrap();
        let opened = open_with(&recipient, &sealed).unwrap();

        assert_eq!(opened, secret);
    }

    #[test]
    fn test_wrong_recipient_fails() {
        let recipient = Identity::generate();
        let eavesdropper = Identity::generate();

        let sealed = seal_to(recipient.public_key(), b"secret").unwrap();
        assert_eq!(
            open_with(&eavesdropper, &sealed),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_each_seal_uses_fresh_ephemeral() {
        let recipient = Identity::generate();

        let a = seal_to(recipient.public_key(), b"secret").unwrap();
        let b = seal_to(recipient.public_key(), b"secret").unwrap();
        assert_ne!(a[..EPHEMERAL_SIZE], b[..EPHEMERAL_SIZE]);
    }

    #[test]
    fn test_truncated_input_fails() {
        let recipient = Identity::generate();
        assert!(open_with(&recipient, &[0u8; 40]).is_err());
    }
}
