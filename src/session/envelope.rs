//! Sign-then-encrypt envelopes
//!
//! Outbound: payload bytes are signed with the sender's identity, wrapped
//! together with the algorithm id and signature, and the wrapper is encrypted
//! under the session's symmetric key.
//!
//! Inbound: decrypt, unwrap, then verify against the peer's public key.
//! Decryption failure is a hard error; a bad signature is reported
//! separately so the caller can drop the message and keep the session.

use std::sync::Arc;

use crate::crypto::identity::SIGNATURE_SIZE;
use crate::crypto::{
    Cipher, CryptoError, CryptoResult, Identity, PublicKey, SignatureAlgorithm, SignatureBytes,
    SymmetricKey,
};
use crate::transport::frame::{read_vec32, write_vec32};
use crate::transport::{Frame, SecureEnvelope, TransportError};

use super::payload::Payload;

/// A payload plus the signature over its encoded bytes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedPayload {
    algorithm: SignatureAlgorithm,
    message: Vec<u8>,
    signature: SignatureBytes,
}

impl SignedPayload {
    /// Sign a payload's encoded bytes with `identity`
    ///
    /// Fails with `MalformedEnvelope` when the payload cannot be encoded.
    pub fn sign(identity: &Identity, payload: &Payload) -> CryptoResult<Self> {
        let message = payload.to_bytes().map_err(malformed)?;
        let signature = identity.sign(&message);
        Ok(SignedPayload {
            algorithm: identity.signature_algorithm(),
            message,
            signature,
        })
    }

    /// Algorithm the signature claims
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Encoded payload bytes exactly as signed
    pub fn message_bytes(&self) -> &[u8] {
        &self.message
    }

    /// Signature over [`Self::message_bytes`]
    pub fn signature(&self) -> &SignatureBytes {
        &self.signature
    }

    /// Decode the inner payload
    pub fn payload(&self) -> CryptoResult<Payload> {
        Payload::from_bytes(&self.message).map_err(malformed)
    }

    fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        let mut bytes = Vec::with_capacity(1 + 4 + self.message.len() + SIGNATURE_SIZE);
        bytes.push(self.algorithm.id());
        write_vec32(&mut bytes, &self.message).map_err(malformed)?;
        bytes.extend_from_slice(self.signature.as_bytes());
        Ok(bytes)
    }

    fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let (alg, rest) = bytes
            .split_first()
            .ok_or_else(|| CryptoError::MalformedEnvelope("empty wrapper".to_string()))?;
        let algorithm = SignatureAlgorithm::from_id(*alg).ok_or_else(|| {
            CryptoError::MalformedEnvelope(format!("unknown signature algorithm {}", alg))
        })?;
        let (message, rest) = read_vec32(rest).map_err(malformed)?;
        if rest.len() != SIGNATURE_SIZE {
            return Err(CryptoError::MalformedEnvelope(format!(
                "signature is {} bytes",
                rest.len()
            )));
        }

        Ok(SignedPayload {
            algorithm,
            message,
            signature: SignatureBytes::from_bytes(rest)?,
        })
    }
}

fn malformed(e: TransportError) -> CryptoError {
    CryptoError::MalformedEnvelope(e.to_string())
}

/// Outcome of opening an envelope that decrypted cleanly
#[derive(Debug)]
pub enum Opened {
    /// Signature checks out against the peer's key
    Verified(SignedPayload),
    /// Decrypted, but the signature does not match the peer's key
    BadSignature(SignedPayload),
}

/// Outbound half of the envelope codec
pub struct EnvelopeSealer {
    identity: Arc<Identity>,
    key: SymmetricKey,
}

impl EnvelopeSealer {
    /// Sealer signing with `identity` and encrypting under `key`
    pub fn new(identity: Arc<Identity>, key: SymmetricKey) -> Self {
        EnvelopeSealer { identity, key }
    }

    /// Sign a payload without encrypting it
    pub fn sign(&self, payload: &Payload) -> CryptoResult<SignedPayload> {
        SignedPayload::sign(&self.identity, payload)
    }

    /// Encrypt an already signed wrapper under this sealer's key
    pub fn encrypt(&self, signed: &SignedPayload) -> CryptoResult<SecureEnvelope> {
        let ciphertext = Cipher::encrypt(self.key.as_bytes(), &signed.to_bytes()?)?;
        Ok(SecureEnvelope { ciphertext })
    }

    /// Sign and encrypt
    pub fn seal(&self, payload: &Payload) -> CryptoResult<SecureEnvelope> {
        self.encrypt(&self.sign(payload)?)
    }

    /// Sign and encrypt, ready to hand to a writer
    pub fn seal_frame(&self, payload: &Payload) -> CryptoResult<Frame> {
        self.seal(payload).map(Frame::SecureEnvelope)
    }

    /// Whether both sealers encrypt under the same key, so one envelope
    /// serves both
    pub fn shares_key_with(&self, other: &EnvelopeSealer) -> bool {
        self.key == other.key
    }
}

impl std::fmt::Debug for EnvelopeSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeSealer")
            .field("signer", self.identity.public_key())
            .finish_non_exhaustive()
    }
}

/// Inbound half of the envelope codec, bound to one peer
pub struct EnvelopeOpener {
    peer: PublicKey,
    key: SymmetricKey,
}

impl EnvelopeOpener {
    /// Opener decrypting with `key` and verifying against `peer`
    pub fn new(peer: PublicKey, key: SymmetricKey) -> Self {
        EnvelopeOpener { peer, key }
    }

    /// Public key signatures are checked against
    pub fn peer(&self) -> &PublicKey {
        &self.peer
    }

    /// Decrypt and unwrap without checking the signature
    pub fn unseal(&self, envelope: &SecureEnvelope) -> CryptoResult<SignedPayload> {
        let plaintext = Cipher::decrypt(self.key.as_bytes(), &envelope.ciphertext)?;
        SignedPayload::from_bytes(&plaintext)
    }

    /// Check a wrapper's signature against the peer's key
    pub fn verify(&self, signed: &SignedPayload) -> bool {
        match signed.algorithm {
            SignatureAlgorithm::Ed25519 => self
                .peer
                .verify(&signed.message, &signed.signature)
                .is_ok(),
        }
    }

    /// Unseal and verify in one step
    pub fn open(&self, envelope: &SecureEnvelope) -> CryptoResult<Opened> {
        let signed = self.unseal(envelope)?;
        if self.verify(&signed) {
            Ok(Opened::Verified(signed))
        } else {
            Ok(Opened::BadSignature(signed))
        }
    }
}

impl std::fmt::Debug for EnvelopeOpener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeOpener")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::payload::ChatMessage;

    fn pair() -> (EnvelopeSealer, EnvelopeOpener) {
        let identity = Arc::new(Identity::generate());
        let key = SymmetricKey::generate();
        let opener = EnvelopeOpener::new(*identity.public_key(), key.clone());
        (EnvelopeSealer::new(identity, key), opener)
    }

    #[test]
    fn test_seal_unseal_preserves_encoding() {
        let (sealer, opener) = pair();
        let payload = Payload::Chat(ChatMessage::from_user("alice", "hi"));

        let envelope = sealer.seal(&payload).unwrap();
        let signed = opener.unseal(&envelope).unwrap();

        assert_eq!(signed.message_bytes(), payload.to_bytes().unwrap().as_slice());
        assert!(opener.verify(&signed));
        assert_eq!(signed.payload().unwrap(), payload);
    }

    #[test]
    fn test_wrong_signer_detected() {
        let (_, opener) = pair();
        let impostor = EnvelopeSealer::new(
            Arc::new(Identity::generate()),
            opener.key.clone(),
        );

        let envelope = impostor
            .seal(&Payload::Chat(ChatMessage::from_user("bob", "hi")))
            .unwrap();

        match opener.open(&envelope).unwrap() {
            Opened::BadSignature(signed) => assert!(!opener.verify(&signed)),
            Opened::Verified(_) => panic!("Impostor signature accepted"),
        }
    }

    #[test]
    fn test_wrong_key_fails_to_decrypt() {
        let (sealer, _) = pair();
        let (_, other) = pair();

        let envelope = sealer.seal(&Payload::Disconnect).unwrap();
        assert_eq!(
            other.unseal(&envelope).unwrap_err(),
            CryptoError::DecryptionFailed
        );
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let (sealer, opener) = pair();
        let payload = Payload::Chat(ChatMessage::from_user("alice", "hi"));
        let envelope = sealer.seal(&payload).unwrap();

        for bit in 0..envelope.ciphertext.len() * 8 {
            let mut tampered = envelope.clone();
            tampered.ciphertext[bit / 8] ^= 1 << (bit % 8);

            match opener.open(&tampered) {
                Err(_) | Ok(Opened::BadSignature(_)) => {}
                Ok(Opened::Verified(signed)) => {
                    panic!("bit {} flipped yet verified as {:?}", bit, signed.payload())
                }
            }
        }
    }

    #[test]
    fn test_unencodable_payload_cannot_be_sealed() {
        let (sealer, _) = pair();
        let payload = Payload::Chat(ChatMessage::from_user("a".repeat(70_000), "hi"));

        assert!(matches!(
            sealer.seal(&payload),
            Err(CryptoError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_garbage_plaintext_is_malformed() {
        let (_, opener) = pair();
        let ciphertext = Cipher::encrypt(opener.key.as_bytes(), &[9, 9, 9]).unwrap();

        let err = opener.unseal(&SecureEnvelope { ciphertext }).unwrap_err();
        assert!(matches!(err, CryptoError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_shared_key_detection() {
        let identity = Arc::new(Identity::generate());
        let key = SymmetricKey::generate();
        let a = EnvelopeSealer::new(identity.clone(), key.clone());
        let b = EnvelopeSealer::new(identity.clone(), key);
        let c = EnvelopeSealer::new(identity, SymmetricKey::generate());

        assert!(a.shares_key_with(&b));
        assert!(!a.shares_key_with(&c));
    }
}
