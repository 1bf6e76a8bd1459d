//! Session-scoped encryption of sensitive descriptor fields.
//!
//! Fingerprint and address are the fields that identify a real endpoint, so
//! they never leave an aggregation session in plaintext. Each session
//! generates its own XChaCha20-Poly1305 key; the session id is bound as
//! associated data, so ciphertext can only be opened by the session that
//! produced it.

use crate::descriptor::BridgeDescriptor;
use crate::error::CodecError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::XChaCha20Poly1305;
use rand::RngCore;
use uuid::Uuid;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 24;

/// Symmetric codec for one aggregation session. The key is immutable for
/// the session's lifetime and may be shared freely across tasks.
pub struct SecretCodec {
    cipher: XChaCha20Poly1305,
    session_id: Uuid,
}

impl SecretCodec {
    /// Generate a fresh session key from the OS RNG.
    pub fn generate(session_id: Uuid) -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut key);
        SecretCodec {
            cipher: XChaCha20Poly1305::new((&key).into()),
            session_id,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Encrypt `fingerprint` and `address` in place and mark the descriptor
    /// encrypted. Double encryption is refused.
    pub fn encrypt_fields(&self, descriptor: &mut BridgeDescriptor) -> Result<(), CodecError> {
        if descriptor.encrypted {
            return Err(CodecError::AlreadyInState("encrypted"));
        }
        descriptor.fingerprint = self.seal(descriptor.fingerprint.as_bytes())?;
        descriptor.address = self.seal(descriptor.address.as_bytes())?;
        descriptor.encrypted = true;
        Ok(())
    }

    /// Invert `encrypt_fields`. Fails with [`CodecError::Decryption`] when
    /// the ciphertext was produced under a different session.
    pub fn decrypt_fields(&self, descriptor: &mut BridgeDescriptor) -> Result<(), CodecError> {
        if !descriptor.encrypted {
            return Err(CodecError::AlreadyInState("plaintext"));
        }
        let fingerprint = self.open(&descriptor.fingerprint)?;
        let address = self.open(&descriptor.address)?;
        descriptor.fingerprint = fingerprint;
        descriptor.address = address;
        descriptor.encrypted = false;
        Ok(())
    }

    fn seal(&self, plaintext: &[u8]) -> Result<String, CodecError> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let payload = Payload {
            msg: plaintext,
            aad: self.session_id.as_bytes(),
        };
        let ciphertext = self
            .cipher
            .encrypt((&nonce).into(), payload)
            .map_err(|_| CodecError::Decryption)?;
        let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(envelope))
    }

    fn open(&self, field: &str) -> Result<String, CodecError> {
        let envelope = BASE64
            .decode(field)
            .map_err(|e| CodecError::Malformed(e.to_string()))?;
        if envelope.len() <= NONCE_SIZE {
            return Err(CodecError::Malformed("envelope too short".into()));
        }
        let (nonce, ciphertext) = envelope.split_at(NONCE_SIZE);
        let payload = Payload {
            msg: ciphertext,
            aad: self.session_id.as_bytes(),
        };
        let plaintext = self
            .cipher
            .decrypt(nonce.into(), payload)
            .map_err(|_| CodecError::Decryption)?;
        String::from_utf8(plaintext).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}
