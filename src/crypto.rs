//! Signing and hybrid encryption for direct messages.
//!
//! Hybrid scheme: a random AES-256 key encrypts the plaintext (AES-GCM,
//! 12-byte nonce); the AES key is then sealed to the recipient's X25519
//! key via a NaCl box (X25519 + XSalsa20-Poly1305, 24-byte nonce) using a
//! fresh ephemeral key pair. Identities are Ed25519 throughout; the
//! X25519 keys used for sealing are derived on demand (see
//! `ed25519_public_to_x25519` / `ed25519_private_to_x25519`).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key as AesKey, Nonce as AesNonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use crypto_box::aead::Aead as BoxAead;
use crypto_box::{PublicKey as BoxPublicKey, SalsaBox, SecretKey as BoxSecretKey};
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use rand_core::OsRng;
use sha2::{Digest, Sha512};

use crate::message::Envelope;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// Sign the canonical form of a message with the sender's Ed25519 key.
pub fn sign(signing_key: &SigningKey, canonical: &[u8]) -> String {
    let sig: Signature = signing_key.sign(canonical);
    B64.encode(sig.to_bytes())
}

/// Verify a base64 signature over `canonical` against a sender's verifying key.
pub fn verify(verifying_key: &VerifyingKey, canonical: &[u8], signature_b64: &str) -> bool {
    let Ok(sig_bytes) = B64.decode(signature_b64) else {
        return false;
    };
    let Ok(sig_bytes): Result<[u8; 64], _> = sig_bytes.try_into() else {
        return false;
    };
    let sig = Signature::from_bytes(&sig_bytes);
    verifying_key.verify(canonical, &sig).is_ok()
}

/// Derive the X25519 public key (Montgomery u-coordinate) from an Ed25519
/// verifying key.
pub fn ed25519_public_to_x25519(verifying_key: &VerifyingKey) -> Result<BoxPublicKey, CryptoError> {
    let compressed = CompressedEdwardsY::from_slice(verifying_key.as_bytes())
        .map_err(|_| CryptoError::MalformedEnvelope("bad ed25519 public key".into()))?;
    let point = compressed
        .decompress()
        .ok_or_else(|| CryptoError::MalformedEnvelope("invalid curve point".into()))?;
    let montgomery = point.to_montgomery();
    Ok(BoxPublicKey::from(montgomery.to_bytes()))
}

/// Derive the X25519 private scalar from an Ed25519 signing key: SHA-512
/// of the 32-byte seed, first 32 bytes, standard X25519 clamping applied.
pub fn ed25519_private_to_x25519(signing_key: &SigningKey) -> BoxSecretKey {
    let seed = signing_key.to_bytes();
    let mut hasher = Sha512::new();
    hasher.update(seed);
    let digest = hasher.finalize();

    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&digest[..32]);
    scalar[0] &= 248;
    scalar[31] &= 127;
    scalar[31] |= 64;

    BoxSecretKey::from(scalar)
}

/// Encrypt `plaintext` for `recipient_verifying_key`, producing the
/// envelope carried in a direct message's `content` field.
pub fn encrypt_envelope(
    recipient_verifying_key: &VerifyingKey,
    plaintext: &[u8],
) -> Result<Envelope, CryptoError> {
    let recipient_x25519 = ed25519_public_to_x25519(recipient_verifying_key)?;

    let mut aes_key_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut aes_key_bytes);

    let mut data_nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut data_nonce_bytes);
    let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(&aes_key_bytes));
    let encrypted_content = cipher
        .encrypt(AesNonce::from_slice(&data_nonce_bytes), plaintext)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let ephemeral_secret = BoxSecretKey::generate(&mut OsRng);
    let ephemeral_public = ephemeral_secret.public_key();
    let sender_box = SalsaBox::new(&recipient_x25519, &ephemeral_secret);

    let mut key_nonce_bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut key_nonce_bytes);
    let encrypted_key = sender_box
        .encrypt(
            crypto_box::Nonce::from_slice(&key_nonce_bytes),
            aes_key_bytes.as_ref(),
        )
        .map_err(|_| CryptoError::DecryptionFailed)?;

    Ok(Envelope {
        ephemeral_public_key: B64.encode(ephemeral_public.as_bytes()),
        key_nonce: B64.encode(key_nonce_bytes),
        encrypted_key: B64.encode(encrypted_key),
        data_nonce: B64.encode(data_nonce_bytes),
        encrypted_content: B64.encode(encrypted_content),
    })
}

/// Decrypt an envelope using the recipient's Ed25519 signing key (from
/// which the X25519 private scalar is derived).
pub fn decrypt_envelope(
    recipient_signing_key: &SigningKey,
    envelope: &Envelope,
) -> Result<Vec<u8>, CryptoError> {
    let ephemeral_public_bytes = B64
        .decode(&envelope.ephemeral_public_key)
        .map_err(|_| CryptoError::MalformedEnvelope("ephemeral_public_key".into()))?;
    let ephemeral_public_bytes: [u8; 32] = ephemeral_public_bytes
        .try_into()
        .map_err(|_| CryptoError::MalformedEnvelope("ephemeral_public_key length".into()))?;
    let ephemeral_public = BoxPublicKey::from(ephemeral_public_bytes);

    let key_nonce = B64
        .decode(&envelope.key_nonce)
        .map_err(|_| CryptoError::MalformedEnvelope("key_nonce".into()))?;
    if key_nonce.len() != 24 {
        return Err(CryptoError::MalformedEnvelope("key_nonce length".into()));
    }
    let encrypted_key = B64
        .decode(&envelope.encrypted_key)
        .map_err(|_| CryptoError::MalformedEnvelope("encrypted_key".into()))?;
    let data_nonce = B64
        .decode(&envelope.data_nonce)
        .map_err(|_| CryptoError::MalformedEnvelope("data_nonce".into()))?;
    if data_nonce.len() != 12 {
        return Err(CryptoError::MalformedEnvelope("data_nonce length".into()));
    }
    let encrypted_content = B64
        .decode(&envelope.encrypted_content)
        .map_err(|_| CryptoError::MalformedEnvelope("encrypted_content".into()))?;

    let recipient_x25519_secret = ed25519_private_to_x25519(recipient_signing_key);
    let receiver_box = SalsaBox::new(&ephemeral_public, &recipient_x25519_secret);
    let aes_key_bytes = receiver_box
        .decrypt(crypto_box::Nonce::from_slice(&key_nonce), encrypted_key.as_ref())
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(&aes_key_bytes));
    cipher
        .decrypt(AesNonce::from_slice(&data_nonce), encrypted_content.as_ref())
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn sign_and_verify_roundtrip() {
        let key = SigningKey::generate(&mut OsRng);
        let canonical = crate::message::canonical_bytes("alice", "bob", 42, "hi");
        let sig = sign(&key, &canonical);
        assert!(verify(&key.verifying_key(), &canonical, &sig));
    }

    #[test]
    fn verify_rejects_tampered_canonical() {
        let key = SigningKey::generate(&mut OsRng);
        let canonical = crate::message::canonical_bytes("alice", "bob", 42, "hi");
        let sig = sign(&key, &canonical);
        let tampered = crate::message::canonical_bytes("alice", "bob", 42, "bye");
        assert!(!verify(&key.verifying_key(), &tampered, &sig));
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let recipient = SigningKey::generate(&mut OsRng);
        let plaintext = b"hello there";
        let envelope = encrypt_envelope(&recipient.verifying_key(), plaintext).unwrap();
        let decrypted = decrypt_envelope(&recipient, &envelope).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn decrypt_fails_with_wrong_key() {
        let recipient = SigningKey::generate(&mut OsRng);
        let impostor = SigningKey::generate(&mut OsRng);
        let envelope = encrypt_envelope(&recipient.verifying_key(), b"secret").unwrap();
        assert!(decrypt_envelope(&impostor, &envelope).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let recipient = SigningKey::generate(&mut OsRng);
        let mut envelope = encrypt_envelope(&recipient.verifying_key(), b"secret").unwrap();
        let mut bytes = B64.decode(&envelope.encrypted_content).unwrap();
        bytes[0] ^= 0xFF;
        envelope.encrypted_content = B64.encode(bytes);
        assert!(decrypt_envelope(&recipient, &envelope).is_err());
    }
}
