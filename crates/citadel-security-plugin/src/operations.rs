//! Cryptographic operations exposed by the security node.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SecurityError {
    #[error("unsupported security operation: {0}")]
    UnsupportedOperation(String),
    #[error("unsupported {operation} algorithm: {algorithm}")]
    UnsupportedAlgorithm {
        operation: &'static str,
        algorithm: String,
    },
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid encrypted data: {0}")]
    InvalidCiphertext(String),
    #[error("decryption failed: wrong key or corrupted data")]
    DecryptionFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Hash,
    Encrypt,
    Decrypt,
    Sign,
    Verify,
}

impl Operation {
    pub fn parse(name: &str) -> Result<Self, SecurityError> {
        match name {
            "hash" => Ok(Operation::Hash),
            "encrypt" => Ok(Operation::Encrypt),
            "decrypt" => Ok(Operation::Decrypt),
            "sign" => Ok(Operation::Sign),
            "verify" => Ok(Operation::Verify),
            other => Err(SecurityError::UnsupportedOperation(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Hash => "hash",
            Operation::Encrypt => "encrypt",
            Operation::Decrypt => "decrypt",
            Operation::Sign => "sign",
            Operation::Verify => "verify",
        }
    }
}

fn unsupported(operation: &'static str, algorithm: &str) -> SecurityError {
    SecurityError::UnsupportedAlgorithm {
        operation,
        algorithm: algorithm.to_string(),
    }
}

fn hmac_sha256(key: &str) -> Result<HmacSha256, SecurityError> {
    if key.is_empty() {
        return Err(SecurityError::Missing("secret_key"));
    }
    // HMAC takes keys of any length.
    <HmacSha256 as Mac>::new_from_slice(key.as_bytes()).map_err(|_| SecurityError::Missing("secret_key"))
}

/// Hex digest of `data`.
pub fn hash(data: &str, algorithm: &str, key: &str) -> Result<String, SecurityError> {
    match algorithm {
        "sha256" => Ok(hex::encode(Sha256::digest(data.as_bytes()))),
        "sha512" => Ok(hex::encode(Sha512::digest(data.as_bytes()))),
        "hmac_sha256" => {
            let mut mac = hmac_sha256(key)?;
            mac.update(data.as_bytes());
            Ok(hex::encode(mac.finalize().into_bytes()))
        }
        other => Err(unsupported("hashing", other)),
    }
}

pub fn sign(data: &str, algorithm: &str, key: &str) -> Result<String, SecurityError> {
    match algorithm {
        "hmac_sha256" => hash(data, algorithm, key),
        other => Err(unsupported("signing", other)),
    }
}

/// Constant-time check of a hex signature produced by [`sign`].
pub fn verify(data: &str, signature: &str, algorithm: &str, key: &str) -> Result<bool, SecurityError> {
    if signature.is_empty() {
        return Err(SecurityError::Missing("signature"));
    }
    match algorithm {
        "hmac_sha256" => {
            let mut mac = hmac_sha256(key)?;
            mac.update(data.as_bytes());
            let Ok(expected) = hex::decode(signature) else {
                return Ok(false);
            };
            Ok(mac.verify_slice(&expected).is_ok())
        }
        other => Err(unsupported("verification", other)),
    }
}

fn cipher(key: &str) -> Result<Aes256Gcm, SecurityError> {
    if key.is_empty() {
        return Err(SecurityError::Missing("secret_key"));
    }
    let digest = Sha256::digest(key.as_bytes());
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&digest)))
}

/// AES-256-GCM under SHA-256(key). Output is base64 of nonce || ciphertext.
pub fn encrypt(plaintext: &str, algorithm: &str, key: &str) -> Result<String, SecurityError> {
    if algorithm != "aes256" {
        return Err(unsupported("encryption", algorithm));
    }
    let cipher = cipher(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| SecurityError::InvalidCiphertext("encryption failed".to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(sealed))
}

pub fn decrypt(encoded: &str, algorithm: &str, key: &str) -> Result<String, SecurityError> {
    if algorithm != "aes256" {
        return Err(unsupported("decryption", algorithm));
    }
    let sealed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| SecurityError::InvalidCiphertext(e.to_string()))?;
    if sealed.len() <= NONCE_LEN {
        return Err(SecurityError::InvalidCiphertext("too short".to_string()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

    let plaintext = cipher(key)?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| SecurityError::DecryptionFailed)?;
    String::from_utf8(plaintext).map_err(|e| SecurityError::InvalidCiphertext(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            hash("abc", "sha256", "").unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash("abc", "sha512", "").unwrap().len(), 128);
        // RFC 4231 test case 2
        assert_eq!(
            hash("what do ya want for nothing?", "hmac_sha256", "Jefe").unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_hmac_requires_a_key() {
        assert_eq!(
            hash("data", "hmac_sha256", ""),
            Err(SecurityError::Missing("secret_key"))
        );
        assert_eq!(
            hash("data", "bcrypt", "").unwrap_err().to_string(),
            "unsupported hashing algorithm: bcrypt"
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let signature = sign("payload", "hmac_sha256", "k").unwrap();
        assert!(verify("payload", &signature, "hmac_sha256", "k").unwrap());
        assert!(!verify("payload!", &signature, "hmac_sha256", "k").unwrap());
        assert!(!verify("payload", &signature, "hmac_sha256", "other").unwrap());
        assert!(!verify("payload", "not-hex", "hmac_sha256", "k").unwrap());
        assert_eq!(
            verify("payload", "", "hmac_sha256", "k"),
            Err(SecurityError::Missing("signature"))
        );
        assert!(sign("payload", "sha256", "k").is_err());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let sealed = encrypt("attack at dawn", "aes256", "secret").unwrap();
        assert_eq!(decrypt(&sealed, "aes256", "secret").unwrap(), "attack at dawn");

        // Fresh nonce per call.
        assert_ne!(sealed, encrypt("attack at dawn", "aes256", "secret").unwrap());
        assert_eq!(
            decrypt(&sealed, "aes256", "wrong"),
            Err(SecurityError::DecryptionFailed)
        );
    }

    #[test]
    fn test_decrypt_rejects_garbage() {
        assert!(matches!(
            decrypt("%%%", "aes256", "k"),
            Err(SecurityError::InvalidCiphertext(_))
        ));
        assert!(matches!(
            decrypt(&STANDARD.encode([0u8; 8]), "aes256", "k"),
            Err(SecurityError::InvalidCiphertext(_))
        ));
        assert!(encrypt("x", "sha256", "k").is_err());
    }

    #[test]
    fn test_operation_names() {
        for name in ["hash", "encrypt", "decrypt", "sign", "verify"] {
            assert_eq!(Operation::parse(name).unwrap().as_str(), name);
        }
        assert_eq!(
            Operation::parse("mask").unwrap_err().to_string(),
            "unsupported security operation: mask"
        );
    }
}
