use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const HKDF_SALT: &[u8] = b"staticpost-v1";
const HKDF_INFO: &[u8] = b"aes256gcm-key";

type HmacSha1 = Hmac<Sha1>;

fn derive_key(key: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), key.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(HKDF_INFO, &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    okm
}

/// Encrypt plaintext using AES-256-GCM. Returns nonce (12 bytes) prepended to ciphertext.
pub fn encrypt(plaintext: &str, key: &str) -> Result<Vec<u8>, String> {
    let key_bytes = derive_key(key);
    let cipher =
        Aes256Gcm::new_from_slice(&key_bytes).map_err(|e| format!("Invalid key: {e}"))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| format!("Encryption failed: {e}"))?;

    let mut result = nonce.to_vec();
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt ciphertext (nonce prepended) using AES-256-GCM.
pub fn decrypt(data: &[u8], key: &str) -> Result<String, String> {
    if data.len() < 12 {
        return Err("Ciphertext too short".to_string());
    }

    let key_bytes = derive_key(key);
    let cipher =
        Aes256Gcm::new_from_slice(&key_bytes).map_err(|e| format!("Invalid key: {e}"))?;

    let nonce = Nonce::from_slice(&data[..12]);
    let plaintext = cipher
        .decrypt(nonce, &data[12..])
        .map_err(|e| format!("Decryption failed: {e}"))?;

    String::from_utf8(plaintext).map_err(|e| format!("Invalid UTF-8: {e}"))
}

/// Seal a string into an opaque hex token safe for URLs and review bodies.
pub fn seal(plaintext: &str, key: &str) -> Result<String, String> {
    encrypt(plaintext, key).map(hex::encode)
}

/// Recover the string sealed by [`seal`]. Any failure (malformed hex,
/// truncated ciphertext, wrong key) is reported as an error, never a panic.
pub fn open(token: &str, key: &str) -> Result<String, String> {
    let data = hex::decode(token.trim()).map_err(|e| format!("Malformed token: {e}"))?;
    decrypt(&data, key)
}

/// Seal a JSON-serializable payload.
pub fn seal_json<T: Serialize>(value: &T, key: &str) -> Result<String, String> {
    let json = serde_json::to_string(value).map_err(|e| format!("Serialize failed: {e}"))?;
    seal(&json, key)
}

/// Open and JSON-parse a sealed payload. Callers must still verify the
/// pepper and environment tag embedded in the payload: the seal endpoint is
/// public, so a structurally valid token proves nothing by itself.
pub fn open_json<T: DeserializeOwned>(token: &str, key: &str) -> Result<T, String> {
    let json = open(token, key)?;
    serde_json::from_str(&json).map_err(|e| format!("Malformed payload: {e}"))
}

/// Verify a GitHub-style webhook signature: `sha1=<hex(HMAC-SHA1(secret, body))>`.
/// Comparison is constant-time via the HMAC library.
pub fn verify_github_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Some(hex_sig) = signature_header.strip_prefix("sha1=") else {
        return false;
    };
    let Ok(provided) = hex::decode(hex_sig) else {
        return false;
    };

    let Ok(mut mac) = <HmacSha1 as Mac>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

/// Verify a GitLab-style shared webhook token. GitLab sends the secret back
/// verbatim rather than signing the body with it, so this is a straight
/// constant-time equality check.
pub fn verify_shared_token(secret: &str, provided: &str) -> bool {
    let a = secret.as_bytes();
    let b = provided.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Hex digest of an email address, used wherever an address must be compared
/// or stored without keeping the cleartext around. Must match the `hash`
/// field transform so submission-time and merge-time paths agree.
pub fn email_digest(address: &str) -> String {
    hex::encode(Sha256::digest(address.as_bytes()))
}

/// Sign a payload for tests and tooling; mirrors what GitHub does server-side.
pub fn github_signature_header(secret: &str, body: &[u8]) -> String {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body);
    format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
}
