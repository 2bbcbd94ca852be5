//! Column encryption.
//!
//! Encrypted fields name a scope; the [`Vault`] maps scopes to passwords and
//! hands them to a [`Cipher`]. Ciphertexts are hex text so they fit any text
//! column.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EntigraphError, Result};

pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &str, password: &str) -> Result<String>;
    fn decrypt(&self, ciphertext: &str, password: &str) -> Result<String>;
}

const SIV_LEN: usize = 16;

/// Deterministic authenticated encryption built from BLAKE3: a synthetic IV
/// is derived from the plaintext under a MAC key and seeds the keystream, and
/// decryption recomputes it to authenticate.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake3Cipher;

impl Blake3Cipher {
    fn keys(password: &str) -> ([u8; 32], [u8; 32]) {
        (
            blake3::derive_key("entigraph column encryption v1", password.as_bytes()),
            blake3::derive_key("entigraph column authentication v1", password.as_bytes()),
        )
    }
    fn keystream(key: &[u8; 32], siv: &[u8], out: &mut [u8]) {
        let mut hasher = blake3::Hasher::new_keyed(key);
        hasher.update(siv);
        hasher.finalize_xof().fill(out);
    }
    fn siv(mac_key: &[u8; 32], plaintext: &[u8]) -> [u8; SIV_LEN] {
        let tag = blake3::keyed_hash(mac_key, plaintext);
        let mut siv = [0u8; SIV_LEN];
        siv.copy_from_slice(&tag.as_bytes()[..SIV_LEN]);
        siv
    }
}

impl Cipher for Blake3Cipher {
    fn encrypt(&self, plaintext: &str, password: &str) -> Result<String> {
        let (enc_key, mac_key) = Self::keys(password);
        let siv = Self::siv(&mac_key, plaintext.as_bytes());
        let mut stream = vec![0u8; plaintext.len()];
        Self::keystream(&enc_key, &siv, &mut stream);
        let mut sealed = siv.to_vec();
        sealed.extend(plaintext.bytes().zip(stream).map(|(p, k)| p ^ k));
        Ok(hex::encode(sealed))
    }

    fn decrypt(&self, ciphertext: &str, password: &str) -> Result<String> {
        let sealed = hex::decode(ciphertext)
            .map_err(|e| EntigraphError::Unauthorized(format!("malformed ciphertext: {e}")))?;
        if sealed.len() < SIV_LEN {
            return Err(EntigraphError::Unauthorized("ciphertext too short".into()));
        }
        let (siv, body) = sealed.split_at(SIV_LEN);
        let (enc_key, mac_key) = Self::keys(password);
        let mut stream = vec![0u8; body.len()];
        Self::keystream(&enc_key, siv, &mut stream);
        let plain: Vec<u8> = body.iter().zip(stream).map(|(c, k)| c ^ k).collect();
        if Self::siv(&mac_key, &plain) != siv {
            return Err(EntigraphError::Unauthorized(
                "ciphertext does not authenticate under this password".into(),
            ));
        }
        String::from_utf8(plain)
            .map_err(|e| EntigraphError::Unauthorized(format!("decrypted text is not utf-8: {e}")))
    }
}

/// Passwords per encryption scope plus the cipher that uses them.
#[derive(Clone)]
pub struct Vault {
    cipher: Arc<dyn Cipher>,
    scopes: HashMap<String, String>,
}

impl Vault {
    pub fn new(cipher: Arc<dyn Cipher>, scopes: HashMap<String, String>) -> Self {
        Self { cipher, scopes }
    }
    fn password(&self, scope: &str) -> Result<&str> {
        let password = self.scopes.get(scope).ok_or_else(|| {
            EntigraphError::Internal(format!("no password configured for encryption scope '{scope}'"))
        })?;
        if password.is_empty() {
            return Err(EntigraphError::Unauthorized(format!(
                "encryption scope '{scope}' has an empty password"
            )));
        }
        Ok(password)
    }
    pub fn encrypt(&self, scope: &str, plaintext: &str) -> Result<String> {
        self.cipher.encrypt(plaintext, self.password(scope)?)
    }
    pub fn decrypt(&self, scope: &str, ciphertext: &str) -> Result<String> {
        self.cipher.decrypt(ciphertext, self.password(scope)?)
    }
}

impl Default for Vault {
    fn default() -> Self {
        Self::new(Arc::new(Blake3Cipher), HashMap::new())
    }
}
