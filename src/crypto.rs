//! AES-256-CBC block-body encryption, keyed by a per-tunnel password via
//! scrypt.
//!
//! The IV is derived once per tunnel and reused for every block for the
//! tunnel's lifetime, a deliberate simplification over a per-block IV (see
//! DESIGN.md). A fresh [`cbc::Encryptor`]/[`cbc::Decryptor`] is built from the
//! stored key+IV on every call rather than kept as mutable cipher state, so
//! `Crypto` itself stays `Sync` and needs no internal lock even though it is
//! shared between a tunnel's read and write loops.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use scrypt::Params;
use zeroize::ZeroizeOnDrop;

use crate::error::{ProxyError, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const IV_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Derived per-tunnel key material. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct Crypto {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl Crypto {
    /// Derive key and IV from a password (in practice the stringified
    /// handshake session password):
    ///
    /// ```text
    /// iv  = scrypt(password, password, N=256, r=8, p=16, dkLen=16)
    /// key = scrypt(password, iv,       N=512, r=8, p=16, dkLen=32)
    /// ```
    pub fn new(password: &[u8]) -> Result<Self> {
        let mut iv = [0u8; IV_LEN];
        let iv_params = Params::new(8, 8, 16, IV_LEN)
            .map_err(|e| ProxyError::Crypto(format!("invalid scrypt params for iv: {e}")))?;
        scrypt::scrypt(password, password, &iv_params, &mut iv)
            .map_err(|e| ProxyError::Crypto(format!("scrypt iv derivation failed: {e}")))?;

        let mut key = [0u8; KEY_LEN];
        let key_params = Params::new(9, 8, 16, KEY_LEN)
            .map_err(|e| ProxyError::Crypto(format!("invalid scrypt params for key: {e}")))?;
        scrypt::scrypt(password, &iv, &key_params, &mut key)
            .map_err(|e| ProxyError::Crypto(format!("scrypt key derivation failed: {e}")))?;

        Ok(Crypto { key, iv })
    }

    /// Encrypt `plaintext`, PKCS#7-padding it first. Every input is padded,
    /// even a body whose length is already a block multiple — an input of
    /// length `L` always yields `ceil((L+1)/16)*16` bytes.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let enc = Aes256CbcEnc::new_from_slices(&self.key, &self.iv)
            .map_err(|e| ProxyError::Crypto(e.to_string()))?;
        Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
    }

    /// Decrypt `ciphertext` and strip PKCS#7 padding.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let dec = Aes256CbcDec::new_from_slices(&self.key, &self.iv)
            .map_err(|e| ProxyError::Crypto(e.to_string()))?;
        dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| ProxyError::Crypto(format!("bad padding: {e}")))
    }
}

/// Generate a fresh handshake session password: the string form of a random
/// v4 UUID, as bytes — exchanged in the clear during `HandShakeResponse` and
/// never reused once the tunnel's `Crypto` is derived from it.
pub fn generate_session_password() -> Vec<u8> {
    let s = uuid::Uuid::new_v4().to_string().into_bytes();
    debug_assert_eq!(s.len(), 36);
    s
}
