//! Version 4 local (symmetric) tokens.

use std::fmt;

use crate::seal::claims::{Claims, ClaimsValidator};
use crate::seal::pre_auth_encode;

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use blake2::{
    digest::{
        consts::{U32, U56},
        Mac,
    },
    Blake2bMac,
};
use chacha20::{
    cipher::{KeyIvInit, StreamCipher},
    XChaCha20,
};
use getrandom::getrandom;
use thiserror::Error;
use zeroize::Zeroize;

const LOCAL_HEADER: &str = "v4.local.";

const DOMAIN_ENCRYPT: &[u8] = b"paseto-encryption-key";
const DOMAIN_AUTH: &[u8] = b"paseto-auth-key-for-aead";

const NONCE_LEN: usize = 32;
const MAC_LEN: usize = 32;

/// Errors while sealing or opening tokens.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum SealError {
    #[error("key must be 32 bytes")]
    SizeError,
    #[error("key is not valid base64")]
    KeyEncoding,
    #[error("unable to encode claims as json")]
    EncodeError,
    #[error("failed to get randomness for nonce")]
    RngError,
    #[error("supplied token has invalid header")]
    InvalidHeader,
    #[error("unable to decode token message")]
    InvalidMessage,
    #[error("failed to authenticate ciphertext")]
    AuthFailure,
    #[error("unable to decode claims as json")]
    DecodeError,
    #[error("token claims failed validation")]
    BadClaims,
}

/// The server's secret key for sealing values.
#[derive(Clone)]
pub struct SealKey([u8; 32]);

impl SealKey {
    pub fn from_slice(key: &[u8]) -> Result<Self, SealError> {
        Ok(Self(key.try_into().map_err(|_| SealError::SizeError)?))
    }

    /// Load a key from its standard base64 encoding.
    pub fn from_base64(encoded: &str) -> Result<Self, SealError> {
        let mut bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| SealError::KeyEncoding)?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();

        key
    }

    /// Seal a set of claims, binding the token to an implicit assertion
    /// that must be presented again to open it.
    ///
    /// # Errors
    ///
    /// Fails if the claims can't be serialized or no randomness is available
    /// for the nonce.
    pub fn seal(&self, claims: &Claims, implicit: &[u8]) -> Result<String, SealError> {
        let message = serde_json::to_vec(claims).map_err(|_| SealError::EncodeError)?;

        let mut nonce = [0; NONCE_LEN];
        getrandom(&mut nonce).map_err(|_| SealError::RngError)?;

        self.encrypt_message(&message, &nonce, None, implicit)
    }

    /// Open a sealed token and check its claims.
    ///
    /// # Errors
    ///
    /// Fails if the token is malformed, was not sealed with this key and
    /// implicit assertion, or its claims are rejected by `validator`.
    pub fn open(
        &self,
        token: &str,
        validator: &ClaimsValidator,
        implicit: &[u8],
    ) -> Result<Claims, SealError> {
        let message = self.decrypt_message(token.as_bytes(), implicit)?;
        let claims = serde_json::from_slice(&message).map_err(|_| SealError::DecodeError)?;

        if validator.validate(&claims) {
            Ok(claims)
        } else {
            Err(SealError::BadClaims)
        }
    }

    fn encrypt_message(
        &self,
        message: &[u8],
        nonce: &[u8; NONCE_LEN],
        footer: Option<&[u8]>,
        implicit: &[u8],
    ) -> Result<String, SealError> {
        let (key, n2, auth_key) = self.split(nonce)?;

        let mut c = message.to_vec();
        XChaCha20::new(&key.into(), &n2.into()).apply_keystream(&mut c);

        let tag = mac(&auth_key)?
            .chain_update(pre_auth_encode(&[
                LOCAL_HEADER.as_bytes(),
                nonce.as_slice(),
                c.as_slice(),
                footer.unwrap_or(&[]),
                implicit,
            ]))
            .finalize()
            .into_bytes();

        let mut token = LOCAL_HEADER.to_string();
        token += &URL_SAFE_NO_PAD.encode([nonce.as_slice(), c.as_slice(), tag.as_slice()].concat());
        if let Some(footer) = footer {
            token += ".";
            token += &URL_SAFE_NO_PAD.encode(footer);
        }

        Ok(token)
    }

    fn decrypt_message(&self, token: &[u8], implicit: &[u8]) -> Result<Vec<u8>, SealError> {
        let mut body = token
            .strip_prefix(LOCAL_HEADER.as_bytes())
            .ok_or(SealError::InvalidHeader)?
            .split(|b| *b == b'.');

        let message = match body.next().map(|msg| URL_SAFE_NO_PAD.decode(msg)) {
            Some(Ok(d)) if d.len() >= NONCE_LEN + MAC_LEN => d,
            _ => return Err(SealError::InvalidMessage),
        };
        let footer = body
            .next()
            .map(|f| URL_SAFE_NO_PAD.decode(f))
            .transpose()
            .map_err(|_| SealError::InvalidMessage)?;

        let (nonce, remaining) = message.split_at(NONCE_LEN);
        let (c, tag) = remaining.split_at(remaining.len() - MAC_LEN);
        let nonce: &[u8; NONCE_LEN] = nonce.try_into().map_err(|_| SealError::InvalidMessage)?;

        let (key, n2, auth_key) = self.split(nonce)?;

        // verify_slice compares in constant time
        mac(&auth_key)?
            .chain_update(pre_auth_encode(&[
                LOCAL_HEADER.as_bytes(),
                nonce.as_slice(),
                c,
                footer.as_deref().unwrap_or(&[]),
                implicit,
            ]))
            .verify_slice(tag)
            .map_err(|_| SealError::AuthFailure)?;

        let mut p = c.to_vec();
        XChaCha20::new(&key.into(), &n2.into()).apply_keystream(&mut p);

        Ok(p)
    }

    /// Derive the encryption key, the XChaCha20 nonce and the authentication
    /// key for a given token nonce.
    fn split(&self, nonce: &[u8; NONCE_LEN]) -> Result<([u8; 32], [u8; 24], [u8; 32]), SealError> {
        let enc_hash = Blake2bMac::<U56>::new_from_slice(&self.0)
            .map_err(|_| SealError::SizeError)?
            .chain_update([DOMAIN_ENCRYPT, nonce.as_slice()].concat())
            .finalize()
            .into_bytes();

        let mut key = [0; 32];
        let mut n2 = [0; 24];
        key.copy_from_slice(&enc_hash[..32]);
        n2.copy_from_slice(&enc_hash[32..]);

        let auth_key = mac(&self.0)?
            .chain_update([DOMAIN_AUTH, nonce.as_slice()].concat())
            .finalize()
            .into_bytes();

        Ok((key, n2, auth_key.into()))
    }
}

fn mac(key: &[u8; 32]) -> Result<Blake2bMac<U32>, SealError> {
    Blake2bMac::<U32>::new_from_slice(key).map_err(|_| SealError::SizeError)
}

impl Drop for SealKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SealKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SealKey(..)")
    }
}
