//! Item sealing with XChaCha20-Poly1305.
//!
//! Sealed blob layout:
//!   [ nonce (24 bytes) | ciphertext (plaintext length) | tag (16 bytes) ]
//!
//! The item id is bound as associated data, so a blob only opens under the
//! id it was sealed for. Thumbnails share the item key but carry an extra
//! domain suffix in their associated data, so the two blobs of one item
//! cannot be swapped either.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use tracing::warn;
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};
use crate::keys::{ItemKey, KeyCustodian};
use crate::models::ItemId;

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;
pub const BLOB_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

const THUMBNAIL_DOMAIN: &[u8] = b":thumbnail";

/// Encrypts and decrypts item content. Always mints the key itself.
#[derive(Clone)]
pub struct Sealer {
    custodian: KeyCustodian,
}

impl Sealer {
    pub fn new(custodian: KeyCustodian) -> Self {
        Self { custodian }
    }

    pub fn custodian(&self) -> &KeyCustodian {
        &self.custodian
    }

    /// Generate and store a fresh key for `item`, then encrypt `plaintext`.
    /// The key is removed again if encryption fails.
    pub fn seal(&self, plaintext: &[u8], item: &ItemId) -> Result<Vec<u8>> {
        let key = self.custodian.generate_and_store(item)?;
        encrypt(&key, plaintext, &content_aad(item)).inspect_err(|_| {
            if let Err(e) = self.custodian.delete(item) {
                warn!(%item, error = %e, "failed to discard key after encryption failure");
            }
        })
    }

    /// Decrypt a sealed blob. Fails closed; never returns partial plaintext.
    pub fn open(&self, blob: &[u8], item: &ItemId) -> Result<Zeroizing<Vec<u8>>> {
        split_blob(blob)?;
        let key = self.custodian.retrieve(item)?;
        decrypt(&key, blob, &content_aad(item))
    }

    /// Seal a preview under the key `seal` already stored for `item`.
    pub fn seal_thumbnail(&self, plaintext: &[u8], item: &ItemId) -> Result<Vec<u8>> {
        let key = self.custodian.retrieve(item)?;
        encrypt(&key, plaintext, &thumbnail_aad(item))
    }

    pub fn open_thumbnail(&self, blob: &[u8], item: &ItemId) -> Result<Zeroizing<Vec<u8>>> {
        split_blob(blob)?;
        let key = self.custodian.retrieve(item)?;
        decrypt(&key, blob, &thumbnail_aad(item))
    }
}

fn content_aad(item: &ItemId) -> Vec<u8> {
    item.as_bytes().to_vec()
}

fn thumbnail_aad(item: &ItemId) -> Vec<u8> {
    let mut aad = content_aad(item);
    aad.extend_from_slice(THUMBNAIL_DOMAIN);
    aad
}

/// Split a sealed blob into `(nonce, ciphertext, tag)`.
pub fn split_blob(blob: &[u8]) -> Result<(&[u8], &[u8], &[u8])> {
    if blob.len() < BLOB_OVERHEAD {
        return Err(VaultError::DecryptionFailed);
    }
    let (nonce, rest) = blob.split_at(NONCE_LEN);
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);
    Ok((nonce, ciphertext, tag))
}

fn encrypt(key: &ItemKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.expose()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);
    // chacha20poly1305 appends the tag to the ciphertext.
    let sealed = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| VaultError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn decrypt(key: &ItemKey, blob: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let (nonce, _, _) = split_blob(blob)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.expose()));
    let plaintext = cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: &blob[NONCE_LEN..],
                aad,
            },
        )
        .map_err(|_| VaultError::DecryptionFailed)?;
    Ok(Zeroizing::new(plaintext))
}
