//! Authenticated note envelope.
//!
//! A 31-byte viewer key splits into an AES-128-CTR key (first 16 bytes)
//! and an HMAC-SHA-256 key (remaining 15). The envelope is
//! `IV(16) || tag(16) || ciphertext`, where the tag is the truncated HMAC
//! of `IV || ciphertext`. Decryption failure means "not for this viewer"
//! and must be treated as a per-note skip, never a hard error.

use aes::Aes128;
use ark_bn254::Fr;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use transfer_circuit::{fr_from_dec, fr_to_dec};

type Aes128Ctr = Ctr128BE<Aes128>;
type HmacSha256 = Hmac<Sha256>;

const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 31;

/// Reasons an envelope does not open. `NotForViewer` is the expected
/// outcome for every note the holder does not own.
#[derive(Debug, PartialEq, Eq)]
pub enum CipherError {
    NotForViewer,
    MalformedPlaintext,
}

/// The note encryption key, deterministically derived from a wallet
/// signature. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive from a wallet signature over the fixed derivation message:
    /// the first 31 bytes of SHA-256(signature).
    pub fn from_signature(signature: &[u8]) -> Self {
        let digest: [u8; 32] = Sha256::digest(signature).into();
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&digest[..KEY_LEN]);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Stable fingerprint for cache bookkeeping; does not reveal the key.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"viewer-fingerprint");
        hasher.update(self.0);
        hasher.finalize().into()
    }

    fn aes_key(&self) -> [u8; 16] {
        self.0[..16].try_into().expect("key prefix is 16 bytes")
    }

    fn hmac_key(&self) -> &[u8] {
        &self.0[16..]
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// The decrypted contents of a note envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoteOpening {
    pub amount: u64,
    pub blinding: Fr,
    pub index: u64,
    pub asset_tag: Fr,
}

impl NoteOpening {
    /// Pipe-delimited plaintext: `<amount>|<blinding>|<index>|<asset_tag>`,
    /// field elements in decimal.
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}",
            self.amount,
            fr_to_dec(&self.blinding),
            self.index,
            fr_to_dec(&self.asset_tag)
        )
        .into_bytes()
    }

    pub fn parse(plaintext: &[u8]) -> Result<Self, CipherError> {
        let text = std::str::from_utf8(plaintext).map_err(|_| CipherError::MalformedPlaintext)?;
        let mut parts = text.split('|');
        let amount = parts
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or(CipherError::MalformedPlaintext)?;
        let blinding = parts
            .next()
            .and_then(|p| fr_from_dec(p).ok())
            .ok_or(CipherError::MalformedPlaintext)?;
        let index = parts
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or(CipherError::MalformedPlaintext)?;
        let asset_tag = parts
            .next()
            .and_then(|p| fr_from_dec(p).ok())
            .ok_or(CipherError::MalformedPlaintext)?;
        if parts.next().is_some() {
            return Err(CipherError::MalformedPlaintext);
        }
        Ok(Self {
            amount,
            blinding,
            index,
            asset_tag,
        })
    }
}

/// Encrypt a note for its owner.
pub fn seal_note<R: RngCore + ?Sized>(
    key: &EncryptionKey,
    note: &NoteOpening,
    rng: &mut R,
) -> Vec<u8> {
    let mut iv = [0u8; IV_LEN];
    rng.fill_bytes(&mut iv);

    let mut ciphertext = note.encode();
    let mut cipher = Aes128Ctr::new(&key.aes_key().into(), &iv.into());
    cipher.apply_keystream(&mut ciphertext);

    let tag = auth_tag(key, &iv, &ciphertext);

    let mut envelope = Vec::with_capacity(IV_LEN + TAG_LEN + ciphertext.len());
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&tag);
    envelope.extend_from_slice(&ciphertext);
    envelope
}

/// Trial-decrypt an envelope. The tag is checked in constant time before
/// any decryption happens.
pub fn open_note(key: &EncryptionKey, envelope: &[u8]) -> Result<NoteOpening, CipherError> {
    if envelope.len() < IV_LEN + TAG_LEN {
        return Err(CipherError::NotForViewer);
    }
    let (iv, rest) = envelope.split_at(IV_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let expected = auth_tag(key, iv, ciphertext);
    if expected.ct_eq(tag).unwrap_u8() != 1 {
        return Err(CipherError::NotForViewer);
    }

    let iv: [u8; IV_LEN] = iv.try_into().expect("split yields 16 bytes");
    let mut plaintext = ciphertext.to_vec();
    let mut cipher = Aes128Ctr::new(&key.aes_key().into(), &iv.into());
    cipher.apply_keystream(&mut plaintext);

    NoteOpening::parse(&plaintext)
}

fn auth_tag(key: &EncryptionKey, iv: &[u8], ciphertext: &[u8]) -> [u8; TAG_LEN] {
    let mut mac = HmacSha256::new_from_slice(key.hmac_key()).expect("HMAC accepts any key length");
    mac.update(iv);
    mac.update(ciphertext);
    let digest = mac.finalize().into_bytes();
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&digest[..TAG_LEN]);
    tag
}
