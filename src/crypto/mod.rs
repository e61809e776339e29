//! Per-connection stream-cipher sessions
//!
//! Each tunnel direction owns one session: the sender derives a 256-bit key
//! from SHA-256 of the shared password, draws a fresh 16-byte IV and emits
//! it ahead of the first ciphertext bytes; the receiver consumes those 16
//! bytes from the head of the inbound stream before anything can be
//! delivered. The cipher is AES-256-CFB with 128-bit feedback, applied in
//! strict byte-stream order.
//!
//! The wire format is confidentiality-only. There is no integrity
//! protection; an active attacker can flip bits undetected.
//!
//! Sessions are one-shot: they live for exactly one TCP connection and are
//! never reused.

use crate::{Error, Result};
use aes::cipher::KeyIvInit;
use aes::Aes256;
use cfb_mode::{BufDecryptor, BufEncryptor};
use sha2::{Digest, Sha256};

pub const IV_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

type CfbEnc = BufEncryptor<Aes256>;
type CfbDec = BufDecryptor<Aes256>;

/// Derive the cipher key from the shared password.
pub fn derive_key(password: &str) -> [u8; KEY_LEN] {
    Sha256::digest(password.as_bytes()).into()
}

/// Sending half of a cipher session.
///
/// The IV is generated exactly once at construction; the first call to
/// [`encrypt`](EgressCipher::encrypt) prepends it to the output.
pub struct EgressCipher {
    iv: [u8; IV_LEN],
    iv_sent: bool,
    enc: CfbEnc,
}

impl EgressCipher {
    pub fn new(key: &[u8; KEY_LEN]) -> Result<Self> {
        let mut iv = [0u8; IV_LEN];
        getrandom::getrandom(&mut iv).map_err(|e| Error::crypto(e.to_string()))?;
        let enc =
            CfbEnc::new_from_slices(key, &iv).map_err(|e| Error::crypto(e.to_string()))?;
        Ok(EgressCipher {
            iv,
            iv_sent: false,
            enc,
        })
    }

    /// Encrypt a chunk, continuing the stream. The first call returns
    /// `IV || ciphertext` (just the IV when the chunk is empty); later calls
    /// return ciphertext only.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let mut out = if self.iv_sent {
            Vec::with_capacity(plaintext.len())
        } else {
            self.iv_sent = true;
            let mut out = Vec::with_capacity(IV_LEN + plaintext.len());
            out.extend_from_slice(&self.iv);
            out
        };
        let start = out.len();
        out.extend_from_slice(plaintext);
        self.enc.encrypt(&mut out[start..]);
        out
    }
}

/// Receiving half of a cipher session.
///
/// Stays in the awaiting-IV state until the leading 16 bytes of the inbound
/// stream have arrived; the transport may deliver them split across any
/// number of reads.
pub struct IngressCipher {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
    iv_len: usize,
    dec: Option<CfbDec>,
}

impl IngressCipher {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        IngressCipher {
            key,
            iv: [0u8; IV_LEN],
            iv_len: 0,
            dec: None,
        }
    }

    /// True until the full IV has been consumed from the stream head.
    pub fn awaiting_iv(&self) -> bool {
        self.dec.is_none()
    }

    /// IV bytes consumed so far. Lets callers tell an orderly zero-byte
    /// close from a stream truncated mid-IV.
    pub fn iv_bytes_seen(&self) -> usize {
        if self.dec.is_some() {
            IV_LEN
        } else {
            self.iv_len
        }
    }

    /// Decrypt a chunk, continuing the stream. Returns the plaintext made
    /// available by this chunk; empty while the IV is still incomplete.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Vec<u8> {
        let mut data = ciphertext;
        if self.dec.is_none() {
            let take = (IV_LEN - self.iv_len).min(data.len());
            self.iv[self.iv_len..self.iv_len + take].copy_from_slice(&data[..take]);
            self.iv_len += take;
            data = &data[take..];
            if self.iv_len < IV_LEN {
                return Vec::new();
            }
            self.dec = Some(CfbDec::new(&self.key.into(), &self.iv.into()));
        }

        let mut out = data.to_vec();
        if let Some(dec) = &mut self.dec {
            dec.decrypt(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(password: &str) -> (EgressCipher, IngressCipher) {
        let key = derive_key(password);
        (EgressCipher::new(&key).unwrap(), IngressCipher::new(key))
    }

    #[test]
    fn test_derive_key_is_stable() {
        assert_eq!(derive_key("secret"), derive_key("secret"));
        assert_ne!(derive_key("secret"), derive_key("other"));
    }

    #[test]
    fn test_first_emission_carries_iv() {
        let (mut egress, _) = session("pw");
        let first = egress.encrypt(b"hello");
        assert_eq!(first.len(), IV_LEN + 5);
        let second = egress.encrypt(b"world");
        assert_eq!(second.len(), 5);
    }

    #[test]
    fn test_empty_first_emission_is_just_the_iv() {
        let (mut egress, mut ingress) = session("pw");
        let first = egress.encrypt(b"");
        assert_eq!(first.len(), IV_LEN);
        assert!(ingress.decrypt(&first).is_empty());
        assert!(!ingress.awaiting_iv());
        assert_eq!(ingress.decrypt(&egress.encrypt(b"late")), b"late");
    }

    #[test]
    fn test_round_trip_single_buffer() {
        let (mut egress, mut ingress) = session("pw");
        let wire = egress.encrypt(b"the quick brown fox");
        assert_eq!(ingress.decrypt(&wire), b"the quick brown fox");
    }

    #[test]
    fn test_round_trip_any_chunking() {
        let plaintext: Vec<u8> = (0..1024u32).map(|i| (i * 7 + 3) as u8).collect();

        for (enc_chunk, dec_chunk) in [(1, 7), (3, 1), (16, 5), (100, 333), (1024, 1)] {
            let (mut egress, mut ingress) = session("chunky");

            let mut wire = Vec::new();
            for piece in plaintext.chunks(enc_chunk) {
                wire.extend_from_slice(&egress.encrypt(piece));
            }

            let mut recovered = Vec::new();
            for piece in wire.chunks(dec_chunk) {
                recovered.extend_from_slice(&ingress.decrypt(piece));
            }
            assert_eq!(recovered, plaintext, "chunking {}x{}", enc_chunk, dec_chunk);
        }
    }

    #[test]
    fn test_iv_split_fifteen_plus_one() {
        let (mut egress, mut ingress) = session("pw");
        let wire = egress.encrypt(b"payload");

        assert!(ingress.decrypt(&wire[..15]).is_empty());
        assert!(ingress.awaiting_iv());
        assert_eq!(ingress.iv_bytes_seen(), 15);

        assert!(ingress.decrypt(&wire[15..16]).is_empty());
        assert!(!ingress.awaiting_iv());

        assert_eq!(ingress.decrypt(&wire[16..]), b"payload");
    }

    #[test]
    fn test_fresh_sessions_use_distinct_ivs() {
        let key = derive_key("pw");
        let mut a = EgressCipher::new(&key).unwrap();
        let mut b = EgressCipher::new(&key).unwrap();
        assert_ne!(a.encrypt(b"x")[..IV_LEN], b.encrypt(b"x")[..IV_LEN]);
    }

    #[test]
    fn test_wrong_key_yields_garbage() {
        let (mut egress, _) = session("alpha");
        let (_, mut ingress) = session("bravo");
        let wire = egress.encrypt(b"address header");
        assert_ne!(ingress.decrypt(&wire), b"address header");
    }
}
