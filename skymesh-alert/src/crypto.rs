//! Channel PSK encryption: AES-CTR with a random 96-bit nonce.
//!
//! Keys are base64-encoded 16 or 32 bytes (AES-128 / AES-256). The
//! single-byte value `AQ==` selects the well-known mesh default key.
//! Wire format: `nonce (12 bytes) || ciphertext`. The channel hash is
//! the XOR of the channel name bytes and key bytes, used by receivers to
//! pick a decryption key without trial decryption.

use aes::cipher::{KeyIvInit, StreamCipher};
use base64::prelude::*;
use rand::RngCore;

use crate::{AlertError, Result};

type Aes128Ctr = ctr::Ctr32BE<aes::Aes128>;
type Aes256Ctr = ctr::Ctr32BE<aes::Aes256>;

/// Default mesh channel key, selected by the base64 value "AQ==".
const DEFAULT_KEY: [u8; 16] = [
    0xd4, 0xf1, 0xbb, 0x3a, 0x20, 0x29, 0x07, 0x59, 0xf0, 0xbc, 0xff, 0xab, 0xcf, 0x4e, 0x69,
    0x01,
];

const NONCE_LEN: usize = 12;

/// A parsed channel pre-shared key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKey {
    Aes128([u8; 16]),
    Aes256([u8; 32]),
}

impl ChannelKey {
    /// Parse a base64 PSK: 1 byte `0x01` selects the default key,
    /// 16 or 32 bytes select AES-128/AES-256.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let raw = BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|e| AlertError::InvalidKey(e.to_string()))?;

        match raw.as_slice() {
            [0x01] => Ok(ChannelKey::Aes128(DEFAULT_KEY)),
            bytes if bytes.len() == 16 => {
                let mut key = [0u8; 16];
                key.copy_from_slice(bytes);
                Ok(ChannelKey::Aes128(key))
            }
            bytes if bytes.len() == 32 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(bytes);
                Ok(ChannelKey::Aes256(key))
            }
            bytes => Err(AlertError::InvalidKey(format!(
                "expected 1, 16 or 32 bytes, got {}",
                bytes.len()
            ))),
        }
    }

    fn key_bytes(&self) -> &[u8] {
        match self {
            ChannelKey::Aes128(k) => k,
            ChannelKey::Aes256(k) => k,
        }
    }

    fn apply_keystream(&self, iv: &[u8; 16], data: &mut [u8]) {
        match self {
            ChannelKey::Aes128(key) => {
                let mut cipher = Aes128Ctr::new(key.into(), iv.into());
                cipher.apply_keystream(data);
            }
            ChannelKey::Aes256(key) => {
                let mut cipher = Aes256Ctr::new(key.into(), iv.into());
                cipher.apply_keystream(data);
            }
        }
    }

    /// Encrypt: random 96-bit nonce prepended to the CTR ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        self.encrypt_with_nonce(&nonce, plaintext)
    }

    fn encrypt_with_nonce(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; 16];
        iv[..NONCE_LEN].copy_from_slice(nonce);

        let mut out = Vec::with_capacity(NONCE_LEN + plaintext.len());
        out.extend_from_slice(nonce);
        out.extend_from_slice(plaintext);
        self.apply_keystream(&iv, &mut out[NONCE_LEN..]);
        out
    }

    /// Decrypt a `nonce || ciphertext` blob.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_LEN {
            return Err(AlertError::InvalidKey("ciphertext too short".into()));
        }
        let mut iv = [0u8; 16];
        iv[..NONCE_LEN].copy_from_slice(&blob[..NONCE_LEN]);

        let mut out = blob[NONCE_LEN..].to_vec();
        self.apply_keystream(&iv, &mut out);
        Ok(out)
    }

    /// Channel hash: XOR of channel name and key bytes.
    pub fn channel_hash(&self, name: &str) -> u8 {
        let mut xor = 0u8;
        for b in name.bytes() {
            xor ^= b;
        }
        for b in self.key_bytes() {
            xor ^= b;
        }
        xor
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_key_selector() {
        let key = ChannelKey::from_base64("AQ==").unwrap();
        assert_eq!(key, ChannelKey::Aes128(DEFAULT_KEY));
    }

    #[test]
    fn test_key_lengths() {
        let k16 = BASE64_STANDARD.encode([0x42u8; 16]);
        assert!(matches!(
            ChannelKey::from_base64(&k16).unwrap(),
            ChannelKey::Aes128(_)
        ));

        let k32 = BASE64_STANDARD.encode([0x42u8; 32]);
        assert!(matches!(
            ChannelKey::from_base64(&k32).unwrap(),
            ChannelKey::Aes256(_)
        ));

        let k20 = BASE64_STANDARD.encode([0x42u8; 20]);
        assert!(ChannelKey::from_base64(&k20).is_err());
        assert!(ChannelKey::from_base64("not base64!!").is_err());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = ChannelKey::from_base64("AQ==").unwrap();
        let plaintext = b"ALERT test: KLM1023 [4840D6]";

        let blob = key.encrypt(plaintext);
        assert_eq!(blob.len(), NONCE_LEN + plaintext.len());
        assert_ne!(&blob[NONCE_LEN..], plaintext.as_slice());

        let decrypted = key.decrypt(&blob).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_roundtrip_aes256() {
        let k32 = BASE64_STANDARD.encode([0x13u8; 32]);
        let key = ChannelKey::from_base64(&k32).unwrap();
        let blob = key.encrypt(b"payload");
        assert_eq!(key.decrypt(&blob).unwrap(), b"payload");
    }

    #[test]
    fn test_nonce_randomized() {
        let key = ChannelKey::from_base64("AQ==").unwrap();
        let a = key.encrypt(b"same message");
        let b = key.encrypt(b"same message");
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN], "nonces should differ");
        assert_ne!(a[NONCE_LEN..], b[NONCE_LEN..], "ciphertexts should differ");
    }

    #[test]
    fn test_wrong_key_garbles() {
        let key_a = ChannelKey::from_base64(&BASE64_STANDARD.encode([1u8; 16])).unwrap();
        let key_b = ChannelKey::from_base64(&BASE64_STANDARD.encode([2u8; 16])).unwrap();
        let blob = key_a.encrypt(b"secret");
        assert_ne!(key_b.decrypt(&blob).unwrap(), b"secret");
    }

    #[test]
    fn test_decrypt_short_blob_rejected() {
        let key = ChannelKey::from_base64("AQ==").unwrap();
        assert!(key.decrypt(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_channel_hash_stable() {
        let key = ChannelKey::from_base64("AQ==").unwrap();
        let h1 = key.channel_hash("alerts");
        let h2 = key.channel_hash("alerts");
        assert_eq!(h1, h2);
        assert_ne!(h1, key.channel_hash("other"));
    }
}
