//! The cipher bridge: an opaque stream cipher interposed between the packet
//! codec and the raw connection once login completes.
//!
//! AES-128 in CFB-8 mode is the one concrete implementation, matching the
//! mode the closest examples in this domain use (`aes`/`cfb8`), with a
//! block size of one byte so every send/receive byte round-trips through
//! the cipher independently.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use bytes::BytesMut;

use crate::error::Error;

type Aes128Cfb8Enc = cfb8::Encryptor<aes::Aes128>;
type Aes128Cfb8Dec = cfb8::Decryptor<aes::Aes128>;

/// A stream cipher that can encrypt outgoing bytes and decrypt incoming
/// ones. Implementations are not required to be block-aligned; AES-CFB8 is
/// a true byte stream.
pub trait Cipher: Send + Sync {
    /// Builds a cipher from the 16-byte shared secret the login handshake
    /// negotiated.
    fn new(key: &[u8; 16]) -> Self
    where
        Self: Sized;
    /// Encrypts `data` in place.
    fn encrypt(&mut self, data: &mut [u8]);
    /// Decrypts `input`, appending the plaintext to `out`.
    fn decrypt(&mut self, input: &[u8], out: &mut BytesMut);
}

/// AES-128/CFB-8, keyed with a 16-byte shared secret used as both key and
/// IV (the convention this protocol's login handshake establishes).
pub struct Aes128Cfb8Cipher {
    enc: Aes128Cfb8Enc,
    dec: Aes128Cfb8Dec,
}

impl Aes128Cfb8Cipher {
    pub fn new(key: &[u8; 16]) -> Self {
        Aes128Cfb8Cipher {
            enc: Aes128Cfb8Enc::new(key.into(), key.into()),
            dec: Aes128Cfb8Dec::new(key.into(), key.into()),
        }
    }

    pub fn from_slice(key: &[u8]) -> Result<Self, Error> {
        let key: &[u8; 16] = key
            .try_into()
            .map_err(|_| Error::BadFormat("shared secret must be 16 bytes".into()))?;
        Ok(Self::new(key))
    }
}

impl Cipher for Aes128Cfb8Cipher {
    fn new(key: &[u8; 16]) -> Self {
        Aes128Cfb8Cipher::new(key)
    }

    fn encrypt(&mut self, data: &mut [u8]) {
        // CFB-8's block size is one byte, so every byte is its own block;
        // this is the whole stream, not a per-call chunk.
        for byte in data.iter_mut() {
            let mut block = GenericArray::from_mut_slice(std::slice::from_mut(byte));
            self.enc.encrypt_block_mut(&mut block);
        }
    }

    fn decrypt(&mut self, input: &[u8], out: &mut BytesMut) {
        let start = out.len();
        out.extend_from_slice(input);
        for byte in out[start..].iter_mut() {
            let mut block = GenericArray::from_mut_slice(std::slice::from_mut(byte));
            self.dec.decrypt_block_mut(&mut block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_roundtrips() {
        let key = [7u8; 16];
        let mut enc = Aes128Cfb8Cipher::new(&key);
        let mut dec = Aes128Cfb8Cipher::new(&key);

        let mut data = b"hello, protocol".to_vec();
        let plaintext = data.clone();
        enc.encrypt(&mut data);
        assert_ne!(data, plaintext);

        let mut out = BytesMut::new();
        dec.decrypt(&data, &mut out);
        assert_eq!(&out[..], &plaintext[..]);
    }

    #[test]
    fn independent_streams_diverge() {
        // Two ciphers keyed identically but fed different data produce
        // different ciphertext byte-for-byte, confirming no block alignment
        // requirement (block size of 1).
        let key = [1u8; 16];
        let mut a = Aes128Cfb8Cipher::new(&key);
        let mut b = Aes128Cfb8Cipher::new(&key);
        let mut x = vec![0u8; 5];
        let mut y = vec![1u8; 5];
        a.encrypt(&mut x);
        b.encrypt(&mut y);
        assert_ne!(x, y);
    }
}
