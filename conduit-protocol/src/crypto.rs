//! AES-128 CFB8 stream ciphers.
//!
//! The cipher is stateful (CFB8 keeps a shift register), so each half of a
//! connection owns its own instance and it is enabled at most once.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, generic_array::GenericArray};

/// An AES-128 CFB-8 encryptor.
pub type Aes128Cfb8Enc = cfb8::Encryptor<aes::Aes128>;
/// An AES-128 CFB-8 decryptor.
pub type Aes128Cfb8Dec = cfb8::Decryptor<aes::Aes128>;

/// Creates an encryptor from a shared secret, used as both key and IV.
///
/// # Panics
/// - If the key is not 16 bytes.
#[must_use]
pub fn encryptor(key: &[u8; 16]) -> Aes128Cfb8Enc {
    Aes128Cfb8Enc::new_from_slices(key, key).expect("invalid key")
}

/// Creates a decryptor from a shared secret, used as both key and IV.
///
/// # Panics
/// - If the key is not 16 bytes.
#[must_use]
pub fn decryptor(key: &[u8; 16]) -> Aes128Cfb8Dec {
    Aes128Cfb8Dec::new_from_slices(key, key).expect("invalid key")
}

/// Encrypts a buffer in place. The block size is 1 byte, so any length works.
pub fn encrypt_in_place(cipher: &mut Aes128Cfb8Enc, data: &mut [u8]) {
    for byte in data {
        let block = GenericArray::from_mut_slice(std::slice::from_mut(byte));
        cipher.encrypt_block_mut(block);
    }
}

/// Decrypts a buffer in place.
pub fn decrypt_in_place(cipher: &mut Aes128Cfb8Dec, data: &mut [u8]) {
    for byte in data {
        let block = GenericArray::from_mut_slice(std::slice::from_mut(byte));
        cipher.decrypt_block_mut(block);
    }
}
