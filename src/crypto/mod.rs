//! Directory encryption: AES-256-CFB (128-bit feedback) with a fixed key.
//!
//! Only the directory region (entry records + block-size table) is ever
//! encrypted; header and entry data stay in the clear.  The key is embedded
//! in the format, not supplied by the user, and the IV is all zeros, so the
//! transform is deterministic and length preserving.

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use aes::Aes256;

type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;

/// Fixed directory key shared by every archive of this format.
pub const DIRECTORY_KEY: [u8; 32] = [
    0xC5, 0x3D, 0xB2, 0x38, 0x70, 0xA1, 0xA2, 0xF7,
    0x1C, 0xAE, 0x64, 0x06, 0x1F, 0xDD, 0x0E, 0x11,
    0x57, 0x30, 0x9D, 0xC8, 0x52, 0x04, 0xD4, 0xC5,
    0xBF, 0xDF, 0x25, 0x09, 0x0D, 0xF2, 0x57, 0x2C,
];

const DIRECTORY_IV: [u8; 16] = [0u8; 16];

/// Encrypt the directory region in place.
pub fn encrypt_directory(buf: &mut [u8]) {
    Aes256CfbEnc::new(&DIRECTORY_KEY.into(), &DIRECTORY_IV.into()).encrypt(buf);
}

/// Decrypt the directory region in place.
pub fn decrypt_directory(buf: &mut [u8]) {
    Aes256CfbDec::new(&DIRECTORY_KEY.into(), &DIRECTORY_IV.into()).decrypt(buf);
}
