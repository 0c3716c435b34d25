//! uhs-crypto: reversible per-document text cipher for UHS hint files
//!
//! The cipher obscures hint text so a reader cannot spoil answers by opening
//! the file in a text editor. It is not meant to resist an attacker.
//!
//! ```text
//! seed (root title) ──KeySchedule──▶ CipherKey ──▶ keystream ks(i)
//!   nested-hint strings   ks(i) = key[i % n] ^ (i + 40)
//!   text hunks            ks(i) = key[i % n] ^ ((i % n) + 40)
//! printable byte c  ──▶ 0x20 + (ks(i) - (c - 0x20)) mod 95
//! ```
//!
//! The reflection is its own inverse, so `encrypt` and `decrypt` are the
//! same transform.

pub mod cipher;
pub mod schedule;

pub use cipher::{
    decrypt, decrypt_str, decrypt_str_with, encrypt, encrypt_str, encrypt_str_with, encrypt_with,
    Keystream,
};
pub use schedule::{CipherKey, FixedKeySchedule, KeySchedule, TitleKeySchedule};

/// First byte of the enciphered alphabet (space)
pub const PRINTABLE_FIRST: u8 = 0x20;

/// Last byte of the enciphered alphabet (tilde)
pub const PRINTABLE_LAST: u8 = 0x7E;

/// Number of symbols in the enciphered alphabet
pub const ALPHABET_SIZE: u32 = (PRINTABLE_LAST - PRINTABLE_FIRST) as u32 + 1;
