//! Keystream reflection cipher over printable ASCII
//!
//! Each printable byte at position `i` is reflected around the keystream
//! value `ks(i)` inside the 95-symbol printable alphabet. Everything else
//! (newlines, control bytes, UTF-8 continuation bytes) passes through
//! untouched but still advances the position, so line structure and UTF-8
//! validity survive encryption.
//!
//! Two keystreams exist. Nested-hint strings mix the absolute position into
//! every key byte; text hunks mix in only the position within the key, so
//! the keystream repeats with the key's period.

use crate::schedule::CipherKey;
use crate::{ALPHABET_SIZE, PRINTABLE_FIRST, PRINTABLE_LAST};

/// How a key is stretched over a line of text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Keystream {
    /// `key[i % n] ^ (i + 40)`, used for nested-hint strings
    #[default]
    NestString,
    /// `key[i % n] ^ ((i % n) + 40)`, used for text hunks
    TextHunk,
}

impl Keystream {
    fn at(self, schedule: &[u8], i: usize) -> u32 {
        let slot = i % schedule.len();
        let k = u32::from(schedule[slot]);
        let mix = match self {
            Keystream::NestString => i,
            Keystream::TextHunk => slot,
        };
        k ^ (mix as u32).wrapping_add(40)
    }
}

/// Encrypt `input` under `key` with the nested-hint keystream. Applying it
/// twice restores the input.
pub fn encrypt(input: &[u8], key: &CipherKey) -> Vec<u8> {
    encrypt_with(input, key, Keystream::NestString)
}

/// Decrypt `input` under `key`.
pub fn decrypt(input: &[u8], key: &CipherKey) -> Vec<u8> {
    encrypt(input, key)
}

pub fn encrypt_with(input: &[u8], key: &CipherKey, stream: Keystream) -> Vec<u8> {
    let schedule = key.as_slice();
    if schedule.is_empty() {
        return input.to_vec();
    }

    input
        .iter()
        .enumerate()
        .map(|(i, &b)| transform_byte(b, stream.at(schedule, i)))
        .collect()
}

/// Encrypt a string with the nested-hint keystream. Only ASCII characters
/// are rewritten, and only into other printable ASCII characters, so the
/// result is always valid UTF-8.
pub fn encrypt_str(input: &str, key: &CipherKey) -> String {
    encrypt_str_with(input, key, Keystream::NestString)
}

/// Decrypt a string produced by [`encrypt_str`].
pub fn decrypt_str(input: &str, key: &CipherKey) -> String {
    encrypt_str(input, key)
}

pub fn encrypt_str_with(input: &str, key: &CipherKey, stream: Keystream) -> String {
    let schedule = key.as_slice();
    if schedule.is_empty() {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    for (i, ch) in input.char_indices() {
        if ch.is_ascii() {
            out.push(transform_byte(ch as u8, stream.at(schedule, i)) as char);
        } else {
            out.push(ch);
        }
    }
    out
}

pub fn decrypt_str_with(input: &str, key: &CipherKey, stream: Keystream) -> String {
    encrypt_str_with(input, key, stream)
}

fn transform_byte(b: u8, ks: u32) -> u8 {
    if !(PRINTABLE_FIRST..=PRINTABLE_LAST).contains(&b) {
        return b;
    }
    let pos = u32::from(b - PRINTABLE_FIRST);
    let ks = ks % ALPHABET_SIZE;
    let reflected = (ks + ALPHABET_SIZE - pos) % ALPHABET_SIZE;
    PRINTABLE_FIRST + reflected as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_vector() {
        let key = CipherKey::new(vec![1]);
        assert_eq!(encrypt(b"AA", &key), b"('".to_vec());
        assert_eq!(decrypt(b"('", &key), b"AA".to_vec());
    }

    #[test]
    fn empty_key_is_identity() {
        let key = CipherKey::new(vec![]);
        assert_eq!(encrypt(b"spoiler", &key), b"spoiler".to_vec());
        assert_eq!(encrypt_str("spoiler", &key), "spoiler");
    }

    #[test]
    fn newlines_and_controls_pass_through() {
        let key = CipherKey::new(vec![77, 12, 99]);
        let input = b"a\nb\r\n\x00\x7f\xff";
        let out = encrypt(input, &key);
        assert_eq!(out[1], b'\n');
        assert_eq!(&out[3..], &input[3..]);
    }

    #[test]
    fn output_stays_printable() {
        let key = CipherKey::new(vec![120, 3, 64, 200]);
        let out = encrypt(b"The lever is behind the painting.", &key);
        assert!(out.iter().all(|b| (PRINTABLE_FIRST..=PRINTABLE_LAST).contains(b)));
        assert_ne!(out, b"The lever is behind the painting.".to_vec());
    }

    #[test]
    fn str_and_bytes_agree_on_ascii() {
        let key = CipherKey::new(vec![5, 6, 7]);
        let text = "Use the rope on the hook.";
        assert_eq!(encrypt_str(text, &key).into_bytes(), encrypt(text.as_bytes(), &key));
    }

    #[test]
    fn non_ascii_chars_survive() {
        let key = CipherKey::new(vec![9, 8]);
        let enc = encrypt_str("café über", &key);
        assert!(enc.contains('é'));
        assert!(enc.contains('ü'));
        assert_eq!(decrypt_str(&enc, &key), "café über");
    }

    #[test]
    fn text_hunk_keystream_repeats_with_key_period() {
        let key = CipherKey::new(vec![1]);
        // key length 1: every position mixes slot 0, so equal input bytes
        // encipher identically
        assert_eq!(encrypt_with(b"AAAA", &key, Keystream::TextHunk), b"((((".to_vec());
        assert_eq!(encrypt_with(b"AA", &key, Keystream::NestString), b"('".to_vec());
    }

    #[test]
    fn keystreams_diverge_after_first_key_cycle() {
        let key = CipherKey::new(vec![10, 20]);
        let text = "Push the statue twice.";
        let nest = encrypt_str_with(text, &key, Keystream::NestString);
        let hunk = encrypt_str_with(text, &key, Keystream::TextHunk);
        assert_eq!(nest[..2], hunk[..2]);
        assert_ne!(nest, hunk);
        assert_eq!(decrypt_str_with(&hunk, &key, Keystream::TextHunk), text);
        assert_ne!(decrypt_str_with(&hunk, &key, Keystream::NestString), text);
    }

    proptest! {
        #[test]
        fn text_hunk_is_an_involution(
            text in "[ -~]{0,200}",
            key in proptest::collection::vec(any::<u8>(), 0..=32),
        ) {
            let key = CipherKey::new(key);
            let enc = encrypt_str_with(&text, &key, Keystream::TextHunk);
            prop_assert_eq!(decrypt_str_with(&enc, &key, Keystream::TextHunk), text);
        }

        #[test]
        fn encrypt_is_an_involution(
            data in proptest::collection::vec(any::<u8>(), 0..=2048),
            key in proptest::collection::vec(any::<u8>(), 0..=64),
        ) {
            let key = CipherKey::new(key);
            let twice = decrypt(&encrypt(&data, &key), &key);
            prop_assert_eq!(twice, data);
        }

        #[test]
        fn encrypt_preserves_length(
            data in proptest::collection::vec(any::<u8>(), 0..=512),
            key in proptest::collection::vec(any::<u8>(), 1..=16),
        ) {
            let key = CipherKey::new(key);
            prop_assert_eq!(encrypt(&data, &key).len(), data.len());
        }

        #[test]
        fn str_roundtrip(text in "\\PC{0,200}", key in proptest::collection::vec(any::<u8>(), 1..=16)) {
            let key = CipherKey::new(key);
            prop_assert_eq!(decrypt_str(&encrypt_str(&text, &key), &key), text);
        }
    }
}
