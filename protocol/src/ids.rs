//! Identifier generators.
//!
//! Fragments and branches get short pronounceable ids
//! (`pr-bokura`, `br-miseta`) built by alternating consonants and vowels;
//! stories, providers, and generation logs get millisecond-timestamp ids
//! in base36 (`story-mf1x2k9`). The pronounceable alphabet gives about
//! 274k distinct ids per prefix.

use rand::Rng;

use crate::fragment::FragmentType;

const CONSONANTS: &[u8] = b"bdfgkmnprstvz";
const VOWELS: &[u8] = b"aeiou";

/// Six-letter pronounceable suffix: consonant-vowel three times over.
pub fn pronounceable() -> String {
    let mut rng = rand::rng();
    let mut out = String::with_capacity(6);
    for _ in 0..3 {
        out.push(CONSONANTS[rng.random_range(0..CONSONANTS.len())] as char);
        out.push(VOWELS[rng.random_range(0..VOWELS.len())] as char);
    }
    out
}

/// New fragment id for the given type, e.g. `ch-bokura`.
pub fn fragment_id(kind: &FragmentType) -> String {
    format!("{}-{}", kind.prefix(), pronounceable())
}

/// New branch id, e.g. `br-miseta`.
pub fn branch_id() -> String {
    format!("br-{}", pronounceable())
}

/// New folder id, e.g. `fld-rakuno`.
pub fn folder_id() -> String {
    format!("fld-{}", pronounceable())
}

/// New story id from the current wall clock.
pub fn story_id() -> String {
    format!("story-{}", base36(now_ms()))
}

/// New provider id from the current wall clock.
pub fn provider_id() -> String {
    format!("prov-{}", base36(now_ms()))
}

/// New generation-log id from the current wall clock.
pub fn log_id() -> String {
    format!("gen-{}", base36(now_ms()))
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).expect("base36 digits are ascii")
}
