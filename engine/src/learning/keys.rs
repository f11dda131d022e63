//! Monotonic entry keys
//!
//! Learning-log entries are keyed by a 26-character Crockford-base32 string:
//! 48 bits of millisecond timestamp followed by an 80-bit tail combining a
//! per-process seed with a sequence counter. Keys are strictly increasing
//! within a process even when the wall clock stalls or steps backwards;
//! ordering is assigned by the generator, not the clock alone, and
//! same-millisecond ties are broken by the counter. The seed keeps two
//! processes that append in the same millisecond from ever minting the same
//! key. Fixed-width base32 makes lexicographic order equal to issue order.

use std::sync::Mutex;

/// Crockford base32 alphabet (no I, L, O, U)
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Timestamp portion width: 10 chars = 50 bits, enough for 48-bit millis
const TIME_CHARS: usize = 10;

/// Tail portion width: 16 chars = 80 bits (48-bit seed + 32-bit counter)
const TAIL_CHARS: usize = 16;

/// Per-process monotonic key generator
#[derive(Debug)]
pub struct KeyGen {
    seed: u64,
    state: Mutex<(u64, u64)>,
}

impl Default for KeyGen {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGen {
    pub fn new() -> Self {
        // Cheap process-unique seed; collisions would need two processes
        // with the same pid bits starting in the same nanosecond
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
        let seed = (u64::from(std::process::id()) << 32) ^ nanos;
        Self {
            seed: seed & 0xFFFF_FFFF_FFFF,
            state: Mutex::new((0, 0)),
        }
    }

    /// Issue the next key. Strictly greater than every key issued before it
    /// by this generator.
    pub fn next_key(&self) -> String {
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;

        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (last_ms, counter) = *state;

        // Never let the recorded millisecond move backwards
        let ms = now_ms.max(last_ms);
        let counter = counter.wrapping_add(1) & 0xFFFF_FFFF;
        *state = (ms, counter);

        let tail = ((self.seed as u128) << 32) | counter as u128;

        let mut key = String::with_capacity(TIME_CHARS + TAIL_CHARS);
        encode_fixed(ms as u128, TIME_CHARS, &mut key);
        encode_fixed(tail, TAIL_CHARS, &mut key);
        key
    }
}

/// Encode `value` as exactly `width` base32 characters, big-endian
fn encode_fixed(value: u128, width: usize, out: &mut String) {
    let mut chars = [0u8; 26];
    let mut v = value;
    for slot in chars.iter_mut().take(width).rev() {
        *slot = ALPHABET[(v & 0x1f) as usize];
        v >>= 5;
    }
    for &c in chars.iter().take(width) {
        out.push(c as char);
    }
}

/// Parse the millisecond timestamp back out of a key (for diagnostics)
pub fn key_timestamp_ms(key: &str) -> Option<u64> {
    if key.len() != TIME_CHARS + TAIL_CHARS {
        return None;
    }
    let mut value: u64 = 0;
    for c in key[..TIME_CHARS].bytes() {
        let digit = ALPHABET.iter().position(|&a| a == c)? as u64;
        value = value.checked_shl(5)?.checked_add(digit)?;
    }
    Some(value)
}
