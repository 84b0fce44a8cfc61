//! 12-byte document identifiers rendered as 24 lowercase hex characters.
//! Layout: 4-byte big-endian unix seconds, 5 process-random bytes, 3-byte counter.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use tracing::warn;

use crate::error::{AppError, AppResult};

static PROCESS_UNIQUE: Lazy<[u8; 5]> = Lazy::new(random_bytes::<5>);

static COUNTER: Lazy<AtomicU32> = Lazy::new(|| AtomicU32::new(u32::from_be_bytes(random_bytes::<4>()) & 0x00FF_FFFF));

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    if let Err(e) = getrandom::getrandom(&mut buf) {
        warn!(target: "docweave::store", "getrandom failed ({}); seeding object ids from the clock", e);
        buf = clock_seed::<N>();
    }
    buf
}

/// Nanosecond clock mixed with the process id. N must not exceed 16.
fn clock_seed<const N: usize>() -> [u8; N] {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    let mixed = nanos ^ ((std::process::id() as u128) << 64);
    let mut buf = [0u8; N];
    buf.copy_from_slice(&mixed.to_le_bytes()[..N]);
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    pub fn new() -> Self {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;
        let mut b = [0u8; 12];
        b[0..4].copy_from_slice(&secs.to_be_bytes());
        b[4..9].copy_from_slice(&*PROCESS_UNIQUE);
        b[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        ObjectId(b)
    }

    pub fn parse_hex(s: &str) -> AppResult<Self> {
        if !Self::is_valid_hex(s) {
            return Err(AppError::user("invalid_object_id".to_string(), format!("'{}' is not a 24-character hex identifier", s)));
        }
        let mut b = [0u8; 12];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = hex_nibble(chunk[0]);
            let lo = hex_nibble(chunk[1]);
            b[i] = (hi << 4) | lo;
        }
        Ok(ObjectId(b))
    }

    pub fn is_valid_hex(s: &str) -> bool {
        s.len() == 24 && s.bytes().all(|c| c.is_ascii_hexdigit())
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(24);
        for byte in self.0.iter() { out.push_str(&format!("{:02x}", byte)); }
        out
    }

    pub fn timestamp_secs(&self) -> u32 { u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]) }
}

impl Default for ObjectId {
    fn default() -> Self { Self::new() }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.to_hex()) }
}

fn hex_nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip_is_lowercase() {
        let id = ObjectId::parse_hex("5F1D7A2B3C4D5E6F70819203").unwrap();
        assert_eq!(id.to_hex(), "5f1d7a2b3c4d5e6f70819203");
    }

    #[test]
    fn generated_ids_are_unique_and_valid() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_ne!(a, b);
        assert!(ObjectId::is_valid_hex(&a.to_hex()));
    }

    #[test]
    fn rejects_short_or_non_hex() {
        assert!(ObjectId::parse_hex("abc").is_err());
        assert!(ObjectId::parse_hex("zz1d7a2b3c4d5e6f70819203").is_err());
    }

    #[test]
    fn clock_seed_fills_the_requested_width() {
        assert_ne!(clock_seed::<5>(), [0u8; 5]);
        assert_ne!(clock_seed::<16>(), [0u8; 16]);
    }
}
