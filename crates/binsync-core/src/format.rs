//! On-disk encoding helpers: hex-encoded integers and `<addr-hex8>.toml`
//! filenames (§6).
//!
//! Addresses and offsets are stored as lowercase hex strings rather than
//! TOML's native integers so that diffs between two users' commits read the
//! same way a hex editor or disassembler would show them, and so that large
//! unsigned 64-bit addresses never risk TOML's integer range assumptions.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A `u64` that (de)serializes as a `"0x"`-prefixed lowercase hex string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HexU64(pub u64);

impl From<u64> for HexU64 {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl From<HexU64> for u64 {
    fn from(v: HexU64) -> Self {
        v.0
    }
}

impl Serialize for HexU64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", self.0))
    }
}

impl<'de> Deserialize<'de> for HexU64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_hex_u64(&s).map(Self).map_err(serde::de::Error::custom)
    }
}

/// A signed 64-bit quantity (stack offsets) that (de)serializes as a
/// `"0x"`/`"-0x"`-prefixed lowercase hex string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HexI64(pub i64);

impl From<i64> for HexI64 {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl From<HexI64> for i64 {
    fn from(v: HexI64) -> Self {
        v.0
    }
}

impl Serialize for HexI64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0 < 0 {
            serializer.serialize_str(&format!("-{:#x}", self.0.unsigned_abs()))
        } else {
            serializer.serialize_str(&format!("{:#x}", self.0))
        }
    }
}

impl<'de> Deserialize<'de> for HexI64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_hex_i64(&s).map(Self).map_err(serde::de::Error::custom)
    }
}

/// Parse a `"0x..."` or bare-hex string into a `u64`.
///
/// # Errors
/// Returns an error string if `s` contains no valid hex digits.
pub fn parse_hex_u64(s: &str) -> Result<u64, String> {
    let trimmed = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u64::from_str_radix(trimmed, 16).map_err(|e| format!("invalid hex integer {s:?}: {e}"))
}

/// Parse a `"0x..."`/`"-0x..."` string into an `i64`.
///
/// # Errors
/// Returns an error string if `s` contains no valid hex digits.
pub fn parse_hex_i64(s: &str) -> Result<i64, String> {
    if let Some(rest) = s.strip_prefix('-') {
        let mag = parse_hex_u64(rest)?;
        i64::try_from(mag)
            .map(|v| -v)
            .map_err(|_| format!("hex magnitude out of range for i64: {s:?}"))
    } else {
        let mag = parse_hex_u64(s)?;
        i64::try_from(mag).map_err(|_| format!("hex magnitude out of range for i64: {s:?}"))
    }
}

/// Build the filename for a function's on-disk artifact: `<addr-hex8>.toml`,
/// zero-padded to 8 lowercase hex digits (widened beyond 8 digits for
/// addresses that don't fit, rather than silently truncating).
#[must_use]
pub fn addr_filename(addr: u64) -> String {
    format!("{addr:08x}.toml")
}

/// Recover the address encoded by a filename produced by [`addr_filename`].
///
/// # Errors
/// Returns an error string if `filename` isn't `<hex>.toml`.
pub fn parse_addr_filename(filename: &str) -> Result<u64, String> {
    let stem = filename
        .strip_suffix(".toml")
        .ok_or_else(|| format!("expected a `.toml` file, got {filename:?}"))?;
    u64::from_str_radix(stem, 16).map_err(|e| format!("invalid address filename {filename:?}: {e}"))
}

/// Build the filename for a struct's on-disk artifact: `<name>.toml`.
#[must_use]
pub fn struct_filename(name: &str) -> String {
    format!("{name}.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_u64_roundtrip() {
        let v = HexU64(0x0040_1000);
        let s = toml::to_string(&v).unwrap();
        let back: HexU64 = toml::from_str(&s).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn hex_i64_negative_roundtrip() {
        let v = HexI64(-8);
        let s = toml::to_string(&v).unwrap();
        let back: HexI64 = toml::from_str(&s).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn addr_filename_zero_padded() {
        assert_eq!(addr_filename(0x1000), "00001000.toml");
    }

    #[test]
    fn addr_filename_roundtrip() {
        let addr = 0x401000;
        assert_eq!(parse_addr_filename(&addr_filename(addr)).unwrap(), addr);
    }

    #[test]
    fn parse_hex_u64_rejects_garbage() {
        assert!(parse_hex_u64("not-hex").is_err());
    }
}
