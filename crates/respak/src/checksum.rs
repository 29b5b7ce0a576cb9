//! CRC-32 integrity checks
//!
//! Entries optionally carry the CRC-32 (IEEE) of their original bytes. The
//! file table is always covered by a CRC-32 stored in the header.

/// CRC-32 of `data`
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Compare an optional stored checksum with `data`
///
/// Returns the computed value on mismatch. Absent checksums always pass.
pub fn verify(expected: Option<u32>, data: &[u8]) -> Result<(), u32> {
    match expected {
        None => Ok(()),
        Some(expected) => {
            let actual = crc32(data);
            if actual == expected { Ok(()) } else { Err(actual) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_value() {
        // Standard CRC-32 check value
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn test_verify() {
        assert!(verify(None, b"anything").is_ok());
        assert!(verify(Some(0xCBF4_3926), b"123456789").is_ok());
        assert_eq!(verify(Some(1), b"123456789"), Err(0xCBF4_3926));
        // An empty file legitimately hashes to zero
        assert!(verify(Some(0), b"").is_ok());
    }
}
