//! Per-entry compression
//!
//! Every entry is compressed independently with one [`Algorithm`]. The
//! algorithm id stored in the file table is the only thing the decoder needs;
//! `Fast` and `HighRatio` produce the same LZ4 block format and share one
//! decoder.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};

/// Compression level handed to the LZ4-HC encoder (LZ4HC_CLEVEL_MAX)
const LZ4_HC_LEVEL: i32 = 12;

/// Upper bound on the LZ4 block expansion ratio
///
/// A single LZ4 sequence can describe at most 255 output bytes per input byte
/// of length extension, so anything claiming more is not a valid block.
const LZ4_MAX_RATIO: u64 = 255;

/// Upper bound on the deflate expansion ratio (RFC1951 tops out near 1032:1)
const DEFLATE_MAX_RATIO: u64 = 1032;

/// Slack added to ratio checks so tiny payloads are not rejected
const RATIO_SLACK: u64 = 64;

/// Compression algorithm applied to an archive's entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Algorithm {
    /// Stored as-is
    #[default]
    #[serde(alias = "store")]
    None = 0,
    /// LZ4 block, tuned for speed
    #[serde(rename = "lz4", alias = "fast")]
    Fast = 1,
    /// LZ4-HC block, slower to encode, decoded like [`Algorithm::Fast`]
    #[serde(rename = "lz4hc", alias = "highratio", alias = "high-ratio")]
    HighRatio = 2,
    /// Raw RFC1951 deflate stream
    #[serde(rename = "rfc1951", alias = "deflate")]
    Deflate = 3,
}

impl Algorithm {
    /// All algorithms, in id order
    pub const ALL: [Self; 4] = [Self::None, Self::Fast, Self::HighRatio, Self::Deflate];

    /// Parse an algorithm from its stored id
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::None),
            1 => Some(Self::Fast),
            2 => Some(Self::HighRatio),
            3 => Some(Self::Deflate),
            _ => None,
        }
    }

    /// Stored id of this algorithm
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Canonical name, as accepted by [`FromStr`]
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Fast => "lz4",
            Self::HighRatio => "lz4hc",
            Self::Deflate => "rfc1951",
        }
    }

    /// Largest original size a payload of `compressed_size` bytes can decode to
    pub fn max_original_size(self, compressed_size: u64) -> u64 {
        match self {
            Self::None => compressed_size,
            Self::Fast | Self::HighRatio => compressed_size
                .saturating_mul(LZ4_MAX_RATIO)
                .saturating_add(RATIO_SLACK),
            Self::Deflate => compressed_size
                .saturating_mul(DEFLATE_MAX_RATIO)
                .saturating_add(RATIO_SLACK),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "store" => Ok(Self::None),
            "lz4" | "fast" => Ok(Self::Fast),
            "lz4hc" | "highratio" | "high-ratio" => Ok(Self::HighRatio),
            "rfc1951" | "deflate" => Ok(Self::Deflate),
            _ => Err(CodecError::UnknownAlgorithmName(s.to_string())),
        }
    }
}

impl TryFrom<u8> for Algorithm {
    type Error = CodecError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::from_id(id).ok_or(CodecError::UnknownAlgorithm(id))
    }
}

/// Compress `data` with `algorithm`
///
/// Empty input produces an empty payload for every algorithm.
pub fn compress(data: &[u8], algorithm: Algorithm) -> CodecResult<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    match algorithm {
        Algorithm::None => Ok(data.to_vec()),
        Algorithm::Fast => Ok(lz4_flex::block::compress(data)),
        Algorithm::HighRatio => lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(LZ4_HC_LEVEL)),
            false,
        )
        .map_err(|e| CodecError::Encode {
            algorithm,
            reason: e.to_string(),
        }),
        Algorithm::Deflate => {
            let mut encoder = DeflateEncoder::new(
                Vec::with_capacity(data.len() / 2),
                Compression::default(),
            );
            encoder
                .write_all(data)
                .and_then(|()| encoder.finish())
                .map_err(|e| CodecError::Encode {
                    algorithm,
                    reason: e.to_string(),
                })
        }
    }
}

/// Decompress a payload that was produced by [`compress`]
///
/// Fails with [`CodecError::CorruptEntry`] when the decoded length differs
/// from `original_size`, and with [`CodecError::Decode`] when the stream is
/// not valid for `algorithm`.
pub fn decompress(data: &[u8], original_size: u64, algorithm: Algorithm) -> CodecResult<Vec<u8>> {
    if original_size > algorithm.max_original_size(data.len() as u64) {
        return Err(CodecError::CorruptEntry {
            expected: original_size,
            actual: algorithm.max_original_size(data.len() as u64),
        });
    }

    let expected = usize::try_from(original_size).map_err(|_| CodecError::Decode {
        algorithm,
        reason: format!("original size {original_size} does not fit in memory"),
    })?;

    if data.is_empty() {
        return check_len(Vec::new(), original_size);
    }

    let decoded = match algorithm {
        Algorithm::None => data.to_vec(),
        Algorithm::Fast | Algorithm::HighRatio => lz4_flex::block::decompress(data, expected)
            .map_err(|e| CodecError::Decode {
                algorithm,
                reason: e.to_string(),
            })?,
        Algorithm::Deflate => {
            // One extra byte lets an overlong stream show up as a size mismatch
            let mut decoder = DeflateDecoder::new(data).take(original_size.saturating_add(1));
            let mut decoded = Vec::with_capacity(expected);
            decoder
                .read_to_end(&mut decoded)
                .map_err(|e| CodecError::Decode {
                    algorithm,
                    reason: e.to_string(),
                })?;
            decoded
        }
    };

    check_len(decoded, original_size)
}

fn check_len(decoded: Vec<u8>, original_size: u64) -> CodecResult<Vec<u8>> {
    if decoded.len() as u64 == original_size {
        Ok(decoded)
    } else {
        Err(CodecError::CorruptEntry {
            expected: original_size,
            actual: decoded.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        b"resource archives pack many small files; ".repeat(200)
    }

    #[test]
    fn test_round_trip_all_algorithms() {
        let data = sample();
        for algorithm in Algorithm::ALL {
            let compressed = compress(&data, algorithm).expect("Test operation should succeed");
            let decompressed = decompress(&compressed, data.len() as u64, algorithm)
                .expect("Test operation should succeed");
            assert_eq!(decompressed, data, "round trip failed for {algorithm}");
        }
    }

    #[test]
    fn test_compressible_input_shrinks() {
        let data = sample();
        for algorithm in [Algorithm::Fast, Algorithm::HighRatio, Algorithm::Deflate] {
            let compressed = compress(&data, algorithm).expect("Test operation should succeed");
            assert!(
                compressed.len() < data.len(),
                "{algorithm} did not shrink compressible input"
            );
        }
    }

    #[test]
    fn test_high_ratio_not_worse_than_fast() {
        let data = sample();
        let fast = compress(&data, Algorithm::Fast).expect("Test operation should succeed");
        let high = compress(&data, Algorithm::HighRatio).expect("Test operation should succeed");
        assert!(high.len() <= fast.len());
    }

    #[test]
    fn test_high_ratio_uses_fast_decoder() {
        let data = sample();
        let high = compress(&data, Algorithm::HighRatio).expect("Test operation should succeed");
        let decoded = decompress(&high, data.len() as u64, Algorithm::Fast)
            .expect("Test operation should succeed");
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_empty_input() {
        for algorithm in Algorithm::ALL {
            let compressed = compress(&[], algorithm).expect("Test operation should succeed");
            assert!(compressed.is_empty());
            let decompressed =
                decompress(&compressed, 0, algorithm).expect("Test operation should succeed");
            assert!(decompressed.is_empty());
        }
    }

    #[test]
    fn test_size_mismatch_is_corrupt_entry() {
        let data = sample();
        for algorithm in Algorithm::ALL {
            let compressed = compress(&data, algorithm).expect("Test operation should succeed");

            let result = decompress(&compressed, data.len() as u64 - 1, algorithm);
            assert!(result.is_err(), "{algorithm} accepted a short original size");

            let result = decompress(&compressed, data.len() as u64 + 1, algorithm);
            assert!(result.is_err(), "{algorithm} accepted a long original size");
        }

        let err = decompress(b"abc", 4, Algorithm::None).unwrap_err();
        assert!(matches!(err, CodecError::CorruptEntry { .. }));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let garbage = [0xFFu8; 32];
        for algorithm in [Algorithm::Fast, Algorithm::HighRatio, Algorithm::Deflate] {
            assert!(decompress(&garbage, 1000, algorithm).is_err());
        }
    }

    #[test]
    fn test_absurd_original_size_rejected_before_allocation() {
        let err = decompress(&[0x10, 0x41], u64::MAX, Algorithm::Fast).unwrap_err();
        assert!(matches!(err, CodecError::CorruptEntry { .. }));
    }

    #[test]
    fn test_algorithm_ids() {
        for algorithm in Algorithm::ALL {
            assert_eq!(Algorithm::from_id(algorithm.id()), Some(algorithm));
            assert_eq!(Algorithm::try_from(algorithm.id()).ok(), Some(algorithm));
        }
        assert_eq!(Algorithm::from_id(4), None);
        assert!(matches!(
            Algorithm::try_from(200),
            Err(CodecError::UnknownAlgorithm(200))
        ));
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!("lz4".parse::<Algorithm>().ok(), Some(Algorithm::Fast));
        assert_eq!("LZ4HC".parse::<Algorithm>().ok(), Some(Algorithm::HighRatio));
        assert_eq!("deflate".parse::<Algorithm>().ok(), Some(Algorithm::Deflate));
        assert_eq!("rfc1951".parse::<Algorithm>().ok(), Some(Algorithm::Deflate));
        assert_eq!("none".parse::<Algorithm>().ok(), Some(Algorithm::None));
        assert!("zstd".parse::<Algorithm>().is_err());

        for algorithm in Algorithm::ALL {
            assert_eq!(algorithm.to_string().parse::<Algorithm>().ok(), Some(algorithm));
        }
    }

    #[test]
    fn test_algorithm_serde_names() {
        let json = serde_json::to_string(&Algorithm::HighRatio).expect("Test operation should succeed");
        assert_eq!(json, "\"lz4hc\"");
        let parsed: Algorithm =
            serde_json::from_str("\"deflate\"").expect("Test operation should succeed");
        assert_eq!(parsed, Algorithm::Deflate);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;
        use proptest::test_runner::TestCaseError;

        fn algorithm() -> impl Strategy<Value = Algorithm> {
            prop_oneof![
                Just(Algorithm::None),
                Just(Algorithm::Fast),
                Just(Algorithm::HighRatio),
                Just(Algorithm::Deflate),
            ]
        }

        proptest! {
            #[test]
            fn codec_round_trip_always_works(
                data in prop::collection::vec(any::<u8>(), 0..4096),
                algorithm in algorithm()
            ) {
                let compressed = compress(&data, algorithm)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                let decompressed = decompress(&compressed, data.len() as u64, algorithm)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(decompressed, data);
            }
        }
    }
}
