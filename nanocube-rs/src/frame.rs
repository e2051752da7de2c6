//! Wraps binary query results into compressed frames.
//!
//! A frame consists of the uncompressed size as 8 byte little endian integer, followed by the
//! zlib compressed payload. The size permits clients to allocate the output buffer upfront and
//! is verified when a frame is decoded.
//!
//! # Example
//!
//! ```
//! # use nanocube::frame::{compress, decompress};
//! let data = vec![42_u8; 1024];
//! let frame = compress(&data).unwrap();
//! assert_eq!(&frame[0..8], &1024_u64.to_le_bytes());
//! assert_eq!(decompress(&frame).unwrap(), data);
//! ```
use std::fmt::{Display, Formatter};
use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// The number of bytes used to encode the uncompressed size.
pub const SIZE_PREFIX_LENGTH: usize = 8;

const COMPRESSION_LEVEL: u32 = 6;

/// Enumerates the failures when encoding or decoding a frame.
#[derive(Debug)]
pub enum FrameError {
    /// The compressor reported an error.
    Compression(std::io::Error),
    /// The frame is shorter than its size prefix.
    Truncated,
    /// The payload couldn't be decompressed.
    Decompression(std::io::Error),
    /// The decompressed payload doesn't match the announced size.
    SizeMismatch {
        /// The size announced by the prefix.
        expected: u64,
        /// The number of bytes actually decompressed.
        actual: u64,
    },
}

impl Display for FrameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Compression(error) => write!(f, "Failed to compress result: {}", error),
            FrameError::Truncated => write!(f, "The frame is too short to contain a size prefix."),
            FrameError::Decompression(error) => {
                write!(f, "Failed to decompress result: {}", error)
            }
            FrameError::SizeMismatch { expected, actual } => write!(
                f,
                "The frame announces {} bytes but contains {} bytes.",
                expected, actual
            ),
        }
    }
}

impl std::error::Error for FrameError {}

/// Compresses the given data into a frame.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut frame = Vec::with_capacity(SIZE_PREFIX_LENGTH + data.len() / 2);
    frame.extend_from_slice(&(data.len() as u64).to_le_bytes());

    let mut encoder = ZlibEncoder::new(frame, Compression::new(COMPRESSION_LEVEL));
    encoder.write_all(data).map_err(FrameError::Compression)?;
    encoder.finish().map_err(FrameError::Compression)
}

/// Decodes the given frame and verifies its size.
pub fn decompress(frame: &[u8]) -> Result<Vec<u8>, FrameError> {
    if frame.len() < SIZE_PREFIX_LENGTH {
        return Err(FrameError::Truncated);
    }

    let mut prefix = [0_u8; SIZE_PREFIX_LENGTH];
    prefix.copy_from_slice(&frame[..SIZE_PREFIX_LENGTH]);
    let expected = u64::from_le_bytes(prefix);

    let mut data = Vec::with_capacity(expected.min(frame.len() as u64 * 16) as usize);
    let _ = ZlibDecoder::new(&frame[SIZE_PREFIX_LENGTH..])
        .read_to_end(&mut data)
        .map_err(FrameError::Decompression)?;
    if data.len() as u64 != expected {
        return Err(FrameError::SizeMismatch {
            expected,
            actual: data.len() as u64,
        });
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use crate::frame::{compress, decompress, FrameError, SIZE_PREFIX_LENGTH};

    #[test]
    fn empty_payloads_are_framed() {
        let frame = compress(&[]).unwrap();
        assert_eq!(&frame[..SIZE_PREFIX_LENGTH], &[0; 8]);
        assert_eq!(decompress(&frame).unwrap().is_empty(), true);
    }

    #[test]
    fn corrupted_frames_are_detected() {
        let data: Vec<u8> = (0..4096_u32).map(|i| (i % 251) as u8).collect();
        let frame = compress(&data).unwrap();

        let mut wrong_size = frame.clone();
        wrong_size[0] ^= 1;
        match decompress(&wrong_size) {
            Err(FrameError::SizeMismatch { expected, actual }) => {
                assert_eq!(expected, 4097);
                assert_eq!(actual, 4096);
            }
            other => panic!("Expected a size mismatch but got {:?}", other),
        }

        assert_eq!(decompress(&frame[..4]).is_err(), true);
        assert_eq!(decompress(&frame[..frame.len() / 2]).is_err(), true);
    }

    #[test]
    fn payloads_are_zlib_streams() {
        use std::io::{Read, Write};

        let data = b"nanocube nanocube nanocube".to_vec();
        let frame = compress(&data).unwrap();
        assert_eq!(&frame[..SIZE_PREFIX_LENGTH], &26_u64.to_le_bytes());
        assert_eq!(&frame[SIZE_PREFIX_LENGTH..SIZE_PREFIX_LENGTH + 2], &[0x78, 0x9c]);

        let mut plain = Vec::new();
        let _ = flate2::read::ZlibDecoder::new(&frame[SIZE_PREFIX_LENGTH..])
            .read_to_end(&mut plain)
            .unwrap();
        assert_eq!(plain, data);

        // Frames produced by any zlib encoder are accepted.
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::best());
        encoder.write_all(&data).unwrap();
        let mut foreign = 26_u64.to_le_bytes().to_vec();
        foreign.extend(encoder.finish().unwrap());
        assert_eq!(decompress(&foreign).unwrap(), data);
    }
}
