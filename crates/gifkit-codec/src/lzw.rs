//! LZW image data and data sub-block framing

use gifkit_types::GifError;
use weezl::{decode::Decoder as LzwDecoder, encode::Encoder as LzwEncoder, BitOrder};

/// Largest payload of a single data sub-block
pub const MAX_SUB_BLOCK: usize = 0xFF;

/// LZW minimum code size for a color table with `2 << table_bits` entries.
/// GIF requires at least 2.
pub fn min_code_size(table_bits: u8) -> u8 {
    (table_bits + 1).max(2)
}

/// Compress palette indices. Every index must be below `1 << min_code_size`.
pub fn compress(indices: &[u8], min_code_size: u8) -> Result<Vec<u8>, GifError> {
    LzwEncoder::new(BitOrder::Lsb, min_code_size)
        .encode(indices)
        .map_err(|e| GifError::EncodeError {
            message: format!("LZW compression failed: {}", e),
        })
}

/// Decompress image data into exactly `expected` indices
pub fn decompress(data: &[u8], min_code_size: u8, expected: usize) -> Result<Vec<u8>, GifError> {
    if !(2..=8).contains(&min_code_size) {
        return Err(GifError::MalformedGif {
            message: format!("invalid LZW minimum code size {}", min_code_size),
        });
    }

    let mut decoder = LzwDecoder::new(BitOrder::Lsb, min_code_size);
    let mut indices = Vec::with_capacity(expected);
    let result = decoder.into_vec(&mut indices).decode_all(data);
    if let Err(e) = result.status {
        return Err(GifError::MalformedGif {
            message: format!("corrupt LZW data: {}", e),
        });
    }

    if indices.len() < expected {
        return Err(GifError::MalformedGif {
            message: format!(
                "image data truncated: {} of {} pixels",
                indices.len(),
                expected
            ),
        });
    }
    indices.truncate(expected);
    Ok(indices)
}

/// Write `data` as length-prefixed sub-blocks followed by the block terminator
pub fn write_sub_blocks(output: &mut Vec<u8>, data: &[u8]) {
    for chunk in data.chunks(MAX_SUB_BLOCK) {
        output.push(chunk.len() as u8);
        output.extend_from_slice(chunk);
    }
    output.push(0);
}
