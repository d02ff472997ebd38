//! GIF89a encoding and GIF87a/89a decoding over palette-indexed frames.
//!
//! The encoder consumes a [`QuantizedSequence`] and writes the whole stream
//! into memory before returning it. The decoder produces the raw block view
//! ([`DecodedGif`]); [`compose`] renders it into full-canvas RGBA frames.

pub mod compose;
pub mod decoder;
pub mod encoder;
pub mod lzw;
pub mod progress;

pub use compose::compose;
pub use decoder::{DecodedGif, GifDecoder, GifVersion, RawFrame};
pub use encoder::GifEncoder;
pub use progress::{progress_channel, ChannelSink, NoProgress, ProgressSink};

use gifkit_types::{FrameSequence, GifError};

/// Decode and composite a GIF stream into full-canvas RGBA frames
pub fn decode_sequence(data: &[u8]) -> Result<FrameSequence, GifError> {
    let decoded = GifDecoder::new().decode(data)?;
    compose(&decoded)
}
