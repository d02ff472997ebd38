use std::cell::OnceCell;
use std::path::Path;

use gifkit_codec::decode_sequence;
use gifkit_types::{EncodeOptions, Frame, FrameSequence, GifError};
use tracing::debug;

use crate::builder::{create_gif, GifBuilder};
use crate::source::FrameSource;

/// Read an existing GIF. Decoding happens on first use.
pub fn read_gif(source: impl Into<Vec<u8>>) -> GifReader {
    GifReader::new(source.into())
}

/// Lazily decoded GIF; the first decode result, success or failure, is kept
#[derive(Debug, Clone)]
pub struct GifReader {
    bytes: Vec<u8>,
    decoded: OnceCell<Result<FrameSequence, GifError>>,
}

impl GifReader {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            decoded: OnceCell::new(),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, GifError> {
        Ok(Self::new(std::fs::read(path)?))
    }

    /// Composited frames on the full logical screen
    pub fn sequence(&self) -> Result<&FrameSequence, GifError> {
        let decoded = self.decoded.get_or_init(|| {
            debug!(stage = "decode", bytes = self.bytes.len(), "Decoding GIF");
            decode_sequence(&self.bytes)
        });
        decoded.as_ref().map_err(Clone::clone)
    }

    /// Each frame as its own RGBA image with delay and disposal
    pub fn to_frames(&self) -> Result<Vec<Frame>, GifError> {
        Ok(self.sequence()?.frames().to_vec())
    }

    /// Start a new GIF from these frames with fresh options
    pub fn to_gif(&self, options: EncodeOptions) -> Result<GifBuilder, GifError> {
        let sequence = self.sequence()?.clone();
        Ok(create_gif(options).add_frame(FrameSource::Sequence(sequence)))
    }
}
