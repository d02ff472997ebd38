use std::path::Path;

use gifkit_codec::GifDecoder;
use gifkit_types::{Frame, GifError};
use image::{DynamicImage, ImageFormat, RgbaImage};
use tracing::info;

use crate::reader::GifReader;

/// An encoded GIF held in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GifImage {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    frame_count: usize,
}

impl GifImage {
    pub(crate) fn from_parts(bytes: Vec<u8>, width: u32, height: u32, frame_count: usize) -> Self {
        Self {
            bytes,
            width,
            height,
            frame_count,
        }
    }

    /// Wrap an existing GIF stream, checking its block structure
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, GifError> {
        let decoded = GifDecoder::new().decode(&bytes)?;
        Ok(Self::from_parts(
            bytes,
            decoded.width as u32,
            decoded.height as u32,
            decoded.frames.len(),
        ))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn reader(&self) -> GifReader {
        GifReader::new(self.bytes.clone())
    }

    pub fn to_frames(&self) -> Result<Vec<Frame>, GifError> {
        self.reader().to_frames()
    }

    pub fn first_frame(&self) -> Result<RgbaImage, GifError> {
        self.reader()
            .sequence()?
            .frames()
            .first()
            .map(|frame| frame.image().clone())
            .ok_or_else(|| GifError::MalformedGif {
                message: "GIF holds no frames".to_string(),
            })
    }

    /// Write to `path`. A `.gif` path receives the encoded stream as is;
    /// other image formats receive the first frame.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), GifError> {
        let path = path.as_ref();
        let format = ImageFormat::from_path(path)?;

        if format == ImageFormat::Gif {
            std::fs::write(path, &self.bytes)?;
        } else {
            let frame = DynamicImage::ImageRgba8(self.first_frame()?);
            match format {
                ImageFormat::Jpeg => frame.to_rgb8().save_with_format(path, format)?,
                _ => frame.save_with_format(path, format)?,
            }
        }

        info!(
            stage = "save",
            path = %path.display(),
            format = ?format,
            "GIF written"
        );
        Ok(())
    }
}

impl AsRef<[u8]> for GifImage {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<GifImage> for Vec<u8> {
    fn from(image: GifImage) -> Self {
        image.bytes
    }
}
