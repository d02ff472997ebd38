use std::path::Path;

use gifkit_codec::{decode_sequence, GifDecoder};
use gifkit_types::{DisposalMethod, EncodeOptions, Frame, FrameSequence, GifError};
use image::{imageops::FilterType, DynamicImage, ImageFormat, RgbaImage};
use tracing::{debug, info};

use crate::GifImage;

/// Anything that can be appended to a [`GifBuilder`](crate::GifBuilder)
#[derive(Debug, Clone)]
pub enum FrameSource {
    /// One still image, one frame with the configured default delay
    Still(DynamicImage),
    /// Sources appended in order
    Collection(Vec<FrameSource>),
    /// An encoded GIF whose frames keep their own delay and disposal
    Animated(Vec<u8>),
    /// Frames that are already decoded
    Sequence(FrameSequence),
}

impl FrameSource {
    pub fn animated(bytes: impl Into<Vec<u8>>) -> Self {
        FrameSource::Animated(bytes.into())
    }

    /// Load a source from disk. GIF files holding more than one image are
    /// animated sources; everything else is decoded as a still.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GifError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let format = image::guess_format(&bytes).map_err(|_| GifError::UnsupportedSourceKind {
            message: format!("{} is not a recognised image", path.display()),
        })?;

        if format == ImageFormat::Gif {
            let decoded = GifDecoder::new().decode(&bytes)?;
            if decoded.frames.len() > 1 {
                debug!(
                    stage = "adapt",
                    path = %path.display(),
                    frames = decoded.frames.len(),
                    "Opened animated GIF"
                );
                return Ok(FrameSource::Animated(bytes));
            }
        }

        let image = image::load_from_memory_with_format(&bytes, format)?;
        Ok(FrameSource::Still(image))
    }
}

impl From<DynamicImage> for FrameSource {
    fn from(image: DynamicImage) -> Self {
        FrameSource::Still(image)
    }
}

impl From<RgbaImage> for FrameSource {
    fn from(image: RgbaImage) -> Self {
        FrameSource::Still(DynamicImage::ImageRgba8(image))
    }
}

impl From<Vec<DynamicImage>> for FrameSource {
    fn from(images: Vec<DynamicImage>) -> Self {
        FrameSource::Collection(images.into_iter().map(FrameSource::Still).collect())
    }
}

impl From<Vec<RgbaImage>> for FrameSource {
    fn from(images: Vec<RgbaImage>) -> Self {
        FrameSource::Collection(images.into_iter().map(FrameSource::from).collect())
    }
}

impl From<Vec<FrameSource>> for FrameSource {
    fn from(sources: Vec<FrameSource>) -> Self {
        FrameSource::Collection(sources)
    }
}

impl From<FrameSequence> for FrameSource {
    fn from(sequence: FrameSequence) -> Self {
        FrameSource::Sequence(sequence)
    }
}

impl From<GifImage> for FrameSource {
    fn from(image: GifImage) -> Self {
        FrameSource::Animated(image.into_bytes())
    }
}

impl From<&GifImage> for FrameSource {
    fn from(image: &GifImage) -> Self {
        FrameSource::Animated(image.as_bytes().to_vec())
    }
}

/// Flatten `sources` into one sequence on the first frame's canvas.
///
/// Frames of a different size are scaled to cover the canvas and
/// center-cropped (Lanczos3). The loop count comes from `options`.
#[tracing::instrument(level = "debug", skip_all, fields(sources = sources.len()))]
pub fn adapt(sources: &[FrameSource], options: &EncodeOptions) -> Result<FrameSequence, GifError> {
    let mut frames = Vec::new();
    for source in sources {
        collect_frames(source, options, &mut frames)?;
    }

    let mut sequence = FrameSequence::default().with_repeat(Some(options.repeat));
    let mut resized = 0usize;
    for frame in frames {
        let frame = if sequence.is_empty() {
            frame
        } else {
            fit_to_canvas(frame, sequence.width(), sequence.height(), &mut resized)
        };
        sequence.push(frame)?;
    }

    info!(
        stage = "adapt",
        frames = sequence.len(),
        width = sequence.width(),
        height = sequence.height(),
        resized = resized,
        "Frame sources normalized"
    );
    Ok(sequence)
}

fn collect_frames(
    source: &FrameSource,
    options: &EncodeOptions,
    frames: &mut Vec<Frame>,
) -> Result<(), GifError> {
    match source {
        FrameSource::Still(image) => {
            if image.width() == 0 || image.height() == 0 {
                return Err(GifError::UnsupportedSourceKind {
                    message: "still image has no pixels".to_string(),
                });
            }
            frames.push(Frame::new(
                image.to_rgba8(),
                options.delay,
                DisposalMethod::RestoreBackground,
            ));
        }
        FrameSource::Collection(sources) => {
            for source in sources {
                collect_frames(source, options, frames)?;
            }
        }
        FrameSource::Animated(bytes) => {
            if !bytes.starts_with(b"GIF8") {
                return Err(GifError::UnsupportedSourceKind {
                    message: "animated source is not a GIF stream".to_string(),
                });
            }
            frames.extend(decode_sequence(bytes)?.into_frames());
        }
        FrameSource::Sequence(sequence) => frames.extend(sequence.frames().iter().cloned()),
    }
    Ok(())
}

fn fit_to_canvas(frame: Frame, width: u32, height: u32, resized: &mut usize) -> Frame {
    if frame.width() == width && frame.height() == height {
        return frame;
    }
    *resized += 1;

    let delay_ms = frame.delay_ms();
    let disposal = frame.disposal();
    let image = DynamicImage::ImageRgba8(frame.into_image())
        .resize_to_fill(width, height, FilterType::Lanczos3)
        .to_rgba8();
    Frame::new(image, delay_ms, disposal)
}
