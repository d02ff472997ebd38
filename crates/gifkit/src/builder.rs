use gifkit_codec::{GifEncoder, NoProgress, ProgressSink};
use gifkit_quant::Quantizer;
use gifkit_types::{BoxError, EncodeOptions, GifError, ProgressEvent};
use tracing::{debug, info};

use crate::source::{adapt, FrameSource};
use crate::GifImage;

/// Start a GIF from scratch. Nothing is decoded or encoded until
/// [`GifBuilder::to_image`] is called.
pub fn create_gif(options: EncodeOptions) -> GifBuilder {
    GifBuilder {
        descriptor: GifDescriptor {
            options,
            sources: Vec::new(),
        },
        output: None,
    }
}

/// Everything needed to produce a GIF: options plus sources in append order
#[derive(Debug, Clone, Default)]
pub struct GifDescriptor {
    pub options: EncodeOptions,
    pub sources: Vec<FrameSource>,
}

/// Accumulates frame sources; the first successful export is cached.
///
/// Options are fixed at construction, so a cached result never goes stale.
/// Appending frames after a successful export does not change the cached
/// image either; build a new builder instead.
#[derive(Debug, Clone)]
pub struct GifBuilder {
    descriptor: GifDescriptor,
    output: Option<GifImage>,
}

impl GifBuilder {
    /// Append one source (a still, a list, an animated GIF or decoded frames)
    pub fn add_frame(mut self, source: impl Into<FrameSource>) -> Self {
        self.descriptor.sources.push(source.into());
        self
    }

    pub fn descriptor(&self) -> &GifDescriptor {
        &self.descriptor
    }

    pub fn options(&self) -> &EncodeOptions {
        &self.descriptor.options
    }

    pub fn to_image(&mut self) -> Result<GifImage, GifError> {
        self.to_image_with_sink(&mut NoProgress)
    }

    /// Like [`to_image`](Self::to_image), calling `on_progress` after each frame
    pub fn to_image_with_progress<F>(&mut self, mut on_progress: F) -> Result<GifImage, GifError>
    where
        F: FnMut(ProgressEvent) -> Result<(), BoxError>,
    {
        self.to_image_with_sink(&mut on_progress)
    }

    pub fn to_image_with_sink(
        &mut self,
        progress: &mut dyn ProgressSink,
    ) -> Result<GifImage, GifError> {
        if let Some(image) = &self.output {
            debug!(stage = "materialize", "Returning cached GIF");
            return Ok(image.clone());
        }

        let image = materialize(&self.descriptor, progress)?;
        self.output = Some(image.clone());
        Ok(image)
    }
}

/// Adapt, quantize and encode a descriptor.
#[tracing::instrument(level = "info", skip_all, fields(sources = descriptor.sources.len()))]
pub fn materialize(
    descriptor: &GifDescriptor,
    progress: &mut dyn ProgressSink,
) -> Result<GifImage, GifError> {
    let start_time = std::time::Instant::now();
    let options = &descriptor.options;

    let quantizer = Quantizer::from_options(options)?;
    let sequence = adapt(&descriptor.sources, options)?;
    let quantized = quantizer.quantize(&sequence)?;
    let bytes = GifEncoder::new().encode(&quantized, progress)?;

    info!(
        stage = "materialize",
        frames = sequence.len(),
        bytes = bytes.len(),
        mean_delta_e = quantized.mean_delta_e,
        duration_ms = start_time.elapsed().as_millis() as u64,
        "GIF materialized"
    );

    Ok(GifImage::from_parts(
        bytes,
        sequence.width(),
        sequence.height(),
        sequence.len(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn solid(rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(6, 6, Rgba(rgba))
    }

    #[test]
    fn test_adding_frames_does_no_work() {
        let builder = create_gif(EncodeOptions::default())
            .add_frame(FrameSource::animated(b"not a gif".to_vec()))
            .add_frame(solid([1, 2, 3, 255]));

        // The bad source only surfaces at export time
        assert_eq!(builder.descriptor().sources.len(), 2);
        let err = builder.clone().to_image().unwrap_err();
        assert_eq!(err.code(), "E_SOURCE");
    }

    #[test]
    fn test_invalid_options_fail_on_export() {
        let mut builder = create_gif(EncodeOptions::default().with_max_colors(1))
            .add_frame(solid([0, 0, 0, 255]));
        assert_eq!(builder.to_image().unwrap_err().code(), "E_CONFIG");
    }

    #[test]
    fn test_empty_builder_is_an_encode_error() {
        let err = create_gif(EncodeOptions::default()).to_image().unwrap_err();
        assert!(matches!(err, GifError::EncodeError { .. }));
    }

    #[test]
    fn test_materialize_is_pure() {
        let descriptor = GifDescriptor {
            options: EncodeOptions::default().with_delay(20),
            sources: vec![solid([255, 0, 0, 255]).into(), solid([0, 255, 0, 255]).into()],
        };

        let first = materialize(&descriptor, &mut NoProgress).unwrap();
        let second = materialize(&descriptor, &mut NoProgress).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.frame_count(), 2);
        assert_eq!((first.width(), first.height()), (6, 6));
    }
}
