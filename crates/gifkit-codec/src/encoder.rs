use gifkit_types::{GifError, IndexedFrame, Palette, ProgressEvent, QuantizedSequence};
use rayon::prelude::*;
use tracing::{debug, info, span, warn, Level};

use crate::lzw;
use crate::progress::ProgressSink;

/// GIF89a block writer with per-frame progress reporting
#[derive(Debug, Clone)]
pub struct GifEncoder {
    parallel: bool,
    validate_output: bool,
}

impl Default for GifEncoder {
    fn default() -> Self {
        Self {
            parallel: true,
            validate_output: true,
        }
    }
}

/// Compressed image data for one frame, ready to be framed into sub-blocks
struct ImageData {
    min_code_size: u8,
    compressed: Vec<u8>,
}

impl GifEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress frames on the rayon pool. Output bytes are identical either way.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate_output = validate;
        self
    }

    /// Encode quantized frames to a complete GIF89a byte stream.
    ///
    /// `progress` is called after each frame's image data is written, with
    /// `encoded` running 1..=N. An error from it aborts the encode and no
    /// bytes are returned.
    #[tracing::instrument(level = "info", skip(self, quantized, progress), fields(frames = quantized.frames.len()))]
    pub fn encode(
        &self,
        quantized: &QuantizedSequence,
        progress: &mut dyn ProgressSink,
    ) -> Result<Vec<u8>, GifError> {
        let start_time = std::time::Instant::now();

        info!(
            stage = "encode",
            frames = quantized.frames.len(),
            width = quantized.width,
            height = quantized.height,
            global_colors = quantized.global_palette.as_ref().map(|p| p.len()).unwrap_or(0),
            "Starting GIF89a encoding"
        );

        let (width, height) = self.validate_sequence(quantized)?;

        let mut gif_data = Vec::new();
        self.write_header(&mut gif_data, width, height, quantized.global_palette.as_ref());

        if let Some(repeat) = quantized.repeat {
            self.write_netscape_loop(&mut gif_data, repeat);
        }

        let total = quantized.frames.len() as u32;
        let batch_size = if self.parallel {
            rayon::current_num_threads().max(1)
        } else {
            1
        };

        let mut encoded = 0u32;
        for (batch_idx, batch) in quantized.frames.chunks(batch_size).enumerate() {
            let first = batch_idx * batch_size;
            let compressed = self.compress_batch(quantized, first, batch)?;

            for (offset, (frame, data)) in batch.iter().zip(compressed).enumerate() {
                let frame_idx = first + offset;
                let palette = active_palette(quantized, frame_idx)?;

                self.write_graphic_control(&mut gif_data, frame, palette);
                self.write_image_descriptor(&mut gif_data, width, height, frame.local_palette.as_ref());
                gif_data.push(data.min_code_size);
                lzw::write_sub_blocks(&mut gif_data, &data.compressed);

                encoded += 1;
                debug!(
                    stage = "encode",
                    frame_idx = frame_idx,
                    compressed_bytes = data.compressed.len(),
                    "Frame written"
                );
                progress
                    .report(ProgressEvent { total, encoded })
                    .map_err(|e| GifError::CallbackError {
                        message: e.to_string(),
                    })?;
            }
        }

        self.write_gif_trailer(&mut gif_data);

        if self.validate_output {
            self.validate_gif_output(&gif_data)?;
        }

        let raw_size = quantized.frames.len() * (width as usize) * (height as usize) * 3;
        info!(
            stage = "encode",
            duration_ms = start_time.elapsed().as_millis() as u64,
            gif_size_bytes = gif_data.len(),
            compression_ratio = raw_size as f32 / gif_data.len() as f32,
            "GIF encoding completed"
        );

        Ok(gif_data)
    }

    fn compress_batch(
        &self,
        quantized: &QuantizedSequence,
        first: usize,
        batch: &[IndexedFrame],
    ) -> Result<Vec<ImageData>, GifError> {
        let compress_one = |(offset, frame): (usize, &IndexedFrame)| -> Result<ImageData, GifError> {
            let palette = active_palette(quantized, first + offset)?;
            let min_code_size = lzw::min_code_size(palette.table_bits());
            Ok(ImageData {
                min_code_size,
                compressed: lzw::compress(&frame.indices, min_code_size)?,
            })
        };

        if self.parallel && batch.len() > 1 {
            batch.par_iter().enumerate().map(compress_one).collect()
        } else {
            batch.iter().enumerate().map(compress_one).collect()
        }
    }

    /// Validate the sequence before writing anything; returns the canvas size
    fn validate_sequence(&self, quantized: &QuantizedSequence) -> Result<(u16, u16), GifError> {
        if quantized.frames.is_empty() {
            return Err(GifError::EncodeError {
                message: "No frames provided for GIF encoding".to_string(),
            });
        }

        let width = u16::try_from(quantized.width).ok().filter(|&w| w > 0);
        let height = u16::try_from(quantized.height).ok().filter(|&h| h > 0);
        let (width, height) = match (width, height) {
            (Some(w), Some(h)) => (w, h),
            _ => {
                return Err(GifError::EncodeError {
                    message: format!(
                        "Canvas {}x{} outside 1..={} range",
                        quantized.width,
                        quantized.height,
                        u16::MAX
                    ),
                })
            }
        };

        let expected_pixels = width as usize * height as usize;
        for (idx, frame) in quantized.frames.iter().enumerate() {
            if frame.indices.len() != expected_pixels {
                return Err(GifError::EncodeError {
                    message: format!(
                        "Frame {} has {} pixels, expected {}",
                        idx,
                        frame.indices.len(),
                        expected_pixels
                    ),
                });
            }

            let palette = active_palette(quantized, idx)?;
            if let Some(&max_index) = frame.indices.iter().max() {
                if max_index as usize >= palette.len() {
                    return Err(GifError::EncodeError {
                        message: format!(
                            "Frame {} uses index {} but its palette has {} colors",
                            idx,
                            max_index,
                            palette.len()
                        ),
                    });
                }
            }
        }

        Ok((width, height))
    }

    /// Header, logical screen descriptor and global color table
    fn write_header(&self, output: &mut Vec<u8>, width: u16, height: u16, global: Option<&Palette>) {
        output.extend_from_slice(b"GIF89a");

        output.extend_from_slice(&width.to_le_bytes());
        output.extend_from_slice(&height.to_le_bytes());

        match global {
            Some(palette) => {
                // Global color table flag + 8-bit color resolution + table size
                output.push(0xF0 | palette.table_bits());
                output.push(0); // Background color index
                output.push(0); // Pixel aspect ratio
                output.extend_from_slice(&palette.to_table_bytes());
            }
            None => {
                output.extend_from_slice(&[0x70, 0, 0]);
            }
        }
    }

    fn write_netscape_loop(&self, output: &mut Vec<u8>, repeat: u16) {
        output.push(0x21); // Extension introducer
        output.push(0xFF); // Application extension label
        output.push(0x0B); // Block size
        output.extend_from_slice(b"NETSCAPE2.0");

        output.push(0x03); // Sub-block size
        output.push(0x01); // Sub-block ID
        output.extend_from_slice(&repeat.to_le_bytes()); // 0 = infinite
        output.push(0x00);
    }

    fn write_graphic_control(&self, output: &mut Vec<u8>, frame: &IndexedFrame, palette: &Palette) {
        let transparent = palette.transparent();

        output.extend_from_slice(&[0x21, 0xF9, 0x04]);
        output.push((frame.disposal.code() << 2) | transparent.is_some() as u8);
        output.extend_from_slice(&frame.delay_cs.to_le_bytes());
        output.push(transparent.unwrap_or(0));
        output.push(0);
    }

    fn write_image_descriptor(
        &self,
        output: &mut Vec<u8>,
        width: u16,
        height: u16,
        local: Option<&Palette>,
    ) {
        output.push(0x2C);
        output.extend_from_slice(&0u16.to_le_bytes()); // Left
        output.extend_from_slice(&0u16.to_le_bytes()); // Top
        output.extend_from_slice(&width.to_le_bytes());
        output.extend_from_slice(&height.to_le_bytes());

        match local {
            Some(palette) => {
                output.push(0x80 | palette.table_bits());
                output.extend_from_slice(&palette.to_table_bytes());
            }
            None => output.push(0),
        }
    }

    fn write_gif_trailer(&self, output: &mut Vec<u8>) {
        output.push(0x3B);
    }

    fn validate_gif_output(&self, gif_data: &[u8]) -> Result<(), GifError> {
        if gif_data.len() < 14 || &gif_data[0..6] != b"GIF89a" {
            return Err(GifError::EncodeError {
                message: "Invalid GIF signature".to_string(),
            });
        }

        if gif_data.last() != Some(&0x3B) {
            warn!(stage = "encode", "GIF missing proper trailer");
            return Err(GifError::EncodeError {
                message: "GIF missing trailer".to_string(),
            });
        }

        let span = span!(Level::DEBUG, "validate_gif_output", bytes = gif_data.len());
        let _guard = span.enter();
        debug!(stage = "encode", "GIF validation passed");
        Ok(())
    }
}

fn active_palette(quantized: &QuantizedSequence, idx: usize) -> Result<&Palette, GifError> {
    quantized
        .active_palette(idx)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| GifError::EncodeError {
            message: format!("Frame {} has no color table", idx),
        })
}
