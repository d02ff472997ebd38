//! Rendering decoded frames onto the logical screen

use gifkit_types::{cs_to_ms, DisposalMethod, Frame, FrameSequence, GifError};
use image::{Rgba, RgbaImage};
use tracing::debug;

use crate::decoder::{DecodedGif, RawFrame};

const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Render every frame onto a full-size RGBA canvas, applying each frame's
/// disposal before the next one is drawn. Uncovered pixels stay transparent.
#[tracing::instrument(level = "debug", skip(decoded), fields(frames = decoded.frames.len()))]
pub fn compose(decoded: &DecodedGif) -> Result<FrameSequence, GifError> {
    let width = decoded.width as u32;
    let height = decoded.height as u32;
    let mut canvas = RgbaImage::from_pixel(width, height, CLEAR);
    let mut sequence = FrameSequence::new(width, height).with_repeat(decoded.repeat);

    for (frame_idx, raw) in decoded.frames.iter().enumerate() {
        let saved = (raw.disposal == DisposalMethod::RestoreToPrevious).then(|| canvas.clone());

        draw(&mut canvas, decoded, raw, frame_idx)?;
        sequence.push(Frame::new(
            canvas.clone(),
            cs_to_ms(raw.delay_cs),
            raw.disposal,
        ))?;

        match raw.disposal {
            DisposalMethod::RestoreBackground => clear_rect(&mut canvas, raw),
            DisposalMethod::RestoreToPrevious => {
                if let Some(previous) = saved {
                    canvas = previous;
                }
            }
            DisposalMethod::None | DisposalMethod::DoNotDispose => {}
        }
    }

    debug!(stage = "decode", frames = sequence.len(), "Frames composited");
    Ok(sequence)
}

fn draw(
    canvas: &mut RgbaImage,
    decoded: &DecodedGif,
    raw: &RawFrame,
    frame_idx: usize,
) -> Result<(), GifError> {
    let palette = decoded
        .palette_for(raw)
        .ok_or_else(|| GifError::MalformedGif {
            message: format!("frame {} has no color table", frame_idx),
        })?;

    let frame_width = raw.width as usize;
    for (offset, &index) in raw.indices.iter().enumerate() {
        if raw.transparent == Some(index) {
            continue;
        }
        let x = raw.left as u32 + (offset % frame_width) as u32;
        let y = raw.top as u32 + (offset / frame_width) as u32;
        if x >= canvas.width() || y >= canvas.height() {
            continue;
        }
        // Indices past the table end draw nothing
        if let Some([r, g, b]) = palette.get(index) {
            canvas.put_pixel(x, y, Rgba([r, g, b, 255]));
        }
    }
    Ok(())
}

fn clear_rect(canvas: &mut RgbaImage, raw: &RawFrame) {
    let right = (raw.left as u32 + raw.width as u32).min(canvas.width());
    let bottom = (raw.top as u32 + raw.height as u32).min(canvas.height());
    for y in raw.top as u32..bottom {
        for x in raw.left as u32..right {
            canvas.put_pixel(x, y, CLEAR);
        }
    }
}
