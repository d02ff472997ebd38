use std::collections::HashMap;

use color_quant::NeuQuant;
use gifkit_types::{
    EncodeOptions, Frame, FrameSequence, GifError, IndexedFrame, Palette, PaletteStrategy,
    QuantizedSequence, Rgb, DEFAULT_SAMPLE_FACTOR, MAX_PALETTE_SIZE,
};
use rayon::prelude::*;
use tracing::{debug, info};

pub mod oklab;

use oklab::delta_e_rgb;

/// NeuQuant needs at least this many sampled pixels per learning cycle
const NEUQUANT_MIN_PIXELS: usize = 100;

/// Below this many pixels NeuQuant trains on every pixel; above it the
/// sample factor is capped so a pass still sees this many samples
const NEUQUANT_FULL_PASS_PIXELS: usize = 1 << 16;

/// Reduces a frame sequence to indexed frames plus global or per-frame palettes.
///
/// Pixels with alpha 0, and pixels whose RGB equals the transparency key,
/// map to a reserved transparent slot at the end of the palette.
#[derive(Debug, Clone)]
pub struct Quantizer {
    strategy: PaletteStrategy,
    max_colors: usize,
    sample_factor: i32,
    transparent: Option<Rgb>,
}

impl Default for Quantizer {
    fn default() -> Self {
        Self {
            strategy: PaletteStrategy::Auto,
            max_colors: MAX_PALETTE_SIZE,
            sample_factor: DEFAULT_SAMPLE_FACTOR,
            transparent: None,
        }
    }
}

/// One frame's quantization result
struct Mapped {
    indices: Vec<u8>,
    palette: Option<Palette>,
    delta_e: f32,
}

impl Quantizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_options(options: &EncodeOptions) -> Result<Self, GifError> {
        options.validate()?;
        Ok(Self {
            strategy: options.palette,
            max_colors: options.max_colors as usize,
            sample_factor: options.sample_factor,
            transparent: options.transparent,
        })
    }

    pub fn with_strategy(mut self, strategy: PaletteStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_colors(mut self, max_colors: usize) -> Self {
        self.max_colors = max_colors;
        self
    }

    pub fn with_sample_factor(mut self, sample_factor: i32) -> Self {
        self.sample_factor = sample_factor;
        self
    }

    pub fn with_transparent(mut self, transparent: Option<Rgb>) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn strategy(&self) -> PaletteStrategy {
        self.strategy
    }

    /// Quantize every frame of `sequence`
    #[tracing::instrument(level = "info", skip(self, sequence), fields(frames = sequence.len()))]
    pub fn quantize(&self, sequence: &FrameSequence) -> Result<QuantizedSequence, GifError> {
        self.validate()?;
        let start_time = std::time::Instant::now();

        info!(
            stage = "quantize",
            strategy = ?self.strategy,
            max_colors = self.max_colors,
            transparent = ?self.transparent,
            "Starting palette reduction"
        );

        let (global_palette, mapped, mode) = match self.strategy {
            PaletteStrategy::Auto => match self.exact_global(sequence)? {
                Some((palette, mapped)) => (Some(palette), mapped, "global-exact"),
                None => (None, self.local(sequence)?, "local"),
            },
            PaletteStrategy::Global => match self.exact_global(sequence)? {
                Some((palette, mapped)) => (Some(palette), mapped, "global-exact"),
                None => {
                    let (palette, mapped) = self.reduced_global(sequence)?;
                    (Some(palette), mapped, "global-reduced")
                }
            },
            PaletteStrategy::Local => (None, self.local(sequence)?, "local"),
        };

        let mean_delta_e = if mapped.is_empty() {
            0.0
        } else {
            mapped.iter().map(|m| m.delta_e).sum::<f32>() / mapped.len() as f32
        };

        let frames = sequence
            .iter()
            .zip(mapped)
            .map(|(frame, m)| IndexedFrame {
                indices: m.indices,
                local_palette: m.palette,
                delay_cs: frame.delay_cs(),
                disposal: frame.disposal(),
            })
            .collect::<Vec<_>>();

        info!(
            stage = "quantize",
            mode = mode,
            global_colors = global_palette.as_ref().map(|p| p.len()).unwrap_or(0),
            mean_delta_e = mean_delta_e,
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Palette reduction completed"
        );

        Ok(QuantizedSequence {
            width: sequence.width(),
            height: sequence.height(),
            global_palette,
            frames,
            repeat: sequence.repeat(),
            mean_delta_e,
        })
    }

    fn validate(&self) -> Result<(), GifError> {
        if self.max_colors > MAX_PALETTE_SIZE {
            return Err(GifError::PaletteOverflow {
                message: format!(
                    "requested {} colors (max {})",
                    self.max_colors, MAX_PALETTE_SIZE
                ),
            });
        }
        if self.max_colors < 2 {
            return Err(GifError::ConfigInvalid {
                message: format!("max_colors must be at least 2, got {}", self.max_colors),
            });
        }
        if self.sample_factor < 1 {
            return Err(GifError::ConfigInvalid {
                message: format!("sample_factor must be positive, got {}", self.sample_factor),
            });
        }
        Ok(())
    }

    fn is_transparent(&self, pixel: &[u8]) -> bool {
        pixel[3] == 0 || self.transparent.map_or(false, |key| key.matches(pixel))
    }

    fn needs_transparency<'a>(&self, mut frames: impl Iterator<Item = &'a Frame>) -> bool {
        frames.any(|f| f.pixels().chunks_exact(4).any(|px| self.is_transparent(px)))
    }

    /// Budget of opaque colors once the transparent slot is reserved
    fn budget(&self, reserve_transparent: bool) -> usize {
        self.max_colors - reserve_transparent as usize
    }

    fn transparent_slot(&self) -> [u8; 3] {
        self.transparent.map(Rgb::to_array).unwrap_or([0, 0, 0])
    }

    /// Distinct opaque colors in first-seen order, or `None` if more than `budget`
    fn distinct_colors<'a>(
        &self,
        frames: impl Iterator<Item = &'a Frame>,
        budget: usize,
    ) -> Option<Vec<[u8; 3]>> {
        let mut seen = HashMap::new();
        let mut colors = Vec::new();
        for frame in frames {
            for px in frame.pixels().chunks_exact(4) {
                if self.is_transparent(px) {
                    continue;
                }
                let rgb = [px[0], px[1], px[2]];
                if !seen.contains_key(&rgb) {
                    if colors.len() == budget {
                        return None;
                    }
                    seen.insert(rgb, colors.len());
                    colors.push(rgb);
                }
            }
        }
        Some(colors)
    }

    fn build_palette(&self, mut colors: Vec<[u8; 3]>, reserve: bool) -> Result<Palette, GifError> {
        if reserve {
            colors.push(self.transparent_slot());
            let idx = (colors.len() - 1) as u8;
            return Palette::new(colors, Some(idx));
        }
        if colors.is_empty() {
            colors.push([0, 0, 0]);
        }
        Palette::new(colors, None)
    }

    /// Lossless single palette, if every opaque color fits
    fn exact_global(
        &self,
        sequence: &FrameSequence,
    ) -> Result<Option<(Palette, Vec<Mapped>)>, GifError> {
        let reserve = self.needs_transparency(sequence.iter());
        let colors = match self.distinct_colors(sequence.iter(), self.budget(reserve)) {
            Some(colors) => colors,
            None => {
                debug!(stage = "quantize", "Colors exceed a single exact palette");
                return Ok(None);
            }
        };
        let palette = self.build_palette(colors, reserve)?;
        let mapped = sequence
            .frames()
            .par_iter()
            .map(|frame| Mapped {
                indices: self.map_exact(frame, &palette),
                palette: None,
                delta_e: 0.0,
            })
            .collect();
        Ok(Some((palette, mapped)))
    }

    /// Lossy single palette learned from all frames
    fn reduced_global(&self, sequence: &FrameSequence) -> Result<(Palette, Vec<Mapped>), GifError> {
        let reserve = self.needs_transparency(sequence.iter());
        let reducer = self.learn(sequence.iter(), self.budget(reserve));
        let palette = self.build_palette(reducer.colors(), reserve)?;
        let mapped = sequence
            .frames()
            .par_iter()
            .map(|frame| {
                let (indices, delta_e) = self.map_reduced(frame, &reducer, &palette);
                Mapped {
                    indices,
                    palette: None,
                    delta_e,
                }
            })
            .collect();
        Ok((palette, mapped))
    }

    /// One palette per frame: exact when it fits, learned otherwise
    fn local(&self, sequence: &FrameSequence) -> Result<Vec<Mapped>, GifError> {
        sequence
            .frames()
            .par_iter()
            .enumerate()
            .map(|(idx, frame)| {
                let reserve = self.needs_transparency(std::iter::once(frame));
                let budget = self.budget(reserve);
                let mapped = match self.distinct_colors(std::iter::once(frame), budget) {
                    Some(colors) => {
                        let palette = self.build_palette(colors, reserve)?;
                        Mapped {
                            indices: self.map_exact(frame, &palette),
                            palette: Some(palette),
                            delta_e: 0.0,
                        }
                    }
                    None => {
                        let reducer = self.learn(std::iter::once(frame), budget);
                        let palette = self.build_palette(reducer.colors(), reserve)?;
                        let (indices, delta_e) = self.map_reduced(frame, &reducer, &palette);
                        Mapped {
                            indices,
                            palette: Some(palette),
                            delta_e,
                        }
                    }
                };
                debug!(
                    stage = "quantize",
                    frame_idx = idx,
                    colors = mapped.palette.as_ref().map(|p| p.len()).unwrap_or(0),
                    delta_e = mapped.delta_e,
                    "Local palette built"
                );
                Ok(mapped)
            })
            .collect()
    }

    fn map_exact(&self, frame: &Frame, palette: &Palette) -> Vec<u8> {
        let lookup: HashMap<[u8; 3], u8> = palette
            .colors()
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i as u8) != palette.transparent())
            .map(|(i, rgb)| (*rgb, i as u8))
            .collect();
        let transparent = palette.transparent().unwrap_or(0);

        frame
            .pixels()
            .chunks_exact(4)
            .map(|px| {
                if self.is_transparent(px) {
                    transparent
                } else {
                    lookup.get(&[px[0], px[1], px[2]]).copied().unwrap_or(0)
                }
            })
            .collect()
    }

    fn map_reduced(&self, frame: &Frame, reducer: &Reducer, palette: &Palette) -> (Vec<u8>, f32) {
        let transparent = palette.transparent().unwrap_or(0);
        let mut cache: HashMap<[u8; 3], (u8, f32)> = HashMap::new();
        let mut total_error = 0.0f32;
        let mut opaque = 0usize;

        let indices = frame
            .pixels()
            .chunks_exact(4)
            .map(|px| {
                if self.is_transparent(px) {
                    return transparent;
                }
                let rgb = [px[0], px[1], px[2]];
                let (idx, error) = *cache.entry(rgb).or_insert_with(|| {
                    let idx = reducer.index_of(rgb);
                    let error = palette.get(idx).map_or(0.0, |c| delta_e_rgb(rgb, c));
                    (idx, error)
                });
                total_error += error;
                opaque += 1;
                idx
            })
            .collect();

        let delta_e = if opaque == 0 {
            0.0
        } else {
            total_error / opaque as f32
        };
        (indices, delta_e)
    }

    /// Learn `colors` representative colors from the opaque pixels of `frames`
    fn learn<'a>(&self, frames: impl Iterator<Item = &'a Frame>, colors: usize) -> Reducer {
        let mut pixels = Vec::new();
        for frame in frames {
            for px in frame.pixels().chunks_exact(4) {
                if !self.is_transparent(px) {
                    pixels.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
            }
        }

        let count = pixels.len() / 4;
        if count < NEUQUANT_MIN_PIXELS {
            return Reducer::most_frequent(&pixels, colors);
        }

        let sample_factor = self
            .sample_factor
            .min((count / NEUQUANT_FULL_PASS_PIXELS) as i32)
            .max(1);
        debug!(
            stage = "quantize",
            pixels = count,
            sample_factor = sample_factor,
            colors = colors,
            "Training NeuQuant"
        );
        let nq = NeuQuant::new(sample_factor, colors, &pixels);
        let palette = nq
            .color_map_rgb()
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect();
        Reducer::NeuQuant { nq, palette }
    }
}

/// Lossy color reduction backend
enum Reducer {
    NeuQuant { nq: NeuQuant, palette: Vec<[u8; 3]> },
    /// Too few pixels to train NeuQuant: keep the most frequent colors
    Frequent { palette: Vec<[u8; 3]> },
}

impl Reducer {
    fn most_frequent(pixels: &[u8], colors: usize) -> Self {
        let mut counts: HashMap<[u8; 3], (usize, usize)> = HashMap::new();
        for (order, px) in pixels.chunks_exact(4).enumerate() {
            let entry = counts.entry([px[0], px[1], px[2]]).or_insert((0, order));
            entry.0 += 1;
        }
        let mut sorted: Vec<_> = counts.into_iter().collect();
        sorted.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
        sorted.truncate(colors);
        Reducer::Frequent {
            palette: sorted.into_iter().map(|(rgb, _)| rgb).collect(),
        }
    }

    fn colors(&self) -> Vec<[u8; 3]> {
        match self {
            Reducer::NeuQuant { palette, .. } | Reducer::Frequent { palette } => palette.clone(),
        }
    }

    fn index_of(&self, rgb: [u8; 3]) -> u8 {
        match self {
            Reducer::NeuQuant { nq, .. } => nq.index_of(&[rgb[0], rgb[1], rgb[2], 255]) as u8,
            Reducer::Frequent { palette } => palette
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| {
                    let dr = c[0] as i32 - rgb[0] as i32;
                    let dg = c[1] as i32 - rgb[1] as i32;
                    let db = c[2] as i32 - rgb[2] as i32;
                    dr * dr + dg * dg + db * db
                })
                .map(|(i, _)| i as u8)
                .unwrap_or(0),
        }
    }
}
