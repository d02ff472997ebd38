use std::fmt;
use std::str::FromStr;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core constants
pub const MAX_PALETTE_SIZE: usize = 256;
pub const DEFAULT_DELAY_MS: u32 = 100;
pub const DEFAULT_SAMPLE_FACTOR: i32 = 10;

/// Error type returned by progress callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Opaque RGB color, used as the transparency key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn to_array(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    /// True when the first three channels of `pixel` equal this color (alpha ignored)
    pub fn matches(self, pixel: &[u8]) -> bool {
        pixel.len() >= 3 && pixel[0] == self.r && pixel[1] == self.g && pixel[2] == self.b
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Rgb {
    type Err = GifError;

    /// Accepts `#RRGGBB`, `#RGB` (with or without `#`) and `r,g,b`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GifError::ConfigInvalid {
            message: format!("invalid color '{}': expected #RRGGBB, #RGB or r,g,b", s),
        };
        let trimmed = s.trim();

        if trimmed.contains(',') {
            let parts = trimmed
                .split(',')
                .map(|p| p.trim().parse::<u8>().map_err(|_| invalid()))
                .collect::<Result<Vec<u8>, GifError>>()?;
            return match parts.as_slice() {
                [r, g, b] => Ok(Rgb::new(*r, *g, *b)),
                _ => Err(invalid()),
            };
        }

        let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
        if !hex.is_ascii() {
            return Err(invalid());
        }
        let channel = |digits: &str| u8::from_str_radix(digits, 16).map_err(|_| invalid());
        match hex.len() {
            6 => Ok(Rgb::new(channel(&hex[0..2])?, channel(&hex[2..4])?, channel(&hex[4..6])?)),
            3 => {
                // #abc expands to #aabbcc
                let r = channel(&hex[0..1])?;
                let g = channel(&hex[1..2])?;
                let b = channel(&hex[2..3])?;
                Ok(Rgb::new(r * 17, g * 17, b * 17))
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Rgb {
    type Error = GifError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        value.to_string()
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Rgb::new(r, g, b)
    }
}

/// How the canvas is treated after a frame is displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DisposalMethod {
    #[default]
    None,
    DoNotDispose,
    RestoreBackground,
    RestoreToPrevious,
}

impl DisposalMethod {
    /// Graphic control extension code (bits 2..4 of the packed field).
    /// Reserved codes 4-7 are treated as `None`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => DisposalMethod::DoNotDispose,
            2 => DisposalMethod::RestoreBackground,
            3 => DisposalMethod::RestoreToPrevious,
            _ => DisposalMethod::None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            DisposalMethod::None => 0,
            DisposalMethod::DoNotDispose => 1,
            DisposalMethod::RestoreBackground => 2,
            DisposalMethod::RestoreToPrevious => 3,
        }
    }
}

/// Palette reduction strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaletteStrategy {
    /// One exact global palette when every color fits, per-frame palettes otherwise
    #[default]
    Auto,
    /// Always a single global palette (NeuQuant when exact does not fit)
    Global,
    /// Always one palette per frame
    Local,
}

impl FromStr for PaletteStrategy {
    type Err = GifError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(PaletteStrategy::Auto),
            "global" => Ok(PaletteStrategy::Global),
            "local" => Ok(PaletteStrategy::Local),
            other => Err(GifError::ConfigInvalid {
                message: format!("unknown palette strategy '{}'", other),
            }),
        }
    }
}

/// Convert milliseconds to GIF centiseconds, rounding to nearest
pub fn ms_to_cs(ms: u32) -> u16 {
    (ms.saturating_add(5) / 10).min(u16::MAX as u32) as u16
}

/// Convert GIF centiseconds to milliseconds
pub fn cs_to_ms(cs: u16) -> u32 {
    cs as u32 * 10
}

/// Color table size field for a palette of `len` entries (table holds `2 << bits` colors)
pub fn color_table_bits(len: usize) -> u8 {
    match len {
        0..=2 => 0,
        3..=4 => 1,
        5..=8 => 2,
        9..=16 => 3,
        17..=32 => 4,
        33..=64 => 5,
        65..=128 => 6,
        _ => 7,
    }
}

/// A single decoded RGBA frame. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: RgbaImage,
    delay_ms: u32,
    disposal: DisposalMethod,
}

impl Frame {
    pub fn new(image: RgbaImage, delay_ms: u32, disposal: DisposalMethod) -> Self {
        Self {
            image,
            delay_ms,
            disposal,
        }
    }

    /// Build a frame from tightly packed RGBA bytes
    pub fn from_rgba(
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        delay_ms: u32,
        disposal: DisposalMethod,
    ) -> Result<Self, GifError> {
        let got = pixels.len();
        let image = RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
            GifError::InvalidFrameData {
                message: format!(
                    "expected {} RGBA bytes for {}x{}, got {}",
                    width as u64 * height as u64 * 4,
                    width,
                    height,
                    got
                ),
            }
        })?;
        Ok(Self::new(image, delay_ms, disposal))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Tightly packed RGBA bytes, row-major
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn delay_ms(&self) -> u32 {
        self.delay_ms
    }

    pub fn delay_cs(&self) -> u16 {
        ms_to_cs(self.delay_ms)
    }

    pub fn disposal(&self) -> DisposalMethod {
        self.disposal
    }
}

/// Ordered frames sharing one canvas size
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameSequence {
    frames: Vec<Frame>,
    width: u32,
    height: u32,
    /// `None` = no loop extension (play once), `Some(0)` = loop forever
    repeat: Option<u16>,
}

impl FrameSequence {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frames: Vec::new(),
            width,
            height,
            repeat: None,
        }
    }

    pub fn from_frames(frames: Vec<Frame>, repeat: Option<u16>) -> Result<Self, GifError> {
        let (width, height) = frames
            .first()
            .map(|f| (f.width(), f.height()))
            .unwrap_or((0, 0));
        let mut sequence = Self::new(width, height).with_repeat(repeat);
        for frame in frames {
            sequence.push(frame)?;
        }
        Ok(sequence)
    }

    /// Append a frame; it must match the canvas size (the first frame sets it)
    pub fn push(&mut self, frame: Frame) -> Result<(), GifError> {
        if self.frames.is_empty() && (self.width == 0 || self.height == 0) {
            self.width = frame.width();
            self.height = frame.height();
        }
        if frame.width() != self.width || frame.height() != self.height {
            return Err(GifError::InvalidFrameData {
                message: format!(
                    "frame {} is {}x{}, canvas is {}x{}",
                    self.frames.len(),
                    frame.width(),
                    frame.height(),
                    self.width,
                    self.height
                ),
            });
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn with_repeat(mut self, repeat: Option<u16>) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn repeat(&self) -> Option<u16> {
        self.repeat
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.frames.iter()
    }
}

impl<'a> IntoIterator for &'a FrameSequence {
    type Item = &'a Frame;
    type IntoIter = std::slice::Iter<'a, Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

/// Up to 256 RGB colors plus an optional transparent slot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Palette {
    colors: Vec<[u8; 3]>,
    transparent: Option<u8>,
}

impl Palette {
    pub fn new(colors: Vec<[u8; 3]>, transparent: Option<u8>) -> Result<Self, GifError> {
        if colors.len() > MAX_PALETTE_SIZE {
            return Err(GifError::PaletteOverflow {
                message: format!("{} colors (max {})", colors.len(), MAX_PALETTE_SIZE),
            });
        }
        if let Some(idx) = transparent {
            if idx as usize >= colors.len() {
                return Err(GifError::EncodeError {
                    message: format!(
                        "transparent index {} outside palette of {} colors",
                        idx,
                        colors.len()
                    ),
                });
            }
        }
        Ok(Self {
            colors,
            transparent,
        })
    }

    /// Parse a packed RGB color table
    pub fn from_rgb_bytes(bytes: &[u8], transparent: Option<u8>) -> Result<Self, GifError> {
        if bytes.len() % 3 != 0 {
            return Err(GifError::MalformedGif {
                message: format!("color table length {} not divisible by 3", bytes.len()),
            });
        }
        let colors = bytes.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
        Self::new(colors, transparent)
    }

    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn transparent(&self) -> Option<u8> {
        self.transparent
    }

    pub fn get(&self, index: u8) -> Option<[u8; 3]> {
        self.colors.get(index as usize).copied()
    }

    /// Size field written into the screen/image descriptor
    pub fn table_bits(&self) -> u8 {
        color_table_bits(self.colors.len())
    }

    /// Number of entries in the serialized (power of two) table
    pub fn table_len(&self) -> usize {
        2usize << self.table_bits()
    }

    /// Color table bytes padded with black to `table_len()` entries
    pub fn to_table_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.table_len() * 3);
        for rgb in &self.colors {
            bytes.extend_from_slice(rgb);
        }
        bytes.resize(self.table_len() * 3, 0);
        bytes
    }
}

/// A frame rewritten as palette indices
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedFrame {
    pub indices: Vec<u8>,
    pub local_palette: Option<Palette>,
    pub delay_cs: u16,
    pub disposal: DisposalMethod,
}

/// Quantizer output, encoder input
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedSequence {
    pub width: u32,
    pub height: u32,
    pub global_palette: Option<Palette>,
    pub frames: Vec<IndexedFrame>,
    pub repeat: Option<u16>,
    /// Mean Oklab ΔE between input pixels and their palette colors
    pub mean_delta_e: f32,
}

impl QuantizedSequence {
    /// Palette that applies to frame `idx`: its local table, else the global one
    pub fn active_palette(&self, idx: usize) -> Option<&Palette> {
        self.frames
            .get(idx)
            .and_then(|f| f.local_palette.as_ref())
            .or(self.global_palette.as_ref())
    }
}

/// Recognized encode options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    /// Default per-frame delay in milliseconds, applied to still images
    pub delay: u32,
    /// Color rendered as transparent
    pub transparent: Option<Rgb>,
    /// Loop count, 0 = infinite
    pub repeat: u16,
    pub palette: PaletteStrategy,
    pub max_colors: u16,
    /// NeuQuant sample factor (1 = best, 30 = fastest)
    pub sample_factor: i32,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY_MS,
            transparent: None,
            repeat: 0,
            palette: PaletteStrategy::Auto,
            max_colors: MAX_PALETTE_SIZE as u16,
            sample_factor: DEFAULT_SAMPLE_FACTOR,
        }
    }
}

impl EncodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay_ms: u32) -> Self {
        self.delay = delay_ms;
        self
    }

    pub fn with_transparent(mut self, color: impl Into<Rgb>) -> Self {
        self.transparent = Some(color.into());
        self
    }

    pub fn with_repeat(mut self, repeat: u16) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_palette(mut self, strategy: PaletteStrategy) -> Self {
        self.palette = strategy;
        self
    }

    pub fn with_max_colors(mut self, max_colors: u16) -> Self {
        self.max_colors = max_colors;
        self
    }

    pub fn with_sample_factor(mut self, sample_factor: i32) -> Self {
        self.sample_factor = sample_factor;
        self
    }

    pub fn validate(&self) -> Result<(), GifError> {
        if self.max_colors as usize > MAX_PALETTE_SIZE {
            return Err(GifError::PaletteOverflow {
                message: format!(
                    "max_colors {} exceeds {}",
                    self.max_colors, MAX_PALETTE_SIZE
                ),
            });
        }
        if self.max_colors < 2 {
            return Err(GifError::ConfigInvalid {
                message: format!("max_colors must be at least 2, got {}", self.max_colors),
            });
        }
        if !(1..=30).contains(&self.sample_factor) {
            return Err(GifError::ConfigInvalid {
                message: format!("sample_factor must be 1..=30, got {}", self.sample_factor),
            });
        }
        Ok(())
    }
}

/// Emitted once per completed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub total: u32,
    pub encoded: u32,
}

/// Structured error taxonomy with stable codes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GifError {
    #[error("E_SOURCE: unsupported source: {message}")]
    UnsupportedSourceKind { message: String },

    #[error("E_PALETTE: palette overflow: {message}")]
    PaletteOverflow { message: String },

    #[error("E_ENCODE: GIF encoding failed: {message}")]
    EncodeError { message: String },

    #[error("E_MALFORMED: malformed GIF: {message}")]
    MalformedGif { message: String },

    #[error("E_CALLBACK: progress callback failed: {message}")]
    CallbackError { message: String },

    #[error("E_FRAME: invalid frame data: {message}")]
    InvalidFrameData { message: String },

    #[error("E_CONFIG: configuration invalid: {message}")]
    ConfigInvalid { message: String },

    #[error("E_RASTER: raster operation failed: {message}")]
    RasterError { message: String },

    #[error("E_IO: I/O operation failed: {message}")]
    IoError { message: String },
}

impl GifError {
    /// Get structured error code for logging and monitoring
    pub fn code(&self) -> &'static str {
        match self {
            GifError::UnsupportedSourceKind { .. } => "E_SOURCE",
            GifError::PaletteOverflow { .. } => "E_PALETTE",
            GifError::EncodeError { .. } => "E_ENCODE",
            GifError::MalformedGif { .. } => "E_MALFORMED",
            GifError::CallbackError { .. } => "E_CALLBACK",
            GifError::InvalidFrameData { .. } => "E_FRAME",
            GifError::ConfigInvalid { .. } => "E_CONFIG",
            GifError::RasterError { .. } => "E_RASTER",
            GifError::IoError { .. } => "E_IO",
        }
    }
}

impl From<image::ImageError> for GifError {
    fn from(err: image::ImageError) -> Self {
        GifError::RasterError {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for GifError {
    fn from(err: std::io::Error) -> Self {
        GifError::IoError {
            message: err.to_string(),
        }
    }
}
