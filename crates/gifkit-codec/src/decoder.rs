use gifkit_types::{DisposalMethod, GifError, Palette};
use tracing::{debug, info, warn};

use crate::lzw;

/// Default limit on logical screen and image sizes, in pixels
pub const DEFAULT_MAX_PIXELS: usize = 1 << 26;

const EXTENSION_INTRODUCER: u8 = 0x21;
const IMAGE_SEPARATOR: u8 = 0x2C;
const TRAILER: u8 = 0x3B;
const GRAPHIC_CONTROL_LABEL: u8 = 0xF9;
const APPLICATION_LABEL: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GifVersion {
    Gif87a,
    Gif89a,
}

/// Block-level view of a GIF stream, before compositing
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedGif {
    pub version: GifVersion,
    pub width: u16,
    pub height: u16,
    pub background_index: u8,
    pub global_palette: Option<Palette>,
    /// `None` when the stream carries no loop extension
    pub repeat: Option<u16>,
    pub frames: Vec<RawFrame>,
}

/// One image descriptor with its graphic control data and de-interlaced indices
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub left: u16,
    pub top: u16,
    pub width: u16,
    pub height: u16,
    pub interlaced: bool,
    pub local_palette: Option<Palette>,
    pub transparent: Option<u8>,
    pub delay_cs: u16,
    pub disposal: DisposalMethod,
    /// Row-major indices in display order
    pub indices: Vec<u8>,
}

impl DecodedGif {
    /// Palette that applies to `frame`: its local table, else the global one
    pub fn palette_for<'a>(&'a self, frame: &'a RawFrame) -> Option<&'a Palette> {
        frame.local_palette.as_ref().or(self.global_palette.as_ref())
    }
}

/// Pending graphic control extension, applied to the next image
#[derive(Debug, Default, Clone, Copy)]
struct GraphicControl {
    disposal: DisposalMethod,
    delay_cs: u16,
    transparent: Option<u8>,
}

/// Strict GIF87a/GIF89a parser
#[derive(Debug, Clone)]
pub struct GifDecoder {
    max_pixels: usize,
}

impl Default for GifDecoder {
    fn default() -> Self {
        Self {
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

impl GifDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_pixels(mut self, max_pixels: usize) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    /// Walk the stream block by block, in file order, until the trailer.
    #[tracing::instrument(level = "info", skip(self, data), fields(bytes = data.len()))]
    pub fn decode(&self, data: &[u8]) -> Result<DecodedGif, GifError> {
        let mut reader = ByteReader::new(data);

        let version = match reader.take(6, "header")? {
            b"GIF89a" => GifVersion::Gif89a,
            b"GIF87a" => GifVersion::Gif87a,
            _ => return Err(malformed("missing GIF header")),
        };

        let width = reader.u16("logical screen descriptor")?;
        let height = reader.u16("logical screen descriptor")?;
        let packed = reader.u8("logical screen descriptor")?;
        let background_index = reader.u8("logical screen descriptor")?;
        let _aspect = reader.u8("logical screen descriptor")?;

        if width == 0 || height == 0 {
            return Err(malformed("empty logical screen"));
        }
        self.check_size(width, height, "logical screen")?;

        let global_palette = if packed & 0x80 != 0 {
            Some(read_color_table(&mut reader, packed, "global color table")?)
        } else {
            None
        };

        let mut decoded = DecodedGif {
            version,
            width,
            height,
            background_index,
            global_palette,
            repeat: None,
            frames: Vec::new(),
        };

        let mut control: Option<GraphicControl> = None;
        loop {
            let introducer = reader
                .u8("block")
                .map_err(|_| malformed("missing trailer"))?;
            match introducer {
                EXTENSION_INTRODUCER => {
                    let label = reader.u8("extension label")?;
                    match label {
                        GRAPHIC_CONTROL_LABEL => {
                            control = Some(read_graphic_control(&mut reader)?);
                        }
                        APPLICATION_LABEL => {
                            if let Some(repeat) = read_application(&mut reader)? {
                                decoded.repeat = Some(repeat);
                            }
                        }
                        other => {
                            debug!(stage = "decode", label = other, "Skipping extension");
                            skip_sub_blocks(&mut reader)?;
                        }
                    }
                }
                IMAGE_SEPARATOR => {
                    let frame = self.read_image(&mut reader, &decoded, control.take())?;
                    debug!(
                        stage = "decode",
                        frame_idx = decoded.frames.len(),
                        width = frame.width,
                        height = frame.height,
                        interlaced = frame.interlaced,
                        "Frame decoded"
                    );
                    decoded.frames.push(frame);
                }
                TRAILER => break,
                other => {
                    return Err(malformed(format!(
                        "unexpected block 0x{:02X} at offset {}",
                        other,
                        reader.pos - 1
                    )))
                }
            }
        }

        if reader.remaining() > 0 {
            warn!(
                stage = "decode",
                trailing_bytes = reader.remaining(),
                "Ignoring data after trailer"
            );
        }

        info!(
            stage = "decode",
            frames = decoded.frames.len(),
            width = decoded.width,
            height = decoded.height,
            repeat = ?decoded.repeat,
            "GIF decoding completed"
        );

        Ok(decoded)
    }

    fn read_image(
        &self,
        reader: &mut ByteReader<'_>,
        decoded: &DecodedGif,
        control: Option<GraphicControl>,
    ) -> Result<RawFrame, GifError> {
        let left = reader.u16("image descriptor")?;
        let top = reader.u16("image descriptor")?;
        let width = reader.u16("image descriptor")?;
        let height = reader.u16("image descriptor")?;
        let packed = reader.u8("image descriptor")?;
        self.check_size(width, height, "image")?;

        let local_palette = if packed & 0x80 != 0 {
            Some(read_color_table(reader, packed, "local color table")?)
        } else {
            None
        };
        if local_palette.is_none() && decoded.global_palette.is_none() {
            return Err(malformed(format!(
                "frame {} has no local or global color table",
                decoded.frames.len()
            )));
        }
        let interlaced = packed & 0x40 != 0;

        let min_code_size = reader.u8("image data")?;
        let data = read_sub_blocks(reader)?;
        let pixels = width as usize * height as usize;
        let mut indices = lzw::decompress(&data, min_code_size, pixels)?;
        if interlaced {
            indices = deinterlace(&indices, width as usize, height as usize);
        }

        let control = control.unwrap_or_default();
        Ok(RawFrame {
            left,
            top,
            width,
            height,
            interlaced,
            local_palette,
            transparent: control.transparent,
            delay_cs: control.delay_cs,
            disposal: control.disposal,
            indices,
        })
    }

    fn check_size(&self, width: u16, height: u16, what: &str) -> Result<(), GifError> {
        if width as usize * height as usize > self.max_pixels {
            return Err(malformed(format!(
                "{} {}x{} exceeds the {} pixel limit",
                what, width, height, self.max_pixels
            )));
        }
        Ok(())
    }
}

fn malformed(message: impl Into<String>) -> GifError {
    GifError::MalformedGif {
        message: message.into(),
    }
}

fn read_color_table(
    reader: &mut ByteReader<'_>,
    packed: u8,
    what: &str,
) -> Result<Palette, GifError> {
    let entries = 2usize << (packed & 0x07);
    Palette::from_rgb_bytes(reader.take(entries * 3, what)?, None)
}

fn read_graphic_control(reader: &mut ByteReader<'_>) -> Result<GraphicControl, GifError> {
    let size = reader.u8("graphic control extension")?;
    if size < 4 {
        return Err(malformed(format!("graphic control block of {} bytes", size)));
    }
    let block = reader.take(size as usize, "graphic control extension")?;
    let packed = block[0];
    let control = GraphicControl {
        disposal: DisposalMethod::from_code((packed >> 2) & 0x07),
        delay_cs: u16::from_le_bytes([block[1], block[2]]),
        transparent: (packed & 0x01 != 0).then_some(block[3]),
    };
    skip_sub_blocks(reader)?;
    Ok(control)
}

/// Returns the loop count of a NETSCAPE2.0 or ANIMEXTS1.0 block
fn read_application(reader: &mut ByteReader<'_>) -> Result<Option<u16>, GifError> {
    let size = reader.u8("application extension")?;
    let identifier = reader.take(size as usize, "application extension")?;
    let is_loop = identifier == b"NETSCAPE2.0" || identifier == b"ANIMEXTS1.0";

    let mut repeat = None;
    loop {
        let len = reader.u8("application data")? as usize;
        if len == 0 {
            break;
        }
        let block = reader.take(len, "application data")?;
        if is_loop && len >= 3 && block[0] == 0x01 {
            repeat = Some(u16::from_le_bytes([block[1], block[2]]));
        }
    }
    Ok(repeat)
}

fn read_sub_blocks(reader: &mut ByteReader<'_>) -> Result<Vec<u8>, GifError> {
    let mut data = Vec::new();
    loop {
        let len = reader.u8("data sub-block")? as usize;
        if len == 0 {
            return Ok(data);
        }
        data.extend_from_slice(reader.take(len, "data sub-block")?);
    }
}

fn skip_sub_blocks(reader: &mut ByteReader<'_>) -> Result<(), GifError> {
    loop {
        let len = reader.u8("data sub-block")? as usize;
        if len == 0 {
            return Ok(());
        }
        reader.take(len, "data sub-block")?;
    }
}

/// Reorder rows stored in the four interlace passes into display order
pub fn deinterlace(indices: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut output = vec![0u8; indices.len()];
    let mut source_rows = indices.chunks_exact(width.max(1));
    for (start, step) in [(0, 8), (4, 8), (2, 4), (1, 2)] {
        for y in (start..height).step_by(step) {
            if let Some(row) = source_rows.next() {
                output[y * width..(y + 1) * width].copy_from_slice(row);
            }
        }
    }
    output
}

/// Bounds-checked cursor; running off the end is a truncated stream
struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], GifError> {
        if self.remaining() < len {
            return Err(malformed(format!(
                "truncated {} at offset {}",
                what, self.pos
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> Result<u8, GifError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16, GifError> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINY_GIF: [u8; 36] = [
        0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x02, 0x00, 0x02, 0x00, 0x80, 0x01, 0x00, 0x00, 0x00,
        0x00, 0xff, 0xff, 0xff, 0x2c, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x02, 0x00, 0x00, 0x02,
        0x03, 0x0c, 0x10, 0x05, 0x00, 0x3b,
    ];

    fn header(width: u16, height: u16) -> Vec<u8> {
        let mut data = b"GIF89a".to_vec();
        data.extend_from_slice(&width.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
        data.extend_from_slice(&[0x80, 0, 0]);
        data.extend_from_slice(&[0, 0, 0, 255, 255, 255]);
        data
    }

    fn image(data: &mut Vec<u8>, width: u16, height: u16, packed: u8, indices: &[u8]) {
        data.push(0x2C);
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.extend_from_slice(&width.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
        data.push(packed);
        data.push(2);
        lzw::write_sub_blocks(data, &lzw::compress(indices, 2).unwrap());
    }

    #[test]
    fn test_decode_reference_stream() {
        let decoded = GifDecoder::new().decode(&TINY_GIF).unwrap();

        assert_eq!(decoded.version, GifVersion::Gif89a);
        assert_eq!((decoded.width, decoded.height), (2, 2));
        assert_eq!(decoded.repeat, None);
        assert_eq!(decoded.frames.len(), 1);

        let frame = &decoded.frames[0];
        assert_eq!(frame.indices, vec![1, 0, 0, 1]);
        assert_eq!(frame.delay_cs, 0);
        assert_eq!(frame.transparent, None);
        let palette = decoded.palette_for(frame).unwrap();
        assert_eq!(palette.get(1), Some([255, 255, 255]));
    }

    #[test]
    fn test_missing_trailer() {
        let err = GifDecoder::new()
            .decode(&TINY_GIF[..TINY_GIF.len() - 1])
            .unwrap_err();
        assert_eq!(err.code(), "E_MALFORMED");
        assert!(err.to_string().contains("trailer"));
    }

    #[test]
    fn test_truncated_and_bad_header() {
        let decoder = GifDecoder::new();
        assert!(decoder.decode(b"GIF").is_err());
        assert!(decoder.decode(b"PNG89a\x01\x00\x01\x00\x00\x00\x00\x3b").is_err());
        assert!(decoder.decode(&TINY_GIF[..20]).is_err());
        assert!(decoder.decode(&[]).is_err());
    }

    #[test]
    fn test_gif87a_accepted() {
        let mut data = TINY_GIF.to_vec();
        data[4] = b'7';
        let decoded = GifDecoder::new().decode(&data).unwrap();
        assert_eq!(decoded.version, GifVersion::Gif87a);
    }

    #[test]
    fn test_frame_without_palette() {
        let mut data = b"GIF89a\x01\x00\x01\x00\x00\x00\x00".to_vec();
        image(&mut data, 1, 1, 0, &[0]);
        data.push(0x3B);
        let err = GifDecoder::new().decode(&data).unwrap_err();
        assert!(matches!(err, GifError::MalformedGif { .. }));
    }

    #[test]
    fn test_control_and_loop_extensions() {
        let mut data = header(1, 1);
        data.extend_from_slice(&[0x21, 0xFF, 0x0B]);
        data.extend_from_slice(b"ANIMEXTS1.0");
        data.extend_from_slice(&[0x03, 0x01, 0x05, 0x00, 0x00]);
        // comment extension is skipped
        data.extend_from_slice(&[0x21, 0xFE, 0x02, b'h', b'i', 0x00]);
        data.extend_from_slice(&[0x21, 0xF9, 0x04, (3 << 2) | 1, 0x0A, 0x00, 0x01, 0x00]);
        image(&mut data, 1, 1, 0, &[1]);
        image(&mut data, 1, 1, 0, &[0]);
        data.push(0x3B);

        let decoded = GifDecoder::new().decode(&data).unwrap();
        assert_eq!(decoded.repeat, Some(5));
        assert_eq!(decoded.frames.len(), 2);

        let first = &decoded.frames[0];
        assert_eq!(first.disposal, DisposalMethod::RestoreToPrevious);
        assert_eq!(first.delay_cs, 10);
        assert_eq!(first.transparent, Some(1));

        // graphic control applies to one image only
        let second = &decoded.frames[1];
        assert_eq!(second.disposal, DisposalMethod::None);
        assert_eq!(second.transparent, None);
    }

    #[test]
    fn test_interlaced_rows() {
        let mut data = header(1, 8);
        // rows in stream order for passes (0,8) (4,8) (2,4) (1,2)
        image(&mut data, 1, 8, 0x40, &[0, 1, 1, 0, 0, 0, 0, 0]);
        data.push(0x3B);

        let decoded = GifDecoder::new().decode(&data).unwrap();
        let frame = &decoded.frames[0];
        assert!(frame.interlaced);
        // rows 4 and 2 carry the set pixels
        assert_eq!(frame.indices, vec![0, 0, 1, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_deinterlace_order() {
        let stream = [0u8, 4, 2, 6, 1, 3, 5, 7];
        assert_eq!(deinterlace(&stream, 1, 8), vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_pixel_limit() {
        let err = GifDecoder::new()
            .with_max_pixels(3)
            .decode(&TINY_GIF)
            .unwrap_err();
        assert!(err.to_string().contains("pixel limit"));
    }
}
