//! Build animated GIFs from still images or other GIFs, and read them back.
//!
//! ```no_run
//! use gifkit::{create_gif, read_gif, EncodeOptions, FrameSource};
//!
//! # fn main() -> Result<(), gifkit::GifError> {
//! let gif = create_gif(EncodeOptions::default().with_delay(50))
//!     .add_frame(FrameSource::open("a.png")?)
//!     .add_frame(FrameSource::open("b.png")?)
//!     .to_image()?;
//! gif.save("out.gif")?;
//!
//! for (idx, frame) in read_gif(gif).to_frames()?.iter().enumerate() {
//!     frame.image().save(format!("frame-{idx}.png"))?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod output;
pub mod reader;
pub mod source;

pub use builder::{create_gif, materialize, GifBuilder, GifDescriptor};
pub use output::GifImage;
pub use reader::{read_gif, GifReader};
pub use source::{adapt, FrameSource};

pub use gifkit_codec::{progress_channel, ChannelSink, NoProgress, ProgressSink};
pub use gifkit_types::{
    BoxError, DisposalMethod, EncodeOptions, Frame, FrameSequence, GifError, PaletteStrategy,
    ProgressEvent, Rgb,
};
