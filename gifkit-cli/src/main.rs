use std::fs::read_dir;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gifkit::{
    create_gif, BoxError, EncodeOptions, FrameSource, GifBuilder, GifImage, GifReader,
    PaletteStrategy, ProgressEvent, Rgb,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gifkit")]
#[command(about = "Build animated GIFs from stills or other GIFs, split them, re-export them")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build one GIF from images, directories of images and GIFs, in order
    Create {
        /// Image files or directories (directory entries are taken in path order)
        #[arg(required = true, value_name = "INPUT")]
        inputs: Vec<PathBuf>,

        /// Output file; non-GIF extensions receive the first frame
        #[arg(long, value_name = "FILE")]
        out: PathBuf,

        #[command(flatten)]
        encode: EncodeArgs,
    },
    /// Write every frame of a GIF as a separate image
    Split {
        #[arg(value_name = "GIF")]
        input: PathBuf,

        #[arg(long, value_name = "DIR")]
        out_dir: PathBuf,

        /// Image format extension for the frames
        #[arg(long, default_value = "png")]
        format: String,
    },
    /// Decode a GIF and encode its frames again with new options
    Remake {
        #[arg(value_name = "GIF")]
        input: PathBuf,

        #[arg(long, value_name = "FILE")]
        out: PathBuf,

        #[command(flatten)]
        encode: EncodeArgs,
    },
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// JSON file with encode options; flags below override it
    #[arg(long, value_name = "FILE")]
    options: Option<PathBuf>,

    /// Delay of still frames in milliseconds
    #[arg(long)]
    delay: Option<u32>,

    /// Color rendered transparent (#RRGGBB, #RGB or r,g,b)
    #[arg(long)]
    transparent: Option<Rgb>,

    /// Loop count, 0 = forever
    #[arg(long)]
    repeat: Option<u16>,

    /// Palette strategy: auto, global or local
    #[arg(long)]
    palette: Option<PaletteStrategy>,

    /// Print encode progress as encoded/total
    #[arg(long)]
    progress: bool,
}

impl EncodeArgs {
    fn options(&self) -> Result<EncodeOptions> {
        let mut options = match &self.options {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read options: {:?}", path))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("Failed to parse options: {:?}", path))?
            }
            None => EncodeOptions::default(),
        };

        if let Some(delay) = self.delay {
            options.delay = delay;
        }
        if let Some(color) = self.transparent {
            options.transparent = Some(color);
        }
        if let Some(repeat) = self.repeat {
            options.repeat = repeat;
        }
        if let Some(palette) = self.palette {
            options.palette = palette;
        }
        options.validate()?;
        Ok(options)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Command::Create {
            inputs,
            out,
            encode,
        } => create(&inputs, &out, &encode),
        Command::Split {
            input,
            out_dir,
            format,
        } => split(&input, &out_dir, &format),
        Command::Remake { input, out, encode } => remake(&input, &out, &encode),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().with_current_span(true).init();
    } else {
        builder.init();
    }
}

fn create(inputs: &[PathBuf], out: &Path, encode: &EncodeArgs) -> Result<()> {
    let options = encode.options()?;
    let mut builder = create_gif(options);

    for path in expand_inputs(inputs)? {
        let source = FrameSource::open(&path)
            .with_context(|| format!("Failed to load frame source: {:?}", path))?;
        info!(path = ?path, animated = matches!(source, FrameSource::Animated(_)), "Adding source");
        builder = builder.add_frame(source);
    }

    log_options(&builder);
    let gif = if encode.progress {
        builder.to_image_with_progress(print_progress)?
    } else {
        builder.to_image()?
    };
    save(&gif, out)
}

fn split(input: &Path, out_dir: &Path, format: &str) -> Result<()> {
    let reader = GifReader::open(input).with_context(|| format!("Failed to read {:?}", input))?;
    let frames = reader
        .to_frames()
        .with_context(|| format!("Failed to decode {:?}", input))?;

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {:?}", out_dir))?;
    for (idx, frame) in frames.iter().enumerate() {
        let path = out_dir.join(format!("{:04}.{}", idx, format));
        frame
            .image()
            .save(&path)
            .with_context(|| format!("Failed to write frame: {:?}", path))?;
        info!(frame_idx = idx, delay_ms = frame.delay_ms(), path = ?path, "Frame written");
    }

    info!(frames = frames.len(), out_dir = ?out_dir, "GIF split");
    Ok(())
}

fn remake(input: &Path, out: &Path, encode: &EncodeArgs) -> Result<()> {
    let options = encode.options()?;
    let reader = GifReader::open(input).with_context(|| format!("Failed to read {:?}", input))?;
    let mut builder = reader
        .to_gif(options)
        .with_context(|| format!("Failed to decode {:?}", input))?;

    log_options(&builder);
    let gif = if encode.progress {
        builder.to_image_with_progress(print_progress)?
    } else {
        builder.to_image()?
    };
    save(&gif, out)
}

fn log_options(builder: &GifBuilder) {
    let options = builder.options();
    info!(
        sources = builder.descriptor().sources.len(),
        delay_ms = options.delay,
        repeat = options.repeat,
        palette = ?options.palette,
        transparent = ?options.transparent,
        "Encoding GIF"
    );
}

fn save(gif: &GifImage, out: &Path) -> Result<()> {
    gif.save(out)
        .with_context(|| format!("Failed to write {:?}", out))?;
    info!(
        out = ?out,
        frames = gif.frame_count(),
        width = gif.width(),
        height = gif.height(),
        bytes = gif.as_bytes().len(),
        "GIF saved"
    );
    Ok(())
}

fn print_progress(event: ProgressEvent) -> Result<(), BoxError> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}/{}", event.encoded, event.total)?;
    Ok(())
}

/// Files as given; directories replaced by their image files in path order
fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            paths.push(input.clone());
            continue;
        }

        let mut entries = Vec::new();
        for entry in read_dir(input).with_context(|| format!("Failed to list {:?}", input))? {
            let path = entry
                .with_context(|| format!("Failed to read entry in {:?}", input))?
                .path();
            if path.is_file() {
                entries.push(path);
            }
        }
        entries.sort();

        if entries.is_empty() {
            warn!(dir = ?input, "Directory holds no files");
        }
        paths.extend(entries);
    }
    Ok(paths)
}
