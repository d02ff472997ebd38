use std::ptr;

use gifkit::{
    create_gif, progress_channel, read_gif, BoxError, DisposalMethod, EncodeOptions, FrameSource,
    GifError, GifImage, PaletteStrategy, ProgressEvent, Rgb,
};
use image::{Rgba, RgbaImage};

const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];
const MAGENTA: [u8; 4] = [255, 0, 255, 255];

fn solid(size: u32, rgba: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(size, size, Rgba(rgba))
}

fn three_solids(options: EncodeOptions) -> GifImage {
    create_gif(options)
        .add_frame(vec![solid(10, RED), solid(10, GREEN), solid(10, BLUE)])
        .to_image()
        .unwrap()
}

#[test]
fn test_three_solid_frames_round_trip() {
    let gif = three_solids(EncodeOptions::default().with_delay(50).with_repeat(0));
    assert_eq!(gif.frame_count(), 3);
    assert_eq!((gif.width(), gif.height()), (10, 10));

    let reader = read_gif(gif.clone());
    let sequence = reader.sequence().unwrap();
    assert_eq!(sequence.len(), 3);
    assert_eq!(sequence.repeat(), Some(0));

    for (frame, expected) in sequence.iter().zip([RED, GREEN, BLUE]) {
        assert_eq!(frame.delay_ms(), 50);
        assert_eq!(frame.image(), &solid(10, expected));
    }
}

#[test]
fn test_decoding_is_idempotent() {
    let gif = three_solids(EncodeOptions::default());

    let first = read_gif(gif.as_bytes().to_vec()).to_frames().unwrap();
    let second = read_gif(gif.as_bytes().to_vec()).to_frames().unwrap();
    assert_eq!(first, second);

    let reader = gif.reader();
    assert!(ptr::eq(reader.sequence().unwrap(), reader.sequence().unwrap()));
}

#[test]
fn test_progress_counts_every_frame() {
    let frames: Vec<RgbaImage> = (0..5).map(|i| solid(8, [i * 40, 0, 0, 255])).collect();
    let mut events = Vec::new();

    create_gif(EncodeOptions::default())
        .add_frame(frames)
        .to_image_with_progress(|event: ProgressEvent| -> Result<(), BoxError> {
            events.push(event);
            Ok(())
        })
        .unwrap();

    assert_eq!(
        events.iter().map(|e| e.encoded).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );
    assert!(events.iter().all(|e| e.total == 5));
}

#[test]
fn test_progress_over_channel() {
    let (mut sink, events) = progress_channel();
    create_gif(EncodeOptions::default())
        .add_frame(vec![solid(4, RED), solid(4, BLUE)])
        .to_image_with_sink(&mut sink)
        .unwrap();
    drop(sink);

    let seen: Vec<(u32, u32)> = events.iter().map(|e| (e.encoded, e.total)).collect();
    assert_eq!(seen, vec![(1, 2), (2, 2)]);
}

#[test]
fn test_transparent_key_decodes_as_clear() {
    let framed = |border: [u8; 4]| {
        RgbaImage::from_fn(12, 12, |x, y| {
            if (3..9).contains(&x) && (3..9).contains(&y) {
                Rgba(MAGENTA)
            } else {
                Rgba(border)
            }
        })
    };

    let gif = create_gif(EncodeOptions::default().with_transparent(Rgb::new(255, 0, 255)))
        .add_frame(vec![framed(RED), framed(GREEN)])
        .to_image()
        .unwrap();

    for frame in gif.to_frames().unwrap() {
        let image = frame.image();
        assert_eq!(image.get_pixel(5, 5)[3], 0, "keyed pixel must be transparent");
        assert_eq!(image.get_pixel(0, 0)[3], 255);
    }
}

#[test]
fn test_alpha_zero_survives_re_export() {
    let mut image = solid(6, BLUE);
    image.put_pixel(2, 2, Rgba([0, 0, 0, 0]));

    let gif = create_gif(EncodeOptions::default()).add_frame(image).to_image().unwrap();
    let again = read_gif(gif)
        .to_gif(EncodeOptions::default())
        .unwrap()
        .to_image()
        .unwrap();

    let first = again.first_frame().unwrap();
    assert_eq!(first.get_pixel(2, 2)[3], 0);
    assert_eq!(first.get_pixel(3, 3).0, BLUE);
}

#[test]
fn test_loop_count_is_recovered() {
    for repeat in [0u16, 3] {
        let gif = three_solids(EncodeOptions::default().with_repeat(repeat));
        assert_eq!(gif.reader().sequence().unwrap().repeat(), Some(repeat));
    }
}

#[test]
fn test_add_frame_concatenates_in_call_order() {
    let gif = create_gif(EncodeOptions::default())
        .add_frame(vec![solid(5, RED), solid(5, GREEN)])
        .add_frame(vec![solid(5, BLUE)])
        .to_image()
        .unwrap();

    let colors: Vec<[u8; 4]> = gif
        .to_frames()
        .unwrap()
        .iter()
        .map(|f| f.image().get_pixel(0, 0).0)
        .collect();
    assert_eq!(colors, vec![RED, GREEN, BLUE]);
}

#[test]
fn test_animated_sources_keep_their_timing() {
    let fast = create_gif(EncodeOptions::default().with_delay(30))
        .add_frame(vec![solid(8, RED), solid(8, GREEN)])
        .to_image()
        .unwrap();
    let slow = create_gif(EncodeOptions::default().with_delay(200))
        .add_frame(vec![solid(8, BLUE), solid(8, MAGENTA), solid(8, RED)])
        .to_image()
        .unwrap();

    let joined = create_gif(EncodeOptions::default().with_delay(999))
        .add_frame(&fast)
        .add_frame(slow)
        .to_image()
        .unwrap();

    let frames = joined.to_frames().unwrap();
    let delays: Vec<u32> = frames.iter().map(|f| f.delay_ms()).collect();
    assert_eq!(delays, vec![30, 30, 200, 200, 200]);
    assert!(frames
        .iter()
        .all(|f| f.disposal() == DisposalMethod::RestoreBackground));
    assert_eq!(frames[2].image().get_pixel(1, 1).0, BLUE);
}

#[test]
fn test_to_gif_applies_fresh_options() {
    let gif = three_solids(EncodeOptions::default().with_delay(40).with_repeat(0));

    let remade = read_gif(gif)
        .to_gif(EncodeOptions::default().with_repeat(7))
        .unwrap()
        .to_image()
        .unwrap();

    let sequence = read_gif(remade).sequence().unwrap().clone();
    assert_eq!(sequence.repeat(), Some(7));
    assert_eq!(sequence.len(), 3);
    assert!(sequence.iter().all(|f| f.delay_ms() == 40));
}

#[test]
fn test_truncated_gif_is_malformed() {
    let gif = three_solids(EncodeOptions::default());
    let bytes = gif.as_bytes();

    let err = read_gif(bytes[..bytes.len() - 1].to_vec())
        .to_frames()
        .unwrap_err();
    assert!(matches!(err, GifError::MalformedGif { .. }));
    assert!(GifImage::from_bytes(bytes[..bytes.len() / 2].to_vec()).is_err());
}

#[test]
fn test_callback_error_fails_export_then_retry_succeeds() {
    let mut builder = create_gif(EncodeOptions::default())
        .add_frame(vec![solid(4, RED), solid(4, GREEN), solid(4, BLUE)]);

    let err = builder
        .to_image_with_progress(|event: ProgressEvent| -> Result<(), BoxError> {
            if event.encoded == 2 {
                return Err("progress listener failed".into());
            }
            Ok(())
        })
        .unwrap_err();
    assert_eq!(err.code(), "E_CALLBACK");
    assert!(err.to_string().contains("progress listener failed"));

    let gif = builder.to_image().unwrap();
    assert_eq!(gif.frame_count(), 3);
}

#[test]
fn test_successful_export_is_cached() {
    let mut builder = create_gif(EncodeOptions::default()).add_frame(solid(4, RED));
    let first = builder.to_image().unwrap();

    let mut calls = 0;
    let second = builder
        .to_image_with_progress(|_event: ProgressEvent| -> Result<(), BoxError> {
            calls += 1;
            Ok(())
        })
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(calls, 0, "cached export reports no progress");
}

#[test]
fn test_mismatched_sizes_use_first_canvas() {
    let wide = RgbaImage::from_pixel(20, 5, Rgba(GREEN));
    let gif = create_gif(EncodeOptions::default())
        .add_frame(solid(10, RED))
        .add_frame(wide)
        .to_image()
        .unwrap();

    assert_eq!((gif.width(), gif.height()), (10, 10));
    let frames = gif.to_frames().unwrap();
    assert_eq!(frames[1].image().dimensions(), (10, 10));
}

#[test]
fn test_unsupported_source_kind() {
    let err = create_gif(EncodeOptions::default())
        .add_frame(FrameSource::animated(vec![0x89, b'P', b'N', b'G']))
        .to_image()
        .unwrap_err();
    assert!(matches!(err, GifError::UnsupportedSourceKind { .. }));
}

#[test]
fn test_many_colors_stay_close() {
    let gradient = |shift: u32| {
        RgbaImage::from_fn(48, 48, |x, y| Rgba([(x * 5) as u8, (y * 5) as u8, (shift * 70) as u8, 255]))
    };
    let frames: Vec<RgbaImage> = (0..3).map(gradient).collect();

    for palette in [PaletteStrategy::Auto, PaletteStrategy::Global] {
        let gif = create_gif(EncodeOptions::default().with_palette(palette))
            .add_frame(frames.clone())
            .to_image()
            .unwrap();

        for (decoded, original) in gif.to_frames().unwrap().iter().zip(&frames) {
            let total: u64 = decoded
                .image()
                .as_raw()
                .iter()
                .zip(original.as_raw())
                .map(|(&a, &b)| a.abs_diff(b) as u64)
                .sum();
            let mean = total as f64 / original.as_raw().len() as f64;
            assert!(mean < 8.0, "{:?}: mean channel error {:.2}", palette, mean);
        }
    }
}

#[test]
fn test_save_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let gif = three_solids(EncodeOptions::default().with_delay(60));

    let gif_path = dir.path().join("solids.gif");
    gif.save(&gif_path).unwrap();
    assert_eq!(std::fs::read(&gif_path).unwrap(), gif.as_bytes());

    let png_path = dir.path().join("first.png");
    gif.save(&png_path).unwrap();
    let png = image::open(&png_path).unwrap().to_rgba8();
    assert_eq!(png, solid(10, RED));

    match FrameSource::open(&gif_path).unwrap() {
        FrameSource::Animated(bytes) => assert_eq!(bytes, gif.as_bytes()),
        other => panic!("expected animated source, got {:?}", other),
    }
    assert!(matches!(
        FrameSource::open(&png_path).unwrap(),
        FrameSource::Still(_)
    ));
}

#[test]
fn test_options_from_json() {
    let options: EncodeOptions =
        serde_json::from_str(r##"{"delay": 80, "transparent": "#00ff00", "repeat": 2}"##).unwrap();
    let gif = create_gif(options)
        .add_frame(vec![solid(4, GREEN), solid(4, RED)])
        .to_image()
        .unwrap();

    let sequence = gif.reader().sequence().unwrap().clone();
    assert_eq!(sequence.repeat(), Some(2));
    assert_eq!(sequence.frames()[0].delay_ms(), 80);
    assert_eq!(sequence.frames()[0].image().get_pixel(0, 0)[3], 0);
    assert_eq!(sequence.frames()[1].image().get_pixel(0, 0).0, RED);
}
