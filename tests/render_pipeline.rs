use std::path::{Path, PathBuf};

use image::{ImageFormat, Rgba, RgbaImage};
use telemetry_overlay::layout::layout_entries;
use telemetry_overlay::metadata::MetadataMap;
use telemetry_overlay::render::{self, SourceMetadata};
use telemetry_overlay::{
    Anchor, EmbeddedExif, Emit, FontBook, FontRegistry, FontRole, FontSpec, LayoutOptions,
    MetadataExtractor, OverlayError, RenderOutput, TelemetryOverlay, ValueEntry, WatermarkSpec,
};
use usvg::fontdb;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

fn drone_shot(_: &Path) -> anyhow::Result<MetadataMap> {
    let mut map = MetadataMap::new();
    map.insert("RelativeAltitude".into(), "+57.3".into());
    map.insert("DateTimeOriginal".into(), "2021:05:04 10:20:30".into());
    map.insert("Make".into(), "DJI".into());
    Ok(map)
}

fn no_metadata(_: &Path) -> anyhow::Result<MetadataMap> {
    Ok(MetadataMap::new())
}

fn write_image(dir: &Path, name: &str, size: (u32, u32), color: Rgba<u8>) -> PathBuf {
    let path = dir.join(name);
    RgbaImage::from_pixel(size.0, size.1, color)
        .save(&path)
        .unwrap();
    path
}

fn is_red(pixel: &Rgba<u8>) -> bool {
    let [r, g, b, a] = pixel.0;
    r > 250 && g < 5 && b < 5 && a == 255
}

/// Copies a regular system face with Latin glyphs into `dir`, if there is one.
fn system_font_file(dir: &Path) -> Option<PathBuf> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    let face = db.faces().find(|face| {
        face.index == 0
            && face.weight == fontdb::Weight::NORMAL
            && face.style == fontdb::Style::Normal
            && db
                .with_face_data(face.id, |data, index| {
                    ttf_parser::Face::parse(data, index).is_ok_and(|parsed| {
                        "0123456789.,ALTIUDEM".chars().all(|ch| parsed.glyph_index(ch).is_some())
                    })
                })
                .unwrap_or(false)
    })?;
    let data = db.with_face_data(face.id, |data, _| data.to_vec())?;
    let path = dir.join("regular.ttf");
    std::fs::write(&path, data).ok()?;
    Some(path)
}

/// Bounding box `(min_x, min_y, max_x, max_y)` of every non-white pixel.
fn ink_bounds(image: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
    image
        .enumerate_pixels()
        .filter(|(_, _, pixel)| **pixel != WHITE)
        .fold(None, |acc, (x, y, _)| match acc {
            None => Some((x, y, x, y)),
            Some((x0, y0, x1, y1)) => Some((x0.min(x), y0.min(y), x1.max(x), y1.max(y))),
        })
}

/// Where the block for `entries` lands on a `size` canvas.
fn expected_block(
    fonts: &FontRegistry,
    entries: &[ValueEntry],
    options: &LayoutOptions,
    anchor: Anchor,
    size: (u32, u32),
) -> (i64, i64, u32, u32) {
    let book = FontBook::load(fonts).unwrap();
    let layout = layout_entries(entries, fonts, options, &book).unwrap();
    let crop = layout.geometry.crop_size(size);
    let (x, y) = anchor.place(size, crop, options.padding);
    (x, y, crop.0, crop.1)
}

fn assert_ink_inside(image: &RgbaImage, (x, y, width, height): (i64, i64, u32, u32), padding: f32) {
    let (min_x, min_y, max_x, max_y) = ink_bounds(image).expect("no text was drawn");
    let (x, y) = (x as u32, y as u32);
    assert!(min_x >= x && min_y >= y, "ink starts at ({}, {}), block at ({}, {})", min_x, min_y, x, y);
    assert!(
        max_x < x + width && max_y < y + height,
        "ink ends at ({}, {}), block ends at ({}, {})",
        max_x,
        max_y,
        x + width,
        y + height
    );
    // Measured advances leave the right padding free of ink.
    assert!(
        (max_x as f32) < (x + width) as f32 - padding / 2.0,
        "ink at x={} reaches into the {}px padding of a block ending at {}",
        max_x,
        padding,
        x + width
    );
}

fn boxed_options() -> LayoutOptions {
    LayoutOptions {
        text_padding: 4.0,
        bg: "#000000".to_string(),
        ..LayoutOptions::default()
    }
}

#[test]
fn buffer_output_keeps_source_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_image(dir.path(), "shot.png", (320, 240), WHITE);

    let mut job = TelemetryOverlay::new(&input);
    assert!(job.prepare(&drone_shot));
    job.add_value("RelativeAltitude", Some("ALTITUDE, M"))
        .unwrap()
        .add_value("date", Some("DATE"))
        .unwrap();
    assert_eq!(job.entries().len(), 2);

    let output = job
        .render(Anchor::TopRight, &LayoutOptions::default(), Some(Emit::Buffer))
        .unwrap();
    let bytes = match output {
        RenderOutput::Encoded(bytes) => bytes,
        other => panic!("expected an encoded buffer, got {:?}", other),
    };
    assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (320, 240));
}

#[test]
fn background_block_lands_at_the_anchor() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_image(dir.path(), "shot.png", (320, 240), WHITE);

    let mut job = TelemetryOverlay::new(&input);
    assert!(job.prepare(&drone_shot));
    job.add_value("RelativeAltitude", Some("ALT")).unwrap();
    let expected = dir.path().join("shot-overlay-bottom-right.png");
    assert_eq!(job.output_path(Anchor::BottomRight), expected);

    let output = job
        .render(Anchor::BottomRight, &boxed_options(), None)
        .unwrap();
    assert_eq!(
        output,
        RenderOutput::Written {
            path: expected.clone(),
            bytes: std::fs::metadata(&expected).unwrap().len() as usize,
        }
    );

    let written = image::open(&expected).unwrap().to_rgba8();
    assert_eq!(written.dimensions(), (320, 240));
    assert_eq!(*written.get_pixel(319, 239), Rgba([0, 0, 0, 255]));
    assert_eq!(*written.get_pixel(0, 0), WHITE);
    assert_eq!(*written.get_pixel(0, 239), WHITE);
}

#[test]
fn empty_metadata_still_renders_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_image(dir.path(), "plain.png", (64, 48), WHITE);

    let mut job = TelemetryOverlay::new(&input).output_suffix("-done");
    assert!(!job.prepare(&no_metadata));
    job.add_value("RelativeAltitude", None).unwrap();
    assert!(job.entries().is_empty());

    let output = job.render(Anchor::Center, &boxed_options(), None).unwrap();
    let path = dir.path().join("plain-done.png");
    assert!(matches!(output, RenderOutput::Written { path: ref written, .. } if *written == path));

    let written = image::open(&path).unwrap().to_rgba8();
    assert!(written.pixels().all(|pixel| *pixel == WHITE));
}

#[test]
fn watermark_is_resized_and_placed() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_image(dir.path(), "shot.png", (100, 80), WHITE);
    let logo = write_image(dir.path(), "logo.png", (8, 8), RED);
    let output = dir.path().join("out.png");

    let mut job = TelemetryOverlay::new(&input)
        .output(&output)
        .watermark(WatermarkSpec::new(&logo).anchor(Anchor::TopLeft).padding(2).size(16));
    assert!(job.prepare(&drone_shot));
    job.render(Anchor::BottomLeft, &LayoutOptions::default(), None)
        .unwrap();

    let written = image::open(&output).unwrap().to_rgba8();
    assert_eq!(*written.get_pixel(1, 1), WHITE);
    assert!(is_red(written.get_pixel(2, 2)));
    assert!(is_red(written.get_pixel(17, 17)));
    assert_eq!(*written.get_pixel(18, 18), WHITE);
}

#[test]
fn invalid_options_are_rejected_before_io() {
    let mut job = TelemetryOverlay::new("does-not-exist.png");
    job.prepare(&drone_shot);
    let options = LayoutOptions {
        extra_height: f32::NAN,
        ..LayoutOptions::default()
    };
    let err = job
        .render(Anchor::TopLeft, &options, Some(Emit::Buffer))
        .unwrap_err();
    assert!(matches!(
        err,
        OverlayError::InvalidOptions {
            field: "extra_height",
            ..
        }
    ));
}

#[test]
fn missing_source_image_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut job = TelemetryOverlay::new(dir.path().join("gone.png"));
    assert!(job.prepare(&drone_shot));
    let err = job
        .render(Anchor::TopLeft, &LayoutOptions::default(), Some(Emit::Buffer))
        .unwrap_err();
    assert!(matches!(err, OverlayError::Image(_)));
}

#[test]
fn text_from_a_font_file_lands_inside_the_block() {
    let dir = tempfile::tempdir().unwrap();
    let Some(font) = system_font_file(dir.path()) else {
        eprintln!("no system font available");
        return;
    };
    let input = write_image(dir.path(), "shot.png", (400, 300), WHITE);
    let output = dir.path().join("out.png");
    let big = FontSpec::new(&font, 48.0, "#000000");
    let small = FontSpec::new(&font, 20.0, "#000000");
    let options = LayoutOptions {
        text_padding: 10.0,
        padding: 12,
        ..LayoutOptions::default()
    };

    let mut fonts = FontRegistry::default();
    fonts.set(FontRole::Big, big.clone());
    fonts.set(FontRole::Small, small.clone());
    let entries = [ValueEntry {
        value: "57.3".into(),
        label: "ALTITUDE, M".into(),
    }];
    let block = expected_block(&fonts, &entries, &options, Anchor::BottomRight, (400, 300));

    let mut job = TelemetryOverlay::new(&input)
        .output(&output)
        .font(FontRole::Big, big)
        .font(FontRole::Small, small);
    assert!(job.prepare(&drone_shot));
    job.add_value("RelativeAltitude", Some("ALTITUDE, M")).unwrap();
    assert_eq!(job.entries(), &entries);
    job.render(Anchor::BottomRight, &options, None).unwrap();

    let written = image::open(&output).unwrap().to_rgba8();
    assert_ink_inside(&written, block, options.text_padding);
}

#[test]
fn pathless_fonts_still_draw_text() {
    if FontBook::load(&FontRegistry::default()).unwrap().needs_system_fonts() {
        eprintln!("no fallback font installed");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let input = write_image(dir.path(), "shot.png", (600, 400), WHITE);
    let output = dir.path().join("out.png");
    let spec = |size: f32| FontSpec {
        path: None,
        size,
        color: "#000000".to_string(),
    };
    let options = LayoutOptions {
        text_padding: 10.0,
        ..LayoutOptions::default()
    };

    let mut fonts = FontRegistry::default();
    fonts.set(FontRole::Big, spec(64.0));
    fonts.set(FontRole::Small, spec(24.0));
    let entries = [ValueEntry {
        value: "57.3".into(),
        label: "ALTITUDE, M".into(),
    }];
    let block = expected_block(&fonts, &entries, &options, Anchor::TopRight, (600, 400));

    let mut job = TelemetryOverlay::new(&input)
        .output(&output)
        .font(FontRole::Big, spec(64.0))
        .font(FontRole::Small, spec(24.0));
    assert!(job.prepare(&drone_shot));
    job.add_value("RelativeAltitude", Some("ALTITUDE, M")).unwrap();
    job.render(Anchor::TopRight, &options, None).unwrap();

    let written = image::open(&output).unwrap().to_rgba8();
    assert_ink_inside(&written, block, options.text_padding);
}

#[test]
fn overwriting_a_jpeg_keeps_its_exif() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("DJI_0001.JPG");
    let field = exif::Field {
        tag: exif::Tag::Model,
        ifd_num: exif::In::PRIMARY,
        value: exif::Value::Ascii(vec![b"FC3411".to_vec()]),
    };
    let mut writer = exif::experimental::Writer::new();
    writer.push_field(&field);
    let mut block = std::io::Cursor::new(Vec::new());
    writer.write(&mut block, false).unwrap();
    let metadata = SourceMetadata {
        icc_profile: None,
        exif: Some(block.into_inner()),
    };
    let jpeg = render::encode(
        RgbaImage::from_pixel(120, 90, WHITE),
        ImageFormat::Jpeg,
        &metadata,
    )
    .unwrap();
    std::fs::write(&input, jpeg).unwrap();

    let mut job = TelemetryOverlay::new(&input).overwrite();
    assert!(job.prepare(&EmbeddedExif));
    job.add_value("Model", Some("CAMERA")).unwrap();
    assert_eq!(job.entries().len(), 1);
    job.render(Anchor::Center, &boxed_options(), None).unwrap();

    let after = EmbeddedExif.extract(&input).unwrap();
    assert_eq!(
        after.get("Model").and_then(|value| value.as_scalar()).as_deref(),
        Some("FC3411")
    );
    let decoded = image::open(&input).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (120, 90));
}
