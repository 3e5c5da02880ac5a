use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{
    DynamicImage, ExtendedColorType, ImageDecoder, ImageEncoder, ImageError, ImageFormat,
    ImageReader, Rgba, RgbaImage,
};
use resvg::render;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tiny_skia::{ColorU8, IntRect, Pixmap, PixmapPaint, Transform};
use tracing::{debug, info, warn};
use usvg::{Options, Tree, fontdb};

use crate::anchor::Anchor;
use crate::error::{OverlayError, Result};
use crate::font::FontBook;
use crate::layout::{DrawCommand, LayoutOptions, OverlayLayout};

/// Format used when the image is not written to a file.
pub const STREAM_FORMAT: ImageFormat = ImageFormat::Jpeg;

pub const JPEG_QUALITY: u8 = 92;

/// Color profile and EXIF carried from the source to the output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMetadata {
    pub icc_profile: Option<Vec<u8>>,
    /// TIFF-structured EXIF without the `Exif\0\0` marker.
    pub exif: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct SourceImage {
    pub pixels: RgbaImage,
    pub metadata: SourceMetadata,
}

/// A logo drawn above the text block.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkSpec {
    pub path: PathBuf,
    pub anchor: Anchor,
    pub padding: u32,
    /// Side of the square the image is resized to.
    pub size: u32,
    pub opacity_impl: f32,
}

/// Bottom-right keeps the logo clear of the default top-right text block.
fn default_watermark_anchor() -> Anchor {
    Anchor::BottomRight
}

fn default_watermark_size() -> u32 {
    200
}

impl WatermarkSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            anchor: default_watermark_anchor(),
            padding: 0,
            size: default_watermark_size(),
            opacity_impl: 0.0,
        }
    }

    pub fn anchor(mut self, anchor: Anchor) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn padding(mut self, padding: u32) -> Self {
        self.padding = padding;
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn opacity_impl(mut self, divisor: f32) -> Self {
        self.opacity_impl = divisor;
        self
    }
}

/// Where the finished image goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emit {
    /// Encoded by the file extension and written to disk.
    File(PathBuf),
    /// Encoded as [`STREAM_FORMAT`] and returned.
    Buffer,
    /// Encoded as [`STREAM_FORMAT`] and written to stdout.
    Stdout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutput {
    Written { path: PathBuf, bytes: usize },
    Encoded(Vec<u8>),
    Streamed { bytes: usize },
}

impl RenderOutput {
    pub fn len(&self) -> usize {
        match self {
            RenderOutput::Written { bytes, .. } | RenderOutput::Streamed { bytes } => *bytes,
            RenderOutput::Encoded(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Draws the text block and the optional watermark over `source`.
///
/// The result always has the dimensions of `source`.
pub fn compose(
    source: &RgbaImage,
    layout: &OverlayLayout,
    anchor: Anchor,
    options: &LayoutOptions,
    watermark: Option<&WatermarkSpec>,
    fonts: &FontBook,
) -> Result<RgbaImage> {
    let size = source.dimensions();
    let fontdb = build_fontdb(fonts);

    let mut overlay = blank_pixmap(size)?;
    if !options.is_transparent() {
        render_svg_onto(&mut overlay, &background_svg(size, &options.bg), &fontdb)?;
        if options.opacity_impl > 1.0 {
            divide_alpha(&mut overlay, options.opacity_impl);
        }
    }
    if !layout.commands.is_empty() {
        render_svg_onto(&mut overlay, &text_svg(size, &layout.commands, fonts), &fontdb)?;
    }

    let crop = layout.geometry.crop_size(size);
    let overlay = crop_top_left(&overlay, crop);

    let mut canvas = pixmap_from_rgba(source)?;
    match overlay {
        Some(overlay) => {
            let (x, y) = anchor.place(size, crop, options.padding);
            debug!(x, y, width = crop.0, height = crop.1, %anchor, "placing overlay");
            draw_at(&mut canvas, &overlay, (x, y));
        }
        None => debug!("overlay is empty; nothing to draw"),
    }

    if let Some(spec) = watermark {
        let mark = load_watermark(spec)?;
        let (x, y) = spec.anchor.place(size, (mark.width(), mark.height()), spec.padding);
        debug!(x, y, anchor = %spec.anchor, path = %spec.path.display(), "placing watermark");
        draw_at(&mut canvas, &mark, (x, y));
    }

    Ok(rgba_from_pixmap(&canvas))
}

/// Encodes `image` and sends it to `emit`.
pub fn emit(image: RgbaImage, metadata: &SourceMetadata, target: &Emit) -> Result<RenderOutput> {
    match target {
        Emit::File(path) => {
            let format = ImageFormat::from_path(path)?;
            let bytes = encode(image, format, metadata)?;
            std::fs::write(path, &bytes)
                .with_context(|| format!("failed to write image: {}", path.display()))?;
            info!(path = %path.display(), bytes = bytes.len(), "overlay written");
            Ok(RenderOutput::Written {
                path: path.clone(),
                bytes: bytes.len(),
            })
        }
        Emit::Buffer => Ok(RenderOutput::Encoded(encode(image, STREAM_FORMAT, metadata)?)),
        Emit::Stdout => {
            let bytes = encode(image, STREAM_FORMAT, metadata)?;
            info!(content_type = STREAM_FORMAT.to_mime_type(), bytes = bytes.len(), "streaming overlay");
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
            Ok(RenderOutput::Streamed { bytes: bytes.len() })
        }
    }
}

/// Encodes `image`, carrying the source's color profile and, for JPEG, its EXIF.
pub fn encode(image: RgbaImage, format: ImageFormat, metadata: &SourceMetadata) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
            attach_icc_profile(&mut encoder, metadata);
            encoder.write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)?;
            if let Some(exif) = metadata.exif.as_deref() {
                bytes = insert_exif_segment(bytes, exif);
            }
        }
        ImageFormat::Png => {
            let mut encoder = PngEncoder::new(&mut bytes);
            attach_icc_profile(&mut encoder, metadata);
            encoder.write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgba8,
            )?;
        }
        _ => DynamicImage::ImageRgba8(image).write_to(&mut Cursor::new(&mut bytes), format)?,
    }
    Ok(bytes)
}

fn attach_icc_profile<E: ImageEncoder>(encoder: &mut E, metadata: &SourceMetadata) {
    if let Some(profile) = metadata.icc_profile.as_ref() {
        if let Err(err) = encoder.set_icc_profile(profile.clone()) {
            debug!(%err, "color profile dropped");
        }
    }
}

/// Splices an APP1 `Exif` segment in after SOI and the JFIF header.
fn insert_exif_segment(jpeg: Vec<u8>, tiff: &[u8]) -> Vec<u8> {
    const HEADER: &[u8] = b"Exif\0\0";
    let Ok(length) = u16::try_from(HEADER.len() + tiff.len() + 2) else {
        warn!(bytes = tiff.len(), "EXIF block too large for one segment; dropped");
        return jpeg;
    };
    if jpeg.len() < 4 || jpeg[..2] != [0xFF, 0xD8] {
        return jpeg;
    }
    let mut at = 2;
    if jpeg[2..4] == [0xFF, 0xE0] && jpeg.len() >= 6 {
        let app0 = u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize;
        at = (4 + app0).min(jpeg.len());
    }
    let mut out = Vec::with_capacity(jpeg.len() + usize::from(length) + 2);
    out.extend_from_slice(&jpeg[..at]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(HEADER);
    out.extend_from_slice(tiff);
    out.extend_from_slice(&jpeg[at..]);
    out
}

/// Decodes `path` and keeps the metadata the output should carry.
pub fn load_source(path: &Path) -> Result<SourceImage> {
    let bytes = std::fs::read(path).map_err(ImageError::IoError)?;
    let mut decoder = ImageReader::new(Cursor::new(bytes.as_slice()))
        .with_guessed_format()
        .map_err(ImageError::IoError)?
        .into_decoder()?;
    let icc_profile = decoder.icc_profile().unwrap_or_else(|err| {
        debug!(%err, "unreadable color profile");
        None
    });
    let pixels = DynamicImage::from_decoder(decoder)?.to_rgba8();
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes.as_slice()))
        .ok()
        .map(|data| data.buf().to_vec());
    debug!(
        path = %path.display(),
        icc = icc_profile.is_some(),
        exif = exif.is_some(),
        "source decoded"
    );
    Ok(SourceImage {
        pixels,
        metadata: SourceMetadata { icc_profile, exif },
    })
}

fn load_watermark(spec: &WatermarkSpec) -> Result<Pixmap> {
    if spec.size == 0 {
        return Err(OverlayError::InvalidOptions {
            field: "watermark.size",
            message: "must be greater than 0".to_string(),
        });
    }
    let image = image::open(&spec.path)?;
    let resized = image.resize_exact(spec.size, spec.size, FilterType::Lanczos3);
    let mut pixmap = pixmap_from_rgba(&resized.to_rgba8())?;
    if spec.opacity_impl > 1.0 {
        divide_alpha(&mut pixmap, spec.opacity_impl);
    }
    Ok(pixmap)
}

/// Only the measured faces go in, so the drawn glyphs are the ones the layout was sized for.
fn build_fontdb(fonts: &FontBook) -> Arc<fontdb::Database> {
    let mut db = fontdb::Database::new();
    for font in fonts.fonts() {
        db.load_font_data(font.data().to_vec());
    }
    if fonts.needs_system_fonts() {
        db.load_system_fonts();
    }
    Arc::new(db)
}

fn blank_pixmap((width, height): (u32, u32)) -> Result<Pixmap> {
    Pixmap::new(width, height)
        .ok_or_else(|| OverlayError::Render(format!("cannot allocate {}x{} canvas", width, height)))
}

fn render_svg_onto(pixmap: &mut Pixmap, svg: &str, fontdb: &Arc<fontdb::Database>) -> Result<()> {
    let options = Options {
        fontdb: Arc::clone(fontdb),
        ..Options::default()
    };
    let tree = Tree::from_str(svg, &options)
        .map_err(|err| OverlayError::Render(format!("failed to parse SVG: {}", err)))?;
    let mut pixmap_mut = pixmap.as_mut();
    render(&tree, Transform::identity(), &mut pixmap_mut);
    Ok(())
}

fn svg_open((width, height): (u32, u32)) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    )
}

fn background_svg(size: (u32, u32), color: &str) -> String {
    let mut svg = svg_open(size);
    svg.push_str(&format!(
        r#"<rect x="0" y="0" width="{w}" height="{h}" fill="{fill}"/>"#,
        w = size.0,
        h = size.1,
        fill = escape_xml(color.trim())
    ));
    svg.push_str("</svg>");
    svg
}

fn text_svg(size: (u32, u32), commands: &[DrawCommand], fonts: &FontBook) -> String {
    let mut svg = svg_open(size);
    for command in commands {
        let family = fonts.family_for(&command.font);
        let face = match fonts.metrics_for(&command.font) {
            Some(metrics) => format!(
                r#" font-weight="{}" font-style="{}" font-stretch="{}""#,
                metrics.css_weight(),
                metrics.css_style(),
                metrics.css_stretch()
            ),
            None => String::new(),
        };
        svg.push_str(&format!(
            r#"<text x="{x}" y="{y}" font-size="{size}" fill="{color}" font-family="{family}"{face} xml:space="preserve">{text}</text>"#,
            x = command.x,
            y = command.y,
            size = command.font.size,
            color = escape_xml(&command.font.color),
            family = escape_xml(&css_family(family)),
            face = face,
            text = escape_xml(&command.text)
        ));
    }
    svg.push_str("</svg>");
    svg
}

fn css_family(family: &str) -> String {
    if family.eq_ignore_ascii_case("sans-serif") {
        family.to_string()
    } else {
        format!("'{}'", family.replace('\'', ""))
    }
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Keeps the `width x height` region at the origin; `None` when it has no area.
fn crop_top_left(pixmap: &Pixmap, (width, height): (u32, u32)) -> Option<Pixmap> {
    let rect = IntRect::from_xywh(0, 0, width, height)?;
    pixmap.clone_rect(rect)
}

fn draw_at(canvas: &mut Pixmap, layer: &Pixmap, (x, y): (i64, i64)) {
    let clamp = |value: i64| value.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    canvas.draw_pixmap(
        clamp(x),
        clamp(y),
        layer.as_ref(),
        &PixmapPaint::default(),
        Transform::identity(),
        None,
    );
}

/// Divides every pixel's alpha by `divisor`.
pub fn divide_alpha(pixmap: &mut Pixmap, divisor: f32) {
    for pixel in pixmap.pixels_mut() {
        let color = pixel.demultiply();
        let alpha = (color.alpha() as f32 / divisor).round().clamp(0.0, 255.0) as u8;
        *pixel = ColorU8::from_rgba(color.red(), color.green(), color.blue(), alpha).premultiply();
    }
}

fn pixmap_from_rgba(image: &RgbaImage) -> Result<Pixmap> {
    let mut pixmap = blank_pixmap(image.dimensions())?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(image.pixels()) {
        let [r, g, b, a] = src.0;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Ok(pixmap)
}

fn rgba_from_pixmap(pixmap: &Pixmap) -> RgbaImage {
    let mut image = RgbaImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in image.pixels_mut().zip(pixmap.pixels()) {
        let color = src.demultiply();
        *dst = Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
    }
    image
}
