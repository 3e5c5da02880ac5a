use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use ttf_parser::name_id;
use ttf_parser::{Face, Style};
use usvg::fontdb;

use crate::error::OverlayError;

/// The two text roles of an overlay entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FontRole {
    /// The value, drawn large.
    Big,
    /// The label under it.
    Small,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec {
    /// Font file, or a family name resolved against the system fonts.
    pub path: Option<PathBuf>,
    pub size: f32,
    pub color: String,
}

impl Default for FontSpec {
    fn default() -> Self {
        Self {
            path: None,
            size: 12.0,
            color: "black".to_string(),
        }
    }
}

impl FontSpec {
    pub fn new(path: impl Into<PathBuf>, size: f32, color: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            size,
            color: color.into(),
        }
    }
}

/// One font per role; registering a role again replaces it.
#[derive(Debug, Clone, Default)]
pub struct FontRegistry {
    fonts: HashMap<FontRole, FontSpec>,
}

impl FontRegistry {
    pub fn set(&mut self, role: FontRole, spec: FontSpec) {
        self.fonts.insert(role, spec);
    }

    pub fn get(&self, role: FontRole) -> Option<&FontSpec> {
        self.fonts.get(&role)
    }

    pub fn specs(&self) -> impl Iterator<Item = &FontSpec> {
        self.fonts.values()
    }
}

/// Raw measurements of one string, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextMetrics {
    pub text_width: f32,
    /// Ascender minus descender.
    pub text_height: f32,
    /// Negative below the baseline.
    pub descender: f32,
    /// Top of the inked glyph boxes above the baseline.
    pub bbox_y2: f32,
}

/// What the layout needs from [`TextMetrics`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextLayout {
    pub baseline: f32,
    pub width: f32,
    pub height: f32,
}

impl TextMetrics {
    pub fn layout(&self) -> TextLayout {
        TextLayout {
            baseline: self.bbox_y2,
            width: self.text_width,
            height: self.text_height + self.descender,
        }
    }
}

pub trait TextMetricsProvider {
    fn measure(&self, text: &str, font: &FontSpec) -> Result<TextMetrics>;
}

#[derive(Clone)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    units_per_em: u16,
    space_advance: u16,
    ascender: i16,
    descender: i16,
    family: Option<String>,
    face_index: u32,
    weight: u16,
    style: Style,
    stretch: u16,
}

impl std::fmt::Debug for FontMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontMetrics")
            .field("family", &self.family)
            .field("weight", &self.weight)
            .field("style", &self.style)
            .field("units_per_em", &self.units_per_em)
            .field("face_index", &self.face_index)
            .finish()
    }
}

impl FontMetrics {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// `font-weight` that selects this face (100..=900).
    pub fn css_weight(&self) -> u16 {
        self.weight
    }

    pub fn css_style(&self) -> &'static str {
        match self.style {
            Style::Normal => "normal",
            Style::Italic => "italic",
            Style::Oblique => "oblique",
        }
    }

    pub fn css_stretch(&self) -> &'static str {
        stretch_keyword(self.stretch)
    }

    fn measure(&self, text: &str, font_size: f32) -> TextMetrics {
        let scale = font_size / self.units_per_em.max(1) as f32;
        let mut advance = 0u32;
        let mut y_max = None::<i16>;
        if let Ok(face) = Face::parse(&self.data, self.face_index) {
            for ch in text.chars() {
                if ch == '\n' {
                    continue;
                }
                if ch == ' ' {
                    advance = advance.saturating_add(self.space_advance as u32);
                    continue;
                }
                let Some(glyph) = face.glyph_index(ch) else {
                    advance = advance.saturating_add(self.space_advance as u32);
                    continue;
                };
                let glyph_advance = face.glyph_hor_advance(glyph).unwrap_or(self.space_advance);
                advance = advance.saturating_add(glyph_advance as u32);
                if let Some(rect) = face.glyph_bounding_box(glyph) {
                    y_max = Some(y_max.map_or(rect.y_max, |current| current.max(rect.y_max)));
                }
            }
        }
        let ascender = self.ascender as f32 * scale;
        let descender = self.descender as f32 * scale;
        TextMetrics {
            text_width: advance as f32 * scale,
            text_height: ascender - descender,
            descender,
            bbox_y2: y_max.map_or(ascender, |value| value as f32 * scale),
        }
    }
}

fn stretch_keyword(width: u16) -> &'static str {
    match width {
        0 | 1 => "ultra-condensed",
        2 => "extra-condensed",
        3 => "condensed",
        4 => "semi-condensed",
        5 => "normal",
        6 => "semi-expanded",
        7 => "expanded",
        8 => "extra-expanded",
        _ => "ultra-expanded",
    }
}

#[cfg(target_os = "macos")]
fn default_font_families() -> &'static [&'static str] {
    &["Helvetica Neue", "Helvetica", "Arial", "sans-serif"]
}

#[cfg(target_os = "windows")]
fn default_font_families() -> &'static [&'static str] {
    &["Segoe UI", "Arial", "sans-serif"]
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn default_font_families() -> &'static [&'static str] {
    &["Noto Sans", "DejaVu Sans", "Liberation Sans", "sans-serif"]
}

/// Fonts resolved for one render.
///
/// Specs with a path are keyed by that path. Specs without one share a
/// system face picked from a fallback family list.
#[derive(Debug, Default)]
pub struct FontBook {
    fonts: HashMap<PathBuf, FontMetrics>,
    default_font: Option<FontMetrics>,
    unresolved: bool,
}

impl FontBook {
    pub fn load(registry: &FontRegistry) -> Result<Self, OverlayError> {
        let mut book = Self::default();
        let mut system: Option<fontdb::Database> = None;
        for spec in registry.specs() {
            let Some(path) = spec.path.as_ref() else {
                continue;
            };
            if book.fonts.contains_key(path) {
                continue;
            }
            let metrics = resolve_font(path, &mut system).map_err(|err| OverlayError::InvalidFont {
                path: path.clone(),
                message: format!("{:#}", err),
            })?;
            debug!(path = %path.display(), family = ?metrics.family(), "font loaded");
            book.fonts.insert(path.clone(), metrics);
        }

        // Unregistered roles draw with FontSpec::default(), which has no path either.
        let needs_default = [FontRole::Big, FontRole::Small]
            .into_iter()
            .any(|role| registry.get(role).is_none_or(|spec| spec.path.is_none()));
        if needs_default {
            match resolve_default_font(system_db(&mut system)) {
                Ok(metrics) => {
                    debug!(family = ?metrics.family(), "default font resolved");
                    book.default_font = Some(metrics);
                }
                Err(err) => {
                    warn!("no usable system font, text widths are estimated: {:#}", err);
                    book.unresolved = true;
                }
            }
        }
        Ok(book)
    }

    /// Face that measures and draws `spec`.
    pub fn metrics_for(&self, spec: &FontSpec) -> Option<&FontMetrics> {
        match spec.path.as_ref() {
            Some(path) => self.fonts.get(path),
            None => self.default_font.as_ref(),
        }
    }

    /// Family name to put in the rendered text; system sans-serif when unresolved.
    pub fn family_for(&self, spec: &FontSpec) -> &str {
        self.metrics_for(spec)
            .and_then(FontMetrics::family)
            .unwrap_or("sans-serif")
    }

    /// Every resolved face, including the default one.
    pub fn fonts(&self) -> impl Iterator<Item = &FontMetrics> {
        self.fonts.values().chain(self.default_font.iter())
    }

    /// Whether some text has no resolved face and must be drawn with whatever the system offers.
    pub fn needs_system_fonts(&self) -> bool {
        self.unresolved
    }
}

impl TextMetricsProvider for FontBook {
    fn measure(&self, text: &str, font: &FontSpec) -> Result<TextMetrics> {
        match self.metrics_for(font) {
            Some(metrics) => Ok(metrics.measure(text, font.size)),
            None => Ok(estimate_metrics(text, font.size)),
        }
    }
}

fn system_db(system: &mut Option<fontdb::Database>) -> &fontdb::Database {
    system.get_or_insert_with(|| {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        db
    })
}

fn resolve_font(path: &Path, system: &mut Option<fontdb::Database>) -> Result<FontMetrics> {
    if path.is_file() {
        return load_font_metrics(path);
    }
    load_font_metrics_from_family(system_db(system), &path.to_string_lossy())
}

fn resolve_default_font(db: &fontdb::Database) -> Result<FontMetrics> {
    for candidate in default_font_families() {
        if let Ok(metrics) = load_font_metrics_from_family(db, candidate) {
            return Ok(metrics);
        }
    }
    Err(anyhow!(
        "none of the fallback fonts were found: {}",
        default_font_families().join(", ")
    ))
}

pub fn load_font_metrics(path: &Path) -> Result<FontMetrics> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read font: {}", path.display()))?;
    load_font_metrics_from_data(data)
        .map_err(|err| anyhow!("failed to parse font: {} ({})", path.display(), err))
}

/// Metrics for text that has no resolved face.
fn estimate_metrics(text: &str, font_size: f32) -> TextMetrics {
    let ascender = font_size * 0.8;
    let descender = -font_size * 0.2;
    TextMetrics {
        text_width: estimate_text_width_units(text) * font_size,
        text_height: ascender - descender,
        descender,
        bbox_y2: ascender,
    }
}

fn estimate_char_units_for_width(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else if matches!(
        ch as u32,
        0x4E00..=0x9FFF | 0x3040..=0x30FF | 0x31F0..=0x31FF
    ) {
        1.0
    } else {
        0.9
    }
}

fn estimate_text_width_units(text: &str) -> f32 {
    text.chars().map(estimate_char_units_for_width).sum()
}

/// First parsable face of a font file or collection.
fn load_font_metrics_from_data(data: Vec<u8>) -> Result<FontMetrics> {
    let data = Arc::new(data);
    let count = ttf_parser::fonts_in_collection(&data).unwrap_or(1);
    (0..count)
        .find_map(|index| metrics_from_face(&data, index))
        .ok_or_else(|| anyhow!("failed to parse font data"))
}

fn metrics_from_face(data: &Arc<Vec<u8>>, index: u32) -> Option<FontMetrics> {
    let face = Face::parse(data, index).ok()?;
    let units_per_em = face.units_per_em().max(1);
    let space_advance = face
        .glyph_index(' ')
        .and_then(|id| face.glyph_hor_advance(id))
        .unwrap_or(units_per_em / 2);
    Some(FontMetrics {
        data: Arc::clone(data),
        units_per_em,
        space_advance,
        ascender: face.ascender(),
        descender: face.descender(),
        family: extract_family_name(&face),
        face_index: index,
        weight: face.weight().to_number(),
        style: face.style(),
        stretch: face.width().to_number(),
    })
}

/// Resolves `family` against `db` and keeps the exact face the query picked.
fn load_font_metrics_from_family(db: &fontdb::Database, family: &str) -> Result<FontMetrics> {
    let families = if family.eq_ignore_ascii_case("sans-serif") {
        vec![fontdb::Family::SansSerif]
    } else {
        vec![fontdb::Family::Name(family)]
    };
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("font not found: {}", family))?;
    let (data, index) = db
        .with_face_data(id, |data, index| (data.to_vec(), index))
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    metrics_from_face(&Arc::new(data), index)
        .ok_or_else(|| anyhow!("failed to parse font: {}", family))
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}
