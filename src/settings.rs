use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::anchor::Anchor;
use crate::font::{FontRole, FontSpec};
use crate::layout::LayoutOptions;
use crate::metadata::ExtractorKind;
use crate::paths;
use crate::render::WatermarkSpec;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

/// A metadata key to show, with an optional label.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ValueSelection {
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl ValueSelection {
    /// Parses `KEY` or `KEY=LABEL`.
    pub fn parse(value: &str) -> Result<Self> {
        let (key, label) = match value.split_once('=') {
            Some((key, label)) => (key.trim(), Some(label.trim().to_string())),
            None => (value.trim(), None),
        };
        if key.is_empty() {
            return Err(anyhow!("value selection '{}' has an empty key", value));
        }
        Ok(Self {
            key: key.to_string(),
            label: label.filter(|label| !label.is_empty()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub extractor: ExtractorKind,
    pub anchor: Anchor,
    pub output_suffix: Option<String>,
    pub big_font: FontSpec,
    pub small_font: FontSpec,
    pub layout: LayoutOptions,
    pub watermark: Option<WatermarkSpec>,
    pub values: Vec<ValueSelection>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            extractor: ExtractorKind::default(),
            anchor: Anchor::TopRight,
            output_suffix: None,
            big_font: FontSpec::default(),
            small_font: FontSpec::default(),
            layout: LayoutOptions::default(),
            watermark: None,
            values: Vec::new(),
        }
    }
}

impl Settings {
    pub fn font(&self, role: FontRole) -> &FontSpec {
        match role {
            FontRole::Big => &self.big_font,
            FontRole::Small => &self.small_font,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    metadata: Option<MetadataSettings>,
    output: Option<OutputSettings>,
    fonts: Option<FontsSettings>,
    layout: Option<LayoutSettings>,
    watermark: Option<WatermarkSettings>,
    values: Option<Vec<ValueSelection>>,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataSettings {
    extractor: Option<ExtractorKind>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputSettings {
    anchor: Option<String>,
    suffix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FontsSettings {
    big: Option<FontSettings>,
    small: Option<FontSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct FontSettings {
    path: Option<String>,
    size: Option<f32>,
    color: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LayoutSettings {
    text_padding: Option<f32>,
    padding: Option<u32>,
    spacer: Option<f32>,
    extra_height: Option<f32>,
    bg: Option<String>,
    opacity_impl: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct WatermarkSettings {
    path: Option<String>,
    anchor: Option<String>,
    padding: Option<u32>,
    size: Option<u32>,
    opacity_impl: Option<f32>,
}

/// Loads the layered settings, creating `~/.telemetry-overlay/settings.toml` on first use.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let home = paths::settings_dir();
    if let Some(home) = home.as_deref() {
        ensure_home_settings_file(home)?;
    }
    load_settings_from(home.as_deref(), extra_path)
}

pub fn load_settings_from(home: Option<&Path>, extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse built-in settings")?;
    settings.merge(defaults);

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            debug!(path = %path.display(), "settings merged");
            settings.merge(parsed);
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(metadata) = incoming.metadata {
            if let Some(extractor) = metadata.extractor {
                self.extractor = extractor;
            }
        }
        if let Some(output) = incoming.output {
            if let Some(anchor) = output.anchor {
                if !anchor.trim().is_empty() {
                    self.anchor = Anchor::from(anchor);
                }
            }
            if let Some(suffix) = output.suffix {
                if !suffix.trim().is_empty() {
                    self.output_suffix = Some(suffix);
                }
            }
        }
        if let Some(fonts) = incoming.fonts {
            if let Some(big) = fonts.big {
                merge_font(&mut self.big_font, big);
            }
            if let Some(small) = fonts.small {
                merge_font(&mut self.small_font, small);
            }
        }
        if let Some(layout) = incoming.layout {
            merge_layout(&mut self.layout, layout);
        }
        if let Some(watermark) = incoming.watermark {
            self.merge_watermark(watermark);
        }
        if let Some(values) = incoming.values {
            self.values = values;
        }
    }

    fn merge_watermark(&mut self, incoming: WatermarkSettings) {
        let path = incoming
            .path
            .filter(|path| !path.trim().is_empty())
            .map(|path| paths::expand_tilde(path.trim()));
        let mut spec = match (self.watermark.take(), path) {
            (Some(mut existing), Some(path)) => {
                existing.path = path;
                existing
            }
            (Some(existing), None) => existing,
            (None, Some(path)) => WatermarkSpec::new(path),
            (None, None) => return,
        };
        if let Some(anchor) = incoming.anchor {
            spec.anchor = Anchor::from(anchor);
        }
        if let Some(padding) = incoming.padding {
            spec.padding = padding;
        }
        if let Some(size) = incoming.size {
            if size > 0 {
                spec.size = size;
            }
        }
        if let Some(divisor) = incoming.opacity_impl {
            spec.opacity_impl = divisor;
        }
        self.watermark = Some(spec);
    }
}

fn merge_font(spec: &mut FontSpec, incoming: FontSettings) {
    if let Some(path) = incoming.path {
        if !path.trim().is_empty() {
            spec.path = Some(paths::expand_tilde(path.trim()));
        }
    }
    if let Some(size) = incoming.size {
        if size > 0.0 {
            spec.size = size;
        }
    }
    if let Some(color) = incoming.color {
        if !color.trim().is_empty() {
            spec.color = color;
        }
    }
}

fn merge_layout(layout: &mut LayoutOptions, incoming: LayoutSettings) {
    if let Some(value) = incoming.text_padding {
        layout.text_padding = value;
    }
    if let Some(value) = incoming.padding {
        layout.padding = value;
    }
    if let Some(value) = incoming.spacer {
        layout.spacer = value;
    }
    if let Some(value) = incoming.extra_height {
        layout.extra_height = value;
    }
    if let Some(bg) = incoming.bg {
        if !bg.trim().is_empty() {
            layout.bg = bg;
        }
    }
    if let Some(value) = incoming.opacity_impl {
        layout.opacity_impl = value;
    }
}

fn ensure_home_settings_file(home: &Path) -> Result<()> {
    fs::create_dir_all(home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}
