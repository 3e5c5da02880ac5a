use anyhow::Result;

use crate::error::OverlayError;
use crate::font::{FontRegistry, FontRole, FontSpec, TextMetricsProvider};
use crate::selector::ValueEntry;

pub const TRANSPARENT_BG: &str = "none";

/// Spacing and background of the text block.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutOptions {
    /// Inner margin around the text block.
    pub text_padding: f32,
    /// Distance between the block and the image edge.
    pub padding: u32,
    /// Gap between consecutive entries.
    pub spacer: f32,
    /// Extra advance after each label.
    pub extra_height: f32,
    /// Background color, or `none` for transparent.
    pub bg: String,
    /// Background alpha divisor; values up to 1 leave it untouched.
    pub opacity_impl: f32,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            text_padding: 0.0,
            padding: 0,
            spacer: 100.0,
            extra_height: 0.0,
            bg: TRANSPARENT_BG.to_string(),
            opacity_impl: 0.0,
        }
    }
}

impl LayoutOptions {
    pub fn validate(&self) -> Result<(), OverlayError> {
        non_negative("text_padding", self.text_padding)?;
        non_negative("spacer", self.spacer)?;
        non_negative("extra_height", self.extra_height)?;
        non_negative("opacity_impl", self.opacity_impl)?;
        if self.bg.trim().is_empty() {
            return Err(OverlayError::InvalidOptions {
                field: "bg",
                message: format!("use '{}' for a transparent background", TRANSPARENT_BG),
            });
        }
        Ok(())
    }

    pub fn is_transparent(&self) -> bool {
        self.bg.trim().eq_ignore_ascii_case(TRANSPARENT_BG)
    }
}

fn non_negative(field: &'static str, value: f32) -> Result<(), OverlayError> {
    if value.is_finite() && value >= 0.0 {
        return Ok(());
    }
    Err(OverlayError::InvalidOptions {
        field,
        message: format!("expected a finite value >= 0, got {}", value),
    })
}

/// One text run at an absolute position; `y` is the baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCommand {
    pub role: FontRole,
    pub font: FontSpec,
    pub text: String,
    pub x: f32,
    pub y: f32,
}

/// Size of the cropped text block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OverlayGeometry {
    pub width: f32,
    pub height: f32,
}

impl OverlayGeometry {
    /// Whole-pixel crop size, rounded up and clamped to `bounds`.
    pub fn crop_size(&self, bounds: (u32, u32)) -> (u32, u32) {
        let clamp = |value: f32, max: u32| value.max(0.0).ceil().min(max as f32) as u32;
        (clamp(self.width, bounds.0), clamp(self.height, bounds.1))
    }
}

#[derive(Debug, Clone, Default)]
pub struct OverlayLayout {
    pub commands: Vec<DrawCommand>,
    pub geometry: OverlayGeometry,
}

/// Stacks every entry as a value line over a label line, left aligned.
pub fn layout_entries<M>(
    entries: &[ValueEntry],
    fonts: &FontRegistry,
    options: &LayoutOptions,
    metrics: &M,
) -> Result<OverlayLayout>
where
    M: TextMetricsProvider + ?Sized,
{
    let text_padding = options.text_padding;
    let mut cursor = text_padding;
    let mut widths = Vec::with_capacity(entries.len() * 2);
    let mut commands = Vec::with_capacity(entries.len() * 2);
    // A role without a registered font keeps drawing with the previous one.
    let mut active = FontSpec::default();

    for (index, entry) in entries.iter().enumerate() {
        if let Some(spec) = fonts.get(FontRole::Big) {
            active = spec.clone();
        }
        let value = metrics.measure(&entry.value, &active)?.layout();
        cursor += value.height;
        if index == 0 {
            cursor = value.baseline + text_padding;
        }
        widths.push(value.width);
        commands.push(DrawCommand {
            role: FontRole::Big,
            font: active.clone(),
            text: entry.value.clone(),
            x: text_padding,
            y: cursor,
        });

        if let Some(spec) = fonts.get(FontRole::Small) {
            active = spec.clone();
        }
        let label = metrics.measure(&entry.label, &active)?.layout();
        cursor += label.height;
        cursor += options.extra_height;
        widths.push(label.width);
        commands.push(DrawCommand {
            role: FontRole::Small,
            font: active.clone(),
            text: entry.label.clone(),
            x: text_padding,
            y: cursor,
        });

        if index + 1 == entries.len() {
            cursor += text_padding;
        } else {
            cursor += options.spacer;
        }
    }

    let width = widths
        .iter()
        .copied()
        .reduce(f32::max)
        .map_or(0.0, |widest| widest + 2.0 * text_padding);

    Ok(OverlayLayout {
        commands,
        geometry: OverlayGeometry {
            width,
            height: cursor,
        },
    })
}
