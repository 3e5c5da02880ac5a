//! Burns image telemetry (altitude, timestamp, camera settings) into the image itself.
//!
//! A [`TelemetryOverlay`] is configured, prepared against the image's metadata,
//! filled with the values to show and rendered once:
//!
//! ```no_run
//! use telemetry_overlay::{Anchor, Emit, ExifTool, FontRole, FontSpec, LayoutOptions, TelemetryOverlay};
//!
//! # fn main() -> telemetry_overlay::Result<()> {
//! let mut job = TelemetryOverlay::new("DJI_0001.JPG")
//!     .font(FontRole::Big, FontSpec::new("fonts/Bold.ttf", 96.0, "#ffffff"))
//!     .font(FontRole::Small, FontSpec::new("fonts/Regular.ttf", 32.0, "#ffffff"));
//! if job.prepare(&ExifTool::default()) {
//!     job.add_value("RelativeAltitude", Some("ALTITUDE, M"))?
//!         .add_value("Model", Some("exif:Make"))?;
//! }
//! job.render(Anchor::TopRight, &LayoutOptions::default(), None)?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub mod anchor;
pub mod error;
pub mod font;
pub mod layout;
pub mod logging;
pub mod metadata;
pub mod paths;
pub mod render;
pub mod selector;
pub mod settings;

pub use anchor::Anchor;
pub use error::{OverlayError, Result};
pub use font::{FontBook, FontRegistry, FontRole, FontSpec, TextMetricsProvider};
pub use layout::{LayoutOptions, OverlayGeometry, OverlayLayout};
pub use metadata::{EmbeddedExif, ExifTool, MetaValue, MetadataExtractor, MetadataMap, MetadataStore};
pub use render::{Emit, RenderOutput, SourceMetadata, WatermarkSpec};
pub use selector::{ValueEntry, ValueSelector};

/// One overlay render for one image.
///
/// Configuration calls consume and return the job; `prepare` must run before
/// values are added, and `render` consumes the job.
#[derive(Debug, Clone)]
pub struct TelemetryOverlay {
    input: PathBuf,
    output: Option<PathBuf>,
    fonts: FontRegistry,
    watermark: Option<WatermarkSpec>,
    metadata: Option<MetadataStore>,
    values: ValueSelector,
}

impl TelemetryOverlay {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            fonts: FontRegistry::default(),
            watermark: None,
            metadata: None,
            values: ValueSelector::new(),
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Writes the result over the input file.
    pub fn overwrite(mut self) -> Self {
        self.output = Some(self.input.clone());
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Output next to the input, named `<stem><suffix>.<ext>`.
    pub fn output_suffix(mut self, suffix: &str) -> Self {
        self.output = Some(paths::derive_output_path(&self.input, suffix));
        self
    }

    pub fn font(mut self, role: FontRole, spec: FontSpec) -> Self {
        self.fonts.set(role, spec);
        self
    }

    pub fn watermark(mut self, spec: WatermarkSpec) -> Self {
        self.watermark = Some(spec);
        self
    }

    /// Reads and normalizes the input's metadata. `false` means nothing was found.
    pub fn prepare<E>(&mut self, extractor: &E) -> bool
    where
        E: MetadataExtractor + ?Sized,
    {
        let store = MetadataStore::prepare(extractor, &self.input);
        let found = !store.is_empty();
        if !found {
            info!(path = %self.input.display(), "no metadata found");
        }
        self.metadata = Some(store);
        found
    }

    pub fn metadata(&self) -> Option<&MetadataStore> {
        self.metadata.as_ref()
    }

    /// Queues `key` for display. Missing or non-scalar keys are skipped silently.
    pub fn add_value(&mut self, key: &str, label: Option<&str>) -> Result<&mut Self> {
        let store = self
            .metadata
            .as_ref()
            .ok_or(OverlayError::NotPrepared {
                operation: "add_value",
            })?;
        if !self.values.add_value(store, key, label) {
            debug!(key, "value skipped: missing or not a scalar");
        }
        Ok(self)
    }

    pub fn entries(&self) -> &[ValueEntry] {
        self.values.entries()
    }

    /// Resolved output path for a render anchored at `anchor`.
    pub fn output_path(&self, anchor: Anchor) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            paths::derive_output_path(&self.input, &paths::overlay_suffix(anchor.as_str()))
        })
    }

    /// Lays out, composites and emits the overlay.
    ///
    /// With `emit` unset the image is written to [`TelemetryOverlay::output_path`].
    pub fn render(
        self,
        anchor: Anchor,
        options: &LayoutOptions,
        emit: Option<Emit>,
    ) -> Result<RenderOutput> {
        if self.metadata.is_none() {
            return Err(OverlayError::NotPrepared {
                operation: "render",
            });
        }
        options.validate()?;
        let target = emit.unwrap_or_else(|| Emit::File(self.output_path(anchor)));

        let fonts = FontBook::load(&self.fonts)?;
        let layout =
            layout::layout_entries(self.values.entries(), &self.fonts, options, &fonts)?;
        debug!(
            entries = self.values.len(),
            width = layout.geometry.width,
            height = layout.geometry.height,
            "overlay laid out"
        );

        let source = render::load_source(&self.input)?;
        let composed = render::compose(
            &source.pixels,
            &layout,
            anchor,
            options,
            self.watermark.as_ref(),
            &fonts,
        )?;
        let metadata = source.metadata;
        drop(source.pixels);
        render::emit(composed, &metadata, &target)
    }
}
