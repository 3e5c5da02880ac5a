mod embedded;
mod exiftool;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use time::Date;
use time::macros::format_description;
use tracing::{debug, warn};

pub use embedded::EmbeddedExif;
pub use exiftool::ExifTool;

pub const RELATIVE_ALTITUDE: &str = "RelativeAltitude";
pub const DATE_TIME_ORIGINAL: &str = "DateTimeOriginal";
pub const DERIVED_DATE: &str = "date";
pub const DERIVED_TIME: &str = "time";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetaValue {
    Text(String),
    Number(f64),
    Bool(bool),
    /// Lists and structures. Kept so lookups can tell "present" from "absent".
    NonScalar,
}

impl MetaValue {
    /// Printable form of a scalar, `None` for empty strings and non-scalars.
    ///
    /// Zero and `false` are real readings (altitude at takeoff, flash off) and are kept.
    pub fn as_scalar(&self) -> Option<String> {
        match self {
            MetaValue::Text(text) if text.is_empty() => None,
            MetaValue::Text(text) => Some(text.clone()),
            MetaValue::Number(value) => Some(value.to_string()),
            MetaValue::Bool(value) => Some(value.to_string()),
            MetaValue::NonScalar => None,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Text(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Number(value)
    }
}

pub type MetadataMap = BTreeMap<String, MetaValue>;

/// Reads a flat key/value map out of an image file.
pub trait MetadataExtractor {
    fn extract(&self, path: &Path) -> Result<MetadataMap>;
}

impl<F> MetadataExtractor for F
where
    F: Fn(&Path) -> Result<MetadataMap>,
{
    fn extract(&self, path: &Path) -> Result<MetadataMap> {
        self(path)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    #[default]
    ExifTool,
    Exif,
}

impl ExtractorKind {
    pub fn build(self) -> Box<dyn MetadataExtractor> {
        match self {
            ExtractorKind::ExifTool => Box::new(ExifTool::default()),
            ExtractorKind::Exif => Box::new(EmbeddedExif),
        }
    }
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractorKind::ExifTool => f.write_str("exiftool"),
            ExtractorKind::Exif => f.write_str("exif"),
        }
    }
}

/// Normalized metadata for a single image.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    values: MetadataMap,
}

impl MetadataStore {
    pub fn new(values: MetadataMap) -> Self {
        let mut store = Self { values };
        store.normalize();
        store
    }

    /// Runs the extractor and normalizes its output.
    ///
    /// Extraction failures yield an empty store; callers check `is_empty`.
    pub fn prepare<E>(extractor: &E, path: &Path) -> Self
    where
        E: MetadataExtractor + ?Sized,
    {
        match extractor.extract(path) {
            Ok(values) => {
                debug!(entries = values.len(), path = %path.display(), "metadata extracted");
                Self::new(values)
            }
            Err(err) => {
                warn!(path = %path.display(), "metadata extraction failed: {:#}", err);
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.values.get(key)
    }

    pub fn scalar(&self, key: &str) -> Option<String> {
        self.values.get(key).and_then(MetaValue::as_scalar)
    }

    pub fn values(&self) -> &MetadataMap {
        &self.values
    }

    fn normalize(&mut self) {
        if let Some(MetaValue::Text(altitude)) = self.values.get_mut(RELATIVE_ALTITUDE) {
            *altitude = altitude.replace('+', "");
        }

        let Some(original) = self.scalar(DATE_TIME_ORIGINAL) else {
            return;
        };
        match split_date_time(&original) {
            Some((date, time)) => {
                self.values.insert(DERIVED_DATE.to_string(), date.into());
                self.values.insert(DERIVED_TIME.to_string(), time.into());
            }
            None => {
                warn!(value = %original, "unrecognized DateTimeOriginal; date/time not derived");
            }
        }
    }
}

/// `2021:05:04 10:20:30` becomes (`04/05/2021`, `10:20:30`).
fn split_date_time(value: &str) -> Option<(String, String)> {
    let (date, time) = value.trim().split_once(' ')?;
    let time = time.split_whitespace().next()?;
    let parsed = Date::parse(date, format_description!("[year]:[month]:[day]")).ok()?;
    let formatted = parsed
        .format(format_description!("[day]/[month]/[year]"))
        .ok()?;
    Some((formatted, time.to_string()))
}
