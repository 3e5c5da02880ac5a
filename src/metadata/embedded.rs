use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::{MetaValue, MetadataExtractor, MetadataMap};

/// Reads EXIF directly from the container, no external tool needed.
///
/// Keys are the EXIF tag names of the primary image (`Model`, `DateTimeOriginal`, ...).
/// Vendor XMP fields such as `RelativeAltitude` are only available via [`super::ExifTool`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedExif;

impl MetadataExtractor for EmbeddedExif {
    fn extract(&self, path: &Path) -> Result<MetadataMap> {
        let file = File::open(path)
            .with_context(|| format!("failed to open image: {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let data = exif::Reader::new()
            .read_from_container(&mut reader)
            .with_context(|| format!("failed to read EXIF: {}", path.display()))?;

        let mut map = MetadataMap::new();
        for field in data.fields() {
            if field.ifd_num != exif::In::PRIMARY {
                continue;
            }
            let value = match &field.value {
                exif::Value::Ascii(parts) => MetaValue::Text(ascii_text(parts)),
                _ => MetaValue::Text(field.display_value().with_unit(&data).to_string()),
            };
            map.insert(field.tag.to_string(), value);
        }
        Ok(map)
    }
}

/// Raw ASCII keeps `DateTimeOriginal` in its `YYYY:MM:DD` form.
fn ascii_text(parts: &[Vec<u8>]) -> String {
    parts
        .iter()
        .map(|part| String::from_utf8_lossy(part).trim_end_matches('\0').trim().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_ascii_parts() {
        let parts = vec![b"2021:05:04 10:20:30\0".to_vec()];
        assert_eq!(ascii_text(&parts), "2021:05:04 10:20:30");
        let parts = vec![b"Alice".to_vec(), b"Bob".to_vec()];
        assert_eq!(ascii_text(&parts), "Alice, Bob");
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(EmbeddedExif.extract(Path::new("does/not/exist.jpg")).is_err());
    }
}
