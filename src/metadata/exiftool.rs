use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use std::path::Path;
use std::process::Command;

use super::{MetaValue, MetadataExtractor, MetadataMap};

/// Runs the `exiftool` binary and reads its JSON report.
#[derive(Debug, Clone)]
pub struct ExifTool {
    binary: String,
}

impl Default for ExifTool {
    fn default() -> Self {
        Self {
            binary: "exiftool".to_string(),
        }
    }
}

impl ExifTool {
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl MetadataExtractor for ExifTool {
    fn extract(&self, path: &Path) -> Result<MetadataMap> {
        let output = Command::new(&self.binary)
            .arg("-json")
            .arg(path)
            .output()
            .with_context(|| format!("failed to run {} (is it installed?)", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("{} failed: {}", self.binary, stderr.trim()));
        }
        parse_report(&output.stdout)
    }
}

/// exiftool emits one object per input file; only the first is used.
pub(super) fn parse_report(stdout: &[u8]) -> Result<MetadataMap> {
    let report: Value =
        serde_json::from_slice(stdout).with_context(|| "failed to parse exiftool output")?;
    let mut map = MetadataMap::new();
    let first = match report {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        Value::Array(_) => return Ok(map),
        other => other,
    };
    if let Value::Object(fields) = first {
        for (key, value) in fields {
            flatten_into(&mut map, key, value);
        }
    }
    Ok(map)
}

fn flatten_into(map: &mut MetadataMap, key: String, value: Value) {
    match value {
        Value::Null => {}
        Value::String(text) => {
            map.insert(key, MetaValue::Text(text));
        }
        Value::Bool(flag) => {
            map.insert(key, MetaValue::Bool(flag));
        }
        Value::Number(number) => {
            let value = match number.as_f64() {
                Some(value) => MetaValue::Number(value),
                None => MetaValue::Text(number.to_string()),
            };
            map.insert(key, value);
        }
        Value::Array(_) => {
            map.insert(key, MetaValue::NonScalar);
        }
        Value::Object(fields) => {
            map.insert(key.clone(), MetaValue::NonScalar);
            for (child, value) in fields {
                flatten_into(map, format!("{}.{}", key, child), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_report_object() {
        let stdout = br#"[{
            "SourceFile": "DJI_0001.JPG",
            "Model": "FC3411",
            "RelativeAltitude": "+57.30",
            "ISO": 100,
            "Keywords": ["drone", "lake"],
            "Flash": null
        }]"#;
        let map = parse_report(stdout).unwrap();
        assert_eq!(map.get("Model"), Some(&MetaValue::Text("FC3411".into())));
        assert_eq!(map.get("ISO"), Some(&MetaValue::Number(100.0)));
        assert_eq!(map.get("Keywords"), Some(&MetaValue::NonScalar));
        assert!(!map.contains_key("Flash"));
    }

    #[test]
    fn flattens_structures_with_dotted_keys() {
        let stdout = br#"[{"Region": {"Name": "lake", "Area": {"W": 0.5}}}]"#;
        let map = parse_report(stdout).unwrap();
        assert_eq!(map.get("Region"), Some(&MetaValue::NonScalar));
        assert_eq!(map.get("Region.Name"), Some(&MetaValue::Text("lake".into())));
        assert_eq!(map.get("Region.Area.W"), Some(&MetaValue::Number(0.5)));
    }

    #[test]
    fn empty_report_is_empty_map() {
        assert!(parse_report(b"[]").unwrap().is_empty());
    }

    #[test]
    fn missing_binary_is_an_error() {
        let tool = ExifTool::with_binary("exiftool-binary-that-does-not-exist");
        assert!(tool.extract(Path::new("image.jpg")).is_err());
    }
}
