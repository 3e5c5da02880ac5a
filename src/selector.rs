use serde::Serialize;

use crate::metadata::MetadataStore;

/// Marker that turns a label into a secondary metadata lookup.
pub const LABEL_LOOKUP_MARKER: &str = "exif:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueEntry {
    pub value: String,
    pub label: String,
}

/// Ordered list of the values to draw. Insertion order is display order.
#[derive(Debug, Clone, Default)]
pub struct ValueSelector {
    entries: Vec<ValueEntry>,
}

impl ValueSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `key` from `store` when it holds a scalar; otherwise does nothing.
    ///
    /// Returns whether an entry was added.
    pub fn add_value(&mut self, store: &MetadataStore, key: &str, label: Option<&str>) -> bool {
        let Some(value) = store.scalar(key) else {
            return false;
        };
        let label = resolve_label(store, key, label);
        self.entries.push(ValueEntry { value, label });
        true
    }

    pub fn entries(&self) -> &[ValueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn resolve_label(store: &MetadataStore, key: &str, label: Option<&str>) -> String {
    let label = label.filter(|label| !label.is_empty()).unwrap_or(key);
    if !label.contains(LABEL_LOOKUP_MARKER) {
        return label.to_string();
    }
    let lookup = label.replace(LABEL_LOOKUP_MARKER, "");
    store.scalar(&lookup).unwrap_or(lookup)
}
