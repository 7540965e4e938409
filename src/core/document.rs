//! Document IO.
//!
//! Credential, entity and settings files are YAML; shared credential files
//! may also be JSON. Both parse into [`serde_yaml::Value`].

use std::fs;
use std::io::Write;
use std::path::Path;

use serde_yaml::{Mapping, Value};
use tracing::trace;

use crate::error::Result;

/// A parsed YAML or JSON document.
pub type Document = Value;

/// On-disk format, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl Format {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }

    /// Extension including the dot, for temp files that tools inspect.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Yaml => ".yml",
            Self::Json => ".json",
        }
    }
}

/// Whether a path has a YAML extension.
pub fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml" | "yaml")
    )
}

/// Parse text in the given format. Blank input parses to an empty mapping.
pub fn parse(text: &str, format: Format) -> Result<Document> {
    if text.trim().is_empty() {
        return Ok(empty());
    }
    let doc = match format {
        Format::Yaml => serde_yaml::from_str(text)?,
        Format::Json => serde_json::from_str(text)?,
    };
    Ok(match doc {
        Value::Null => empty(),
        other => other,
    })
}

/// Read and parse a file.
pub fn read(path: &Path) -> Result<Document> {
    trace!(path = %path.display(), "reading document");
    let text = fs::read_to_string(path)?;
    parse(&text, Format::from_path(path))
}

/// Serialize a document in the given format.
pub fn render(doc: &Document, format: Format) -> Result<String> {
    Ok(match format {
        Format::Yaml => serde_yaml::to_string(doc)?,
        Format::Json => {
            let mut text = serde_json::to_string_pretty(doc)?;
            text.push('\n');
            text
        }
    })
}

/// Serialize and atomically write a document, format chosen by extension.
pub fn write(path: &Path, doc: &Document) -> Result<()> {
    let text = render(doc, Format::from_path(path))?;
    write_atomic(path, text.as_bytes())
}

/// Write bytes through a sibling temp file and rename it into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    trace!(path = %path.display(), len = bytes.len(), "writing file");
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    // keep the mode of the file being replaced
    #[cfg(unix)]
    {
        if let Ok(meta) = fs::metadata(path) {
            fs::set_permissions(tmp.path(), meta.permissions())?;
        }
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// An empty mapping document.
pub fn empty() -> Document {
    Value::Mapping(Mapping::new())
}

/// Whether a document carries no content.
pub fn is_empty(doc: &Document) -> bool {
    match doc {
        Value::Null => true,
        Value::Mapping(m) => m.is_empty(),
        _ => false,
    }
}

/// Look up a dotted attribute path (`a.b.c`) through nested mappings.
pub fn lookup<'a>(doc: &'a Document, attribute: &str) -> Option<&'a Value> {
    attribute
        .split('.')
        .try_fold(doc, |current, part| current.as_mapping()?.get(part))
}

/// Render a mapping key the way it appears in key paths.
pub fn key_text(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
