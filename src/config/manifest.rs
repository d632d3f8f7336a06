//! Resource manifest loading.
//!
//! A manifest is a list of [`ResourceSpec`]s in one of three encodings,
//! chosen by file extension:
//!
//! - TOML: `[[resource]]` tables
//! - JSON: a bare array, or `{"resource": [...]}`
//! - YAML: a bare sequence, or a `resource:` key
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::ResourceSpec;
use crate::error::ConfigError;

/// Manifest encodings understood by [`load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    /// `.toml`
    Toml,
    /// `.json`
    Json,
    /// `.yaml` / `.yml`
    Yaml,
}

impl ManifestFormat {
    /// Format implied by the extension of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedFormat`] for any other extension.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Toml => "toml",
            Self::Json => "json",
            Self::Yaml => "yaml",
        })
    }
}

/// Table form shared by all encodings.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestTable {
    #[serde(default)]
    resource: Vec<ResourceSpec>,
}

/// JSON and YAML accept either a bare list or the table form.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListOrTable {
    List(Vec<ResourceSpec>),
    Table(ManifestTable),
}

impl From<ListOrTable> for Vec<ResourceSpec> {
    fn from(value: ListOrTable) -> Self {
        match value {
            ListOrTable::List(list) => list,
            ListOrTable::Table(table) => table.resource,
        }
    }
}

/// Parse manifest text; `file` names the origin in error messages.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidManifest`] if the text does not decode.
pub fn parse(content: &str, format: ManifestFormat, file: &str) -> Result<Vec<ResourceSpec>, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidManifest {
        file: file.to_string(),
        message,
    };
    match format {
        ManifestFormat::Toml => toml::from_str::<ManifestTable>(content)
            .map(|t| t.resource)
            .map_err(|e| invalid(e.message().to_string())),
        ManifestFormat::Json => serde_json::from_str::<ListOrTable>(content)
            .map(Into::into)
            .map_err(|e| invalid(e.to_string())),
        ManifestFormat::Yaml => serde_yaml::from_str::<ListOrTable>(content)
            .map(Into::into)
            .map_err(|e| invalid(e.to_string())),
    }
}

/// Load the manifest at `path`.
///
/// # Errors
///
/// Returns an error if the extension is unsupported, the file cannot be
/// read, or its content does not decode.
pub fn load(path: &Path) -> Result<Vec<ResourceSpec>, ConfigError> {
    let format = ManifestFormat::from_path(path)?;
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&content, format, &path.display().to_string())
}

/// Render `specs` as a TOML manifest that [`parse`] reads back.
///
/// # Errors
///
/// Returns an error if a value cannot be represented in TOML.
pub fn to_toml(specs: &[ResourceSpec]) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&ManifestTable {
        resource: specs.to_vec(),
    })
}
