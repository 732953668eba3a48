//! Plan file parsing, TOML or JSON by extension.
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::ConfigError;

/// Serialization format of a plan file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// `.toml`
    Toml,
    /// `.json`
    Json,
}

impl Format {
    /// Pick the format from the file extension (case-insensitive).
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
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Deserialize `content` in the given format. `origin` names the source in
/// error messages.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if the content does not match `T`.
pub fn parse_str<T: DeserializeOwned>(
    content: &str,
    format: Format,
    origin: &str,
) -> Result<T, ConfigError> {
    let parsed = match format {
        Format::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        Format::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| ConfigError::Parse {
        path: origin.to_string(),
        message,
    })
}

/// Read and deserialize a file, choosing the parser by extension.
///
/// # Errors
///
/// Returns [`ConfigError`] if the extension is unsupported, the file cannot
/// be read, or its content does not match `T`.
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let format = Format::from_path(path)?;
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_str(&content, format, &path.display().to_string())
}
