//! Format detection, file discovery, and deserialization of plant data
//! files (RON, TOML, JSON).

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use meltshop_core::config::ConfigError;

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur while loading plant data.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// The file parsed but describes an invalid plant.
    #[error("invalid configuration in {file}: {source}")]
    Invalid { file: PathBuf, source: ConfigError },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

impl Format {
    pub const EXTENSIONS: [&'static str; 3] = ["ron", "toml", "json"];
}

/// Detect the format of a file from its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Look for `{base_name}.ron`, `.toml` or `.json` in `dir`.
///
/// `Ok(None)` if there is none; `ConflictingFormats` if more than one
/// exists.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;
    for ext in Format::EXTENSIONS {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = found.take() {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }
    Ok(found)
}

/// Like [`find_data_file`], but a missing file is an error.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Deserialize `content` in the given format. `file` is only used for
/// error reporting.
pub fn deserialize_str<T: DeserializeOwned>(
    content: &str,
    format: Format,
    file: &Path,
) -> Result<T, DataLoadError> {
    let parse = |detail: String| DataLoadError::Parse {
        file: file.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse(e.to_string())),
    }
}

/// Read a file and deserialize it according to its extension.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    deserialize_str(&content, format, path)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs;

    /// Create a temporary directory with a unique name for test isolation.
    fn make_test_dir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "meltshop_data_test_{suffix}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cleanup(dir: &Path) {
        let _ = fs::remove_dir_all(dir);
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Runway {
        start_x: f64,
        y: f64,
    }

    #[test]
    fn detects_known_extensions() {
        assert_eq!(detect_format(Path::new("plant.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("plant.toml")).unwrap(), Format::Toml);
        assert_eq!(detect_format(Path::new("a/b/plant.json")).unwrap(), Format::Json);
    }

    #[test]
    fn rejects_unknown_extensions() {
        for name in ["plant.yaml", "plant", "plant.RON"] {
            assert!(matches!(
                detect_format(Path::new(name)),
                Err(DataLoadError::UnsupportedFormat { .. })
            ));
        }
    }

    #[test]
    fn same_value_in_every_format() {
        let file = Path::new("inline");
        let expected = Runway { start_x: 10.0, y: 40.0 };
        let ron: Runway = deserialize_str("(start_x: 10.0, y: 40.0)", Format::Ron, file).unwrap();
        let toml: Runway = deserialize_str("start_x = 10.0\ny = 40.0", Format::Toml, file).unwrap();
        let json: Runway =
            deserialize_str(r#"{"start_x": 10.0, "y": 40.0}"#, Format::Json, file).unwrap();
        assert_eq!(ron, expected);
        assert_eq!(toml, expected);
        assert_eq!(json, expected);
    }

    #[test]
    fn parse_errors_name_the_file() {
        let err = deserialize_str::<Runway>("{", Format::Json, Path::new("broken.json")).unwrap_err();
        match err {
            DataLoadError::Parse { file, .. } => assert_eq!(file, PathBuf::from("broken.json")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn finds_single_file() {
        let dir = make_test_dir("find_single");
        fs::write(dir.join("plant.toml"), "").unwrap();
        assert_eq!(
            find_data_file(&dir, "plant").unwrap(),
            Some(dir.join("plant.toml"))
        );
        assert_eq!(find_data_file(&dir, "fleet").unwrap(), None);
        cleanup(&dir);
    }

    #[test]
    fn conflicting_formats_are_an_error() {
        let dir = make_test_dir("conflict");
        fs::write(dir.join("plant.ron"), "").unwrap();
        fs::write(dir.join("plant.json"), "").unwrap();
        assert!(matches!(
            find_data_file(&dir, "plant"),
            Err(DataLoadError::ConflictingFormats { .. })
        ));
        cleanup(&dir);
    }

    #[test]
    fn missing_required_file() {
        let dir = make_test_dir("missing");
        let err = require_data_file(&dir, "plant").unwrap_err();
        assert!(err.to_string().contains("'plant' not found"));
        cleanup(&dir);
    }

    #[test]
    fn deserialize_file_reads_from_disk() {
        let dir = make_test_dir("from_disk");
        let path = dir.join("runway.ron");
        fs::write(&path, "(start_x: 5.0, y: 7.5)").unwrap();
        let runway: Runway = deserialize_file(&path).unwrap();
        assert_eq!(runway, Runway { start_x: 5.0, y: 7.5 });
        assert!(matches!(
            deserialize_file::<Runway>(&dir.join("absent.ron")),
            Err(DataLoadError::Io(_))
        ));
        cleanup(&dir);
    }
}
