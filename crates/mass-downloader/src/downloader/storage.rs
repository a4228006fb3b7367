//! Storage resolution for waveform and metadata artifacts
//!
//! A [`Storage`] maps the logical identity of an artifact ([`ArtifactKey`]) to
//! the place it is written to. A file already present at the resolved path is
//! never fetched again, which is what makes repeated runs idempotent.

use crate::downloader::core::files::ensure_dir;
use crate::downloader::core::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Logical identity of an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactKey {
    Waveform {
        network: String,
        station: String,
        location: String,
        channel: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Metadata { network: String, station: String },
}

impl ArtifactKey {
    /// File name used when storing into a plain directory
    pub fn default_filename(&self) -> String {
        match self {
            ArtifactKey::Waveform { network, station, location, channel, start, end } => format!(
                "{network}.{station}.{location}.{channel}__{}__{}.mseed",
                start.format(TIME_FORMAT),
                end.format(TIME_FORMAT)
            ),
            ArtifactKey::Metadata { network, station } => format!("{network}.{station}.xml"),
        }
    }

    fn render(&self, template: &str) -> String {
        match self {
            ArtifactKey::Waveform { network, station, location, channel, start, end } => template
                .replace("{network}", network)
                .replace("{station}", station)
                .replace("{location}", location)
                .replace("{channel}", channel)
                .replace("{starttime}", &start.format(TIME_FORMAT).to_string())
                .replace("{endtime}", &end.format(TIME_FORMAT).to_string()),
            ArtifactKey::Metadata { network, station } => {
                template.replace("{network}", network).replace("{station}", station)
            }
        }
    }
}

/// Answer of a storage callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    /// Write the artifact here (or treat it as present if the file exists)
    Path(PathBuf),
    /// The caller already has this artifact
    Exists,
    /// Do not acquire this artifact
    Ignore,
}

pub type StorageCallback = Arc<dyn Fn(&ArtifactKey) -> StorageTarget + Send + Sync>;

/// Where artifacts of one kind are stored
#[derive(Clone)]
pub enum Storage {
    /// Flat directory with default file names
    Directory(PathBuf),
    /// Path template with `{network}`, `{station}`, `{location}`, `{channel}`,
    /// `{starttime}` and `{endtime}` placeholders
    Template(String),
    Callback(StorageCallback),
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::Directory(path) => f.debug_tuple("Directory").field(path).finish(),
            Storage::Template(template) => f.debug_tuple("Template").field(template).finish(),
            Storage::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Outcome of resolving one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Download(PathBuf),
    Exists(Option<PathBuf>),
    Ignore,
}

impl Storage {
    /// A string containing `{` is a template, anything else a directory
    pub fn from_location<S: Into<String>>(location: S) -> Self {
        let location = location.into();
        if location.contains('{') {
            Storage::Template(location)
        } else {
            Storage::Directory(PathBuf::from(location))
        }
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&ArtifactKey) -> StorageTarget + Send + Sync + 'static,
    {
        Storage::Callback(Arc::new(f))
    }

    pub fn resolve(&self, key: &ArtifactKey) -> Resolution {
        let target = match self {
            Storage::Directory(dir) => StorageTarget::Path(dir.join(key.default_filename())),
            Storage::Template(template) => StorageTarget::Path(PathBuf::from(key.render(template))),
            Storage::Callback(callback) => callback(key),
        };
        match target {
            StorageTarget::Path(path) if path.exists() => Resolution::Exists(Some(path)),
            StorageTarget::Path(path) => Resolution::Download(path),
            StorageTarget::Exists => Resolution::Exists(None),
            StorageTarget::Ignore => Resolution::Ignore,
        }
    }

    /// Create the fixed part of the storage location
    ///
    /// Fails when the location cannot be created at all, which aborts the run.
    pub async fn prepare(&self) -> Result<()> {
        match self {
            Storage::Directory(dir) => ensure_dir(dir).await,
            Storage::Template(template) => match static_prefix(template) {
                Some(dir) => ensure_dir(&dir).await,
                None => Ok(()),
            },
            Storage::Callback(_) => Ok(()),
        }
    }
}

/// Directory components of a template before the first placeholder
fn static_prefix(template: &str) -> Option<PathBuf> {
    let fixed = &template[..template.find('{').unwrap_or(template.len())];
    let dir = match fixed.rfind(['/', '\\']) {
        Some(idx) => Path::new(&fixed[..idx]),
        None => return None,
    };
    (!dir.as_os_str().is_empty()).then(|| dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn waveform_key() -> ArtifactKey {
        ArtifactKey::Waveform {
            network: "IU".to_string(),
            station: "ANMO".to_string(),
            location: "00".to_string(),
            channel: "BHZ".to_string(),
            start: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2020, 1, 1, 1, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_default_names() {
        assert_eq!(
            waveform_key().default_filename(),
            "IU.ANMO.00.BHZ__20200101T000000Z__20200101T010000Z.mseed"
        );
        let meta = ArtifactKey::Metadata { network: "IU".to_string(), station: "ANMO".to_string() };
        assert_eq!(meta.default_filename(), "IU.ANMO.xml");
    }

    #[test]
    fn test_template_rendering() {
        let storage = Storage::from_location("data/{network}/{station}/{channel}.{location}.{starttime}.mseed");
        assert!(matches!(storage, Storage::Template(_)));
        assert_eq!(
            storage.resolve(&waveform_key()),
            Resolution::Download(PathBuf::from("data/IU/ANMO/BHZ.00.20200101T000000Z.mseed"))
        );
        assert_eq!(static_prefix("data/{network}/x"), Some(PathBuf::from("data")));
        assert_eq!(static_prefix("{network}.xml"), None);
    }

    #[test]
    fn test_existing_file_resolves_to_exists() {
        let dir = tempdir().unwrap();
        let storage = Storage::Directory(dir.path().to_path_buf());
        let key = ArtifactKey::Metadata { network: "IU".to_string(), station: "ANMO".to_string() };

        let Resolution::Download(path) = storage.resolve(&key) else {
            panic!("expected a download target");
        };
        std::fs::write(&path, b"<xml/>").unwrap();
        assert_eq!(storage.resolve(&key), Resolution::Exists(Some(path)));
    }

    #[test]
    fn test_callback_signals() {
        let storage = Storage::callback(|key| match key {
            ArtifactKey::Metadata { .. } => StorageTarget::Exists,
            ArtifactKey::Waveform { .. } => StorageTarget::Ignore,
        });
        assert_eq!(storage.resolve(&waveform_key()), Resolution::Ignore);
        let meta = ArtifactKey::Metadata { network: "IU".to_string(), station: "ANMO".to_string() };
        assert_eq!(storage.resolve(&meta), Resolution::Exists(None));
    }

    #[tokio::test]
    async fn test_prepare_creates_directory() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested").join("waveforms");
        Storage::Directory(target.clone()).prepare().await.unwrap();
        assert!(target.is_dir());
    }
}
