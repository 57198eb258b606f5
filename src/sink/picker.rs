//! Destination selection
//!
//! The picker is the boundary where the user chooses where a recording goes.
//! It is given a suggested name and an accepted type filter and hands back a
//! handle that can be opened for writing, or nothing if the user declined.

use super::file::FileSink;
use super::{SinkError, SinkResult, StreamingSink};
use crate::config::SinkConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Directories a picker may open in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WellKnownDirectory {
    Desktop,
    Documents,
    Downloads,
    Music,
    Pictures,
    Videos,
}

impl WellKnownDirectory {
    /// Best-effort location under the user's home directory
    pub fn path(self) -> Option<PathBuf> {
        let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"))?;
        let name = match self {
            WellKnownDirectory::Desktop => "Desktop",
            WellKnownDirectory::Documents => "Documents",
            WellKnownDirectory::Downloads => "Downloads",
            WellKnownDirectory::Music => "Music",
            WellKnownDirectory::Pictures => "Pictures",
            WellKnownDirectory::Videos => "Videos",
        };
        Some(PathBuf::from(home).join(name))
    }
}

/// One entry of the picker's type filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePickerAcceptType {
    pub description: String,
    /// MIME type to accepted extensions
    pub accept: HashMap<String, Vec<String>>,
}

impl FilePickerAcceptType {
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.accept.values().flatten().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePickerOptions {
    pub id: Option<String>,
    pub suggested_name: String,
    pub types: Vec<FilePickerAcceptType>,
    pub exclude_accept_all_option: bool,
    pub start_in: Option<WellKnownDirectory>,
}

impl SavePickerOptions {
    pub fn from_config(config: &SinkConfig) -> Self {
        let mut accept = HashMap::new();
        accept.insert(config.type_mime.clone(), vec![config.type_extension.clone()]);
        Self {
            id: None,
            suggested_name: config.suggested_name.clone(),
            types: vec![FilePickerAcceptType {
                description: config.type_description.clone(),
                accept,
            }],
            exclude_accept_all_option: false,
            start_in: None,
        }
    }

    /// First accepted extension, with its leading dot
    pub fn default_extension(&self) -> Option<&str> {
        self.types.iter().flat_map(|t| t.extensions()).next()
    }

    /// Whether `path` carries one of the accepted extensions
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.types
            .iter()
            .flat_map(|t| t.extensions())
            .any(|accepted| accepted.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

impl Default for SavePickerOptions {
    fn default() -> Self {
        Self::from_config(&SinkConfig::default())
    }
}

/// A chosen destination that can be opened for writing
#[async_trait]
pub trait DestinationHandle: Send + Sync {
    fn name(&self) -> String;

    /// Open an ordered writer. Without `keep_existing_data` the destination
    /// starts empty.
    async fn create_writable(&self, keep_existing_data: bool) -> SinkResult<Box<dyn StreamingSink>>;
}

/// Asks the user (or a policy) where to save
#[async_trait]
pub trait DestinationPicker: Send + Sync {
    /// `Ok(None)` means the user declined
    async fn pick(&self, options: &SavePickerOptions) -> SinkResult<Option<Box<dyn DestinationHandle>>>;
}

/// Metadata of the file behind a handle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Handle to a file on disk
#[derive(Debug, Clone, PartialEq)]
pub struct FileHandle {
    path: PathBuf,
    name: String,
}

impl FileHandle {
    pub fn new(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current metadata of the underlying file
    pub async fn get_file(&self) -> SinkResult<FileInfo> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        Ok(FileInfo {
            name: self.name.clone(),
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}

#[async_trait]
impl DestinationHandle for FileHandle {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn create_writable(&self, keep_existing_data: bool) -> SinkResult<Box<dyn StreamingSink>> {
        let sink = FileSink::create(&self.path, keep_existing_data).await?;
        Ok(Box::new(sink))
    }
}

/// Non-interactive picker
#[derive(Debug, Clone, PartialEq)]
pub enum PathPicker {
    /// Always this file; the accepted extension is appended if missing
    File(PathBuf),
    /// The suggested name inside this directory, never overwriting. An empty
    /// path falls back to the request's start-in directory.
    Directory(PathBuf),
    /// Decline every request
    Cancel,
}

impl PathPicker {
    /// Directory from config, else the working directory
    pub fn from_config(config: &SinkConfig) -> Self {
        PathPicker::Directory(config.directory.clone().unwrap_or_else(|| PathBuf::from(".")))
    }

    fn with_extension(path: &Path, options: &SavePickerOptions) -> PathBuf {
        if options.accepts(path) {
            return path.to_path_buf();
        }
        match options.default_extension() {
            Some(ext) => {
                let mut name = path.as_os_str().to_os_string();
                if !ext.starts_with('.') {
                    name.push(".");
                }
                name.push(ext);
                PathBuf::from(name)
            }
            None => path.to_path_buf(),
        }
    }

    /// `dir/name`, or `dir/stem (n).ext` for the first free `n`
    fn unique_in(dir: &Path, name: &str) -> PathBuf {
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        let path = Path::new(name);
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
        let mut n = 1;
        loop {
            let candidate = dir.join(format!("{} ({}){}", stem, n, ext));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }
}

#[async_trait]
impl DestinationPicker for PathPicker {
    async fn pick(&self, options: &SavePickerOptions) -> SinkResult<Option<Box<dyn DestinationHandle>>> {
        let path = match self {
            PathPicker::Cancel => {
                tracing::info!("Destination picker declined");
                return Ok(None);
            }
            PathPicker::File(path) => Self::with_extension(path, options),
            PathPicker::Directory(dir) => {
                let dir = if dir.as_os_str().is_empty() {
                    options.start_in.and_then(WellKnownDirectory::path).unwrap_or_else(|| PathBuf::from("."))
                } else {
                    dir.clone()
                };
                if !dir.is_dir() {
                    return Err(SinkError::InvalidDestination(format!("{:?} is not a directory", dir)));
                }
                let name = Self::with_extension(Path::new(&options.suggested_name), options);
                Self::unique_in(&dir, &name.to_string_lossy())
            }
        };
        tracing::info!("Destination chosen: {:?}", path);
        Ok(Some(Box::new(FileHandle::new(path))))
    }
}
