//! Seed notaries for the network parameters
//!
//! Notaries are not registered through the API: the operator supplies their
//! signed node-info files, and the loader turns them into the notary list
//! recorded in the network parameters.

use netmap_core::{NetmapError, NotaryInfo, SignedParticipant, TrustRoot};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Prefix of node-info files in a notary directory
pub const NODE_INFO_PREFIX: &str = "nodeInfo-";

/// Marker file flagging the notary in the same directory as validating
pub const VALIDATING_MARKER: &str = "notary.validating";

/// Errors loading the notary list
#[derive(Error, Debug)]
pub enum NotaryLoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid node info {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: NetmapError,
    },
}

/// Source of the notaries recorded in the network parameters
pub trait NotaryLoader: Send + Sync + Debug {
    fn load(&self) -> Result<Vec<NotaryInfo>, NotaryLoadError>;
}

/// A fixed notary list
#[derive(Debug, Clone, Default)]
pub struct StaticNotaryLoader {
    notaries: Vec<NotaryInfo>,
}

impl StaticNotaryLoader {
    pub fn new(notaries: Vec<NotaryInfo>) -> Self {
        Self { notaries }
    }
}

impl NotaryLoader for StaticNotaryLoader {
    fn load(&self) -> Result<Vec<NotaryInfo>, NotaryLoadError> {
        Ok(self.notaries.clone())
    }
}

/// Scans a directory tree for notary node-info files
///
/// The directory itself and each immediate subdirectory may hold one notary:
/// the first `nodeInfo-*` file found, validating when a `notary.validating`
/// marker sits next to it. Members of a notary cluster share the cluster
/// identity and collapse into a single entry.
#[derive(Debug, Clone)]
pub struct DirectoryNotaryLoader {
    dir: PathBuf,
    trust_root: Option<TrustRoot>,
}

impl DirectoryNotaryLoader {
    /// Loader that accepts node-info files without checking their signatures
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            trust_root: None,
        }
    }

    /// Require every node-info file to verify against `trust_root`
    pub fn with_trust_root(mut self, trust_root: TrustRoot) -> Self {
        self.trust_root = Some(trust_root);
        self
    }

    fn candidate_dirs(&self) -> Result<Vec<PathBuf>, NotaryLoadError> {
        let mut dirs = vec![self.dir.clone()];
        for entry in read_dir(&self.dir)? {
            if entry.is_dir() {
                dirs.push(entry);
            }
        }
        Ok(dirs)
    }

    fn load_notary(&self, path: &Path, validating: bool) -> Result<NotaryInfo, NotaryLoadError> {
        let invalid = |source| NotaryLoadError::Invalid {
            path: path.to_path_buf(),
            source,
        };

        let bytes = fs::read(path).map_err(|source| NotaryLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let envelope = SignedParticipant::from_bytes(&bytes).map_err(invalid)?;
        let descriptor = match &self.trust_root {
            Some(root) => envelope.verify(root),
            None => envelope.extract_unverified(),
        }
        .map_err(invalid)?;

        let identity = descriptor.notary_identity().map_err(invalid)?.clone();
        debug!(identity = %identity, validating = validating, file = %path.display(), "Found notary");
        Ok(NotaryInfo {
            identity,
            validating,
        })
    }
}

impl NotaryLoader for DirectoryNotaryLoader {
    fn load(&self) -> Result<Vec<NotaryInfo>, NotaryLoadError> {
        info!(dir = %self.dir.display(), "Scanning for notary node info files");

        let mut notaries = BTreeMap::new();
        for dir in self.candidate_dirs()? {
            let node_info = read_dir(&dir)?.into_iter().find(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with(NODE_INFO_PREFIX))
            });

            if let Some(path) = node_info {
                let validating = dir.join(VALIDATING_MARKER).exists();
                let notary = self.load_notary(&path, validating)?;
                notaries.insert(notary.identity.clone(), notary);
            }
        }

        info!(count = notaries.len(), dir = %self.dir.display(), "Loaded notaries");
        Ok(notaries.into_values().collect())
    }
}

/// Entries of `dir`, sorted by path
fn read_dir(dir: &Path) -> Result<Vec<PathBuf>, NotaryLoadError> {
    let io_error = |source| NotaryLoadError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        entries.push(entry.map_err(io_error)?.path());
    }
    entries.sort();
    Ok(entries)
}
