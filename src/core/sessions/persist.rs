use std::error::Error;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::session::{ChatSession, SessionId};

#[derive(Debug)]
pub enum PersistError {
    Io { path: PathBuf, source: io::Error },
    Encode(serde_json::Error),
    Decode { path: PathBuf, source: serde_json::Error },
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Io { path, source } => {
                write!(f, "session storage I/O failed at {}: {}", path.display(), source)
            }
            PersistError::Encode(err) => write!(f, "could not encode session: {err}"),
            PersistError::Decode { path, source } => {
                write!(f, "could not decode session at {}: {}", path.display(), source)
            }
        }
    }
}

impl Error for PersistError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PersistError::Io { source, .. } => Some(source),
            PersistError::Encode(source) => Some(source),
            PersistError::Decode { source, .. } => Some(source),
        }
    }
}

/// Durable storage for chat sessions.
pub trait SessionRepository: Send + Sync {
    fn save(&self, session: &ChatSession) -> Result<(), PersistError>;
    fn delete(&self, id: &SessionId) -> Result<(), PersistError>;
    fn load_all(&self) -> Result<Vec<ChatSession>, PersistError>;
}

/// One JSON document per session in a directory.
#[derive(Debug, Clone)]
pub struct FileSessionRepository {
    dir: PathBuf,
}

impl FileSessionRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data dir>/sessions`.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("sessions"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_str()))
    }

    fn io_error(&self, path: &Path) -> impl FnOnce(io::Error) -> PersistError {
        let path = path.to_path_buf();
        move |source| PersistError::Io { path, source }
    }
}

impl SessionRepository for FileSessionRepository {
    fn save(&self, session: &ChatSession) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).map_err(self.io_error(&self.dir))?;
        let path = self.path_for(&session.id);
        let contents = serde_json::to_vec_pretty(session).map_err(PersistError::Encode)?;

        let mut temp_file = NamedTempFile::new_in(&self.dir).map_err(self.io_error(&self.dir))?;
        temp_file
            .write_all(&contents)
            .map_err(self.io_error(&path))?;
        temp_file
            .as_file_mut()
            .sync_all()
            .map_err(self.io_error(&path))?;
        temp_file
            .persist(&path)
            .map_err(|err| PersistError::Io {
                path: path.clone(),
                source: err.error,
            })?;
        debug!(session = %session.id, path = %path.display(), "session written");
        Ok(())
    }

    fn delete(&self, id: &SessionId) -> Result<(), PersistError> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistError::Io { path, source }),
        }
    }

    fn load_all(&self) -> Result<Vec<ChatSession>, PersistError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PersistError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let path = entry.map_err(self.io_error(&self.dir))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read(&path).map_err(self.io_error(&path))?;
            match serde_json::from_slice::<ChatSession>(&raw) {
                Ok(session) => sessions.push(session),
                Err(source) => {
                    let err = PersistError::Decode {
                        path: path.clone(),
                        source,
                    };
                    warn!(error = %err, "skipping unreadable session file");
                }
            }
        }
        Ok(sessions)
    }
}
