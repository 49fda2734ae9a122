use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::timing::{ChangeSchedule, NoteEvent, compile};

#[derive(Debug, Error)]
pub enum SongError {
    #[error("song {0:?} is not in the library")]
    NotFound(String),
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not decode song: {0}")]
    Decode(String),
    #[error("could not write song: {0}")]
    Encode(#[from] ron::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub name: String,
    pub notes: Vec<NoteEvent>,
}

impl Song {
    pub fn save(&self, path: &Path) -> Result<(), SongError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, text).map_err(|source| SongError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, SongError> {
        let bytes = fs::read(path).map_err(|source| SongError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        RonNoteDecoder.decode_song(&bytes)
    }

    pub fn schedule(&self) -> ChangeSchedule {
        compile(&self.notes)
    }
}

/// Turns raw song bytes into notes.
pub trait NoteDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<NoteEvent>, SongError>;
}

/// Decodes RON [`Song`] documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct RonNoteDecoder;

impl RonNoteDecoder {
    pub fn decode_song(&self, bytes: &[u8]) -> Result<Song, SongError> {
        let text = std::str::from_utf8(bytes).map_err(|e| SongError::Decode(e.to_string()))?;
        ron::from_str(text).map_err(|e| SongError::Decode(e.to_string()))
    }
}

impl NoteDecoder for RonNoteDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Vec<NoteEvent>, SongError> {
        Ok(self.decode_song(bytes)?.notes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
}

pub trait SongLibrary {
    fn catalog(&self) -> Vec<CatalogEntry>;

    fn lookup(&self, id: &str) -> Result<Vec<u8>, SongError>;
}

/// Looks `id` up and compiles it. Songs that fail to decode never reach the
/// compiler.
pub fn load_schedule(
    library: &dyn SongLibrary,
    decoder: &dyn NoteDecoder,
    id: &str,
) -> Result<ChangeSchedule, SongError> {
    let bytes = library.lookup(id)?;
    let notes = decoder.decode(&bytes)?;
    Ok(compile(&notes))
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLibrary {
    songs: BTreeMap<String, (String, Vec<u8>)>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, name: impl Into<String>, bytes: Vec<u8>) {
        self.songs.insert(id.into(), (name.into(), bytes));
    }
}

impl SongLibrary for MemoryLibrary {
    fn catalog(&self) -> Vec<CatalogEntry> {
        self.songs
            .iter()
            .map(|(id, (name, _))| CatalogEntry {
                id: id.clone(),
                name: name.clone(),
            })
            .collect()
    }

    fn lookup(&self, id: &str) -> Result<Vec<u8>, SongError> {
        self.songs
            .get(id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| SongError::NotFound(id.to_string()))
    }
}

/// Songs stored as `*.ron` files in one directory, keyed by file stem.
#[derive(Debug, Clone)]
pub struct DirectoryLibrary {
    directory: PathBuf,
}

impl DirectoryLibrary {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path_of(&self, id: &str) -> PathBuf {
        self.directory.join(format!("{id}.ron"))
    }
}

impl SongLibrary for DirectoryLibrary {
    fn catalog(&self) -> Vec<CatalogEntry> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(directory = %self.directory.display(), %err, "could not scan library");
                return Vec::new();
            }
        };

        let mut catalog: Vec<CatalogEntry> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "ron"))
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?.to_string();
                Some(CatalogEntry {
                    name: stem.clone(),
                    id: stem,
                })
            })
            .collect();
        catalog.sort_by(|a, b| a.id.cmp(&b.id));
        tracing::info!(songs = catalog.len(), directory = %self.directory.display(), "library scanned");
        catalog
    }

    fn lookup(&self, id: &str) -> Result<Vec<u8>, SongError> {
        if id.contains(['/', '\\']) {
            return Err(SongError::NotFound(id.to_string()));
        }
        let path = self.path_of(id);
        fs::read(&path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => SongError::NotFound(id.to_string()),
            _ => SongError::Io { path, source },
        })
    }
}
