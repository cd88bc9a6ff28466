//! Song files on disk
//!
//! A song named `intro` lives at `<songs_dir>/intro.json`.

use fretbot_core::{CoreError, Song};
use std::path::{Path, PathBuf};

const SONG_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct SongLibrary {
    dir: PathBuf,
}

impl SongLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of all songs, sorted
    pub fn list(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("[library] Cannot read {:?}: {}", self.dir, e);
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| path.extension().is_some_and(|ext| ext == SONG_EXTENSION))
            .filter_map(|path| path.file_stem()?.to_str().map(str::to_string))
            .collect();
        names.sort();
        names
    }

    /// File a song name maps to, if the name is acceptable and the file exists
    pub fn path_of(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return None;
        }
        let path = self.dir.join(format!("{}.{}", name, SONG_EXTENSION));
        path.is_file().then_some(path)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.path_of(name).is_some()
    }

    /// Load and validate a song
    ///
    /// `Ok(None)` when no such song exists.
    pub fn load(&self, name: &str) -> Result<Option<Song>, CoreError> {
        match self.path_of(name) {
            Some(path) => Song::load(&path).map(Some),
            None => Ok(None),
        }
    }
}
