//! Flat key-value settings persisted as a single JSON document.
//!
//! Loaded once at startup; every `set` rewrites the whole file immediately.
//! There is no partial write or batching, and a malformed file is treated as
//! empty configuration rather than a fatal error.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug)]
pub struct Settings {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(values) => values,
                Err(e) => {
                    warn!(path = %path.display(), "settings file is malformed, starting empty: {e}");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), "couldn't read settings file, starting empty: {e}");
                BTreeMap::new()
            }
        };

        Self { path, values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Store one key and rewrite the whole document.
    pub fn set(&mut self, key: &str, value: &str) -> io::Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.save()
    }

    /// Drop one key; rewrites only when the key existed.
    pub fn unset(&mut self, key: &str) -> io::Result<()> {
        if self.values.remove(key).is_some() {
            self.save()?;
        }
        Ok(())
    }

    fn save(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let doc = serde_json::to_string_pretty(&self.values).map_err(io::Error::other)?;
        std::fs::write(&self.path, doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path().join("settings.json"));
        assert_eq!(settings.get("uri"), None);
    }

    #[test]
    fn malformed_file_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let mut settings = Settings::load(&path);
        assert_eq!(settings.get("uri"), None);

        // And it can be written over.
        settings.set("uri", "qemu:///session").unwrap();
        let reloaded = Settings::load(&path);
        assert_eq!(reloaded.get("uri"), Some("qemu:///session"));
    }

    #[test]
    fn set_persists_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = Settings::load(&path);
        settings.set("uri", "qemu:///system").unwrap();
        settings.set("theme", "dark").unwrap();

        let reloaded = Settings::load(&path);
        assert_eq!(reloaded.get("uri"), Some("qemu:///system"));
        assert_eq!(reloaded.get("theme"), Some("dark"));
    }

    #[test]
    fn unset_removes_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = Settings::load(&path);
        settings.set("uri", "qemu:///system").unwrap();
        settings.unset("uri").unwrap();

        assert_eq!(Settings::load(&path).get("uri"), None);
    }
}
