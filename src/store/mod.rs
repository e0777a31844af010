use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::ConfigPaths;
use crate::error::EngineError;

/// Which application directory a logical filename resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseDir {
    Data,
    Cache,
    Config,
}

/// Narrow filesystem collaborator the engine is written against. Everything
/// the core persists goes through these five calls, keyed by logical filename.
pub trait FileStore {
    fn exists(&self, dir: BaseDir, name: &str) -> Result<bool>;
    fn read_text(&self, dir: BaseDir, name: &str) -> Result<String>;
    fn write_text(&self, dir: BaseDir, name: &str, contents: &str) -> Result<()>;
    fn read_binary(&self, dir: BaseDir, name: &str) -> Result<Vec<u8>>;
    fn write_binary(&self, dir: BaseDir, name: &str, contents: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct DiskStore {
    data_dir: PathBuf,
    cache_dir: PathBuf,
    config_dir: PathBuf,
}

impl DiskStore {
    pub fn new(paths: &ConfigPaths) -> Self {
        Self {
            data_dir: paths.data_dir.clone(),
            cache_dir: paths.cache_dir.clone(),
            config_dir: paths.config_dir.clone(),
        }
    }

    #[cfg(test)]
    pub fn rooted(root: &Path) -> Self {
        Self {
            data_dir: root.join("data"),
            cache_dir: root.join("cache"),
            config_dir: root.join("config"),
        }
    }

    fn resolve(&self, dir: BaseDir, name: &str) -> PathBuf {
        let base = match dir {
            BaseDir::Data => &self.data_dir,
            BaseDir::Cache => &self.cache_dir,
            BaseDir::Config => &self.config_dir,
        };
        base.join(name)
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        Ok(())
    }
}

impl FileStore for DiskStore {
    fn exists(&self, dir: BaseDir, name: &str) -> Result<bool> {
        Ok(self.resolve(dir, name).exists())
    }

    fn read_text(&self, dir: BaseDir, name: &str) -> Result<String> {
        let path = self.resolve(dir, name);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(contents),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(EngineError::NotFound(path.display().to_string()).into())
            }
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    fn write_text(&self, dir: BaseDir, name: &str, contents: &str) -> Result<()> {
        let path = self.resolve(dir, name);
        Self::ensure_parent(&path)?;
        fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))
    }

    fn read_binary(&self, dir: BaseDir, name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(dir, name);
        match fs::read(&path) {
            Ok(contents) => Ok(contents),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(EngineError::NotFound(path.display().to_string()).into())
            }
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    fn write_binary(&self, dir: BaseDir, name: &str, contents: &[u8]) -> Result<()> {
        let path = self.resolve(dir, name);
        Self::ensure_parent(&path)?;
        fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    #[test]
    fn write_then_read_round_trips() -> Result<()> {
        let temp = TempDir::new()?;
        let store = DiskStore::rooted(temp.path());

        store.write_text(BaseDir::Data, "note.md", "hello")?;
        assert!(store.exists(BaseDir::Data, "note.md")?);
        assert_eq!(store.read_text(BaseDir::Data, "note.md")?, "hello");

        store.write_binary(BaseDir::Cache, "blob.bin", &[1, 2, 3])?;
        assert_eq!(store.read_binary(BaseDir::Cache, "blob.bin")?, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn missing_file_is_classified_not_found() -> Result<()> {
        let temp = TempDir::new()?;
        let store = DiskStore::rooted(temp.path());

        assert!(!store.exists(BaseDir::Config, "absent.json")?);
        let err = store.read_text(BaseDir::Config, "absent.json").unwrap_err();
        assert_matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::NotFound(_))
        );
        Ok(())
    }

    #[test]
    fn base_dirs_do_not_collide() -> Result<()> {
        let temp = TempDir::new()?;
        let store = DiskStore::rooted(temp.path());

        store.write_text(BaseDir::Data, "x.md", "data")?;
        store.write_text(BaseDir::Cache, "x.md", "cache")?;
        assert_eq!(store.read_text(BaseDir::Data, "x.md")?, "data");
        assert_eq!(store.read_text(BaseDir::Cache, "x.md")?, "cache");
        Ok(())
    }
}
