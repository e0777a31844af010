use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use time::Duration;

use crate::store::{BaseDir, FileStore};

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "Daylog";
const APP_NAME: &str = "daylog";

pub const CONFIG_FILENAME: &str = "config.json";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    /// Merge `config.json` over compiled-in defaults; write the defaults out
    /// on first run so users have a file to edit.
    pub fn load_or_init(&self, store: &dyn FileStore) -> Result<UserSettings> {
        self.paths.ensure_directories()?;
        if !store.exists(BaseDir::Config, CONFIG_FILENAME)? {
            let defaults = UserSettings::default();
            let json =
                serde_json::to_string_pretty(&defaults).context("serializing default config")?;
            store.write_text(BaseDir::Config, CONFIG_FILENAME, &json)?;
            return Ok(defaults);
        }
        Self::load(store)
    }

    pub fn load(store: &dyn FileStore) -> Result<UserSettings> {
        let raw = store
            .read_text(BaseDir::Config, CONFIG_FILENAME)
            .context("reading config.json")?;
        // Partial config: any field absent from the file keeps its default.
        let settings: UserSettings = serde_json::from_str(&raw).context("parsing config.json")?;
        Ok(settings)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("DAYLOG_CONFIG").ok().map(PathBuf::from);
        let override_data = env::var("DAYLOG_DATA").ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir =
            override_config.unwrap_or_else(|| project_dirs.config_dir().to_path_buf());
        let data_dir = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let cache_dir = project_dirs.cache_dir().to_path_buf();

        Ok(Self {
            config_dir,
            data_dir,
            cache_dir,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.cache_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn rooted(root: &std::path::Path) -> Self {
        Self {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
            cache_dir: root.join("cache"),
        }
    }
}

/// User-tunable settings, read from `config.json` in the config directory.
/// The file may be partial; missing fields fall back to these defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserSettings {
    pub indent_string: String,
    /// Minutes of silence before a submitted entry starts a new visual group.
    pub group_interval: u64,
    pub note_index_file_name: String,
    pub cache_file_name: String,
    pub toast_duration: u64,
    pub drag_handle_width: u32,
    pub max_tab_title_length: usize,
    pub restore_text_preview_length: usize,
    pub undo_stack_size: usize,
    pub save_debounce_time: u64,
    pub image_cache_filename: String,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            indent_string: "\t".to_string(),
            group_interval: 5,
            note_index_file_name: ".note-headings".to_string(),
            cache_file_name: "session".to_string(),
            toast_duration: 3_000,
            drag_handle_width: 20,
            max_tab_title_length: 30,
            restore_text_preview_length: 500,
            undo_stack_size: 50,
            save_debounce_time: 1_500,
            image_cache_filename: "img_data".to_string(),
        }
    }
}

impl UserSettings {
    pub fn group_interval_duration(&self) -> Duration {
        Duration::minutes(self.group_interval as i64)
    }

    pub fn save_debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.save_debounce_time)
    }

    pub fn headings_file(&self) -> String {
        format!("{}.md", self.note_index_file_name)
    }

    pub fn cache_file(&self) -> String {
        format!("{}.json", self.cache_file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DiskStore;
    use tempfile::TempDir;

    #[test]
    fn partial_config_merges_over_defaults() -> Result<()> {
        let temp = TempDir::new()?;
        let store = DiskStore::rooted(temp.path());
        store.write_text(
            BaseDir::Config,
            CONFIG_FILENAME,
            r#"{ "groupInterval": 12, "undoStackSize": 5 }"#,
        )?;

        let settings = ConfigLoader::load(&store)?;
        assert_eq!(settings.group_interval, 12);
        assert_eq!(settings.undo_stack_size, 5);
        assert_eq!(settings.indent_string, "\t");
        assert_eq!(settings.cache_file_name, "session");
        Ok(())
    }

    #[test]
    fn first_run_writes_defaults() -> Result<()> {
        let temp = TempDir::new()?;
        let store = DiskStore::rooted(temp.path());
        let loader = ConfigLoader {
            paths: ConfigPaths::rooted(temp.path()),
        };

        let settings = loader.load_or_init(&store)?;
        assert_eq!(settings.group_interval, 5);
        assert!(store.exists(BaseDir::Config, CONFIG_FILENAME)?);

        let reread = ConfigLoader::load(&store)?;
        assert_eq!(reread.save_debounce_time, settings.save_debounce_time);
        Ok(())
    }
}
