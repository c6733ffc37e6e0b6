use std::env::current_exe;
use std::fs;
use std::path::{Path, PathBuf};
use std::str;
use directories_next::ProjectDirs;
use log::{info, warn};
use serde_json;

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path next to the executable with a .json extension
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\gatt-browser.exe => F:\gatt-browser.json
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to gatt-browser.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "gatt-browser").map(|dirs| {
        dirs.config_dir().join("gatt-browser.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        if path.is_file() {
            return Ok(path);
        }
    }

    match get_local_config_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

pub struct ConfigIO {
    path: PathBuf,
}

impl ConfigIO {
    /// Use the portable config file if one exists, the per-user one otherwise.
    pub fn locate() -> Result<Self, ConfigError> {
        Ok(ConfigIO { path: get_config_path()? })
    }

    pub fn at(path: impl AsRef<Path>) -> Self {
        ConfigIO { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or empty file yields the default config.
    pub fn read(&self) -> Result<Config, ConfigError> {
        info!("Reading config file {}", self.path.to_string_lossy());

        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(err) => {
                let err = ConfigError::from(err);
                if err.is_file_not_found_error() {
                    return Ok(Config::default());
                }
                return Err(err);
            },
        };

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(Config::default());
        }

        let content = str::from_utf8(&content)?;
        Ok(serde_json::from_str(content)?)
    }

    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        info!("Saving config to {}", self.path.to_string_lossy());

        if let Some(directory) = self.path.parent() {
            fs::create_dir_all(directory)?;
        }
        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_and_empty_files_give_defaults() {
        let dir = tempdir().unwrap();
        let io = ConfigIO::at(dir.path().join("config.json"));
        assert_eq!(io.read().unwrap(), Config::default());

        fs::write(io.path(), "  \n").unwrap();
        assert_eq!(io.read().unwrap(), Config::default());
    }

    #[test]
    fn saved_config_is_read_back() {
        let dir = tempdir().unwrap();
        let io = ConfigIO::at(dir.path().join("nested").join("config.json"));
        let config = Config {
            status_characteristic: Some(String::from("0000fff1-0000-1000-8000-00805f9b34fb")),
            ..Config::default()
        };

        io.save(&config).unwrap();
        assert_eq!(io.read().unwrap(), config);
    }

    #[test]
    fn invalid_json_is_reported() {
        let dir = tempdir().unwrap();
        let io = ConfigIO::at(dir.path().join("config.json"));
        fs::write(io.path(), "{ not json").unwrap();
        assert!(matches!(io.read(), Err(ConfigError::JsonError { .. })));
    }
}
