//! Configuration file loader.
//!
//! Unlike the teacher's hand-rolled YAML + `${VAR}` expansion, we let
//! `figment` own the layering: a TOML file provides the base, environment
//! variables prefixed `PLUGIN_BUS_` (double-underscore nested, e.g.
//! `PLUGIN_BUS_FAST_PUSH__BATCH_SIZE`) override it.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use tracing::{debug, info};

use super::error::{ConfigError, ConfigResult};
use super::schema::PluginBusConfig;
use super::validation::validate_config;

const CONFIG_NAMES: &[&str] = &["plugin-bus.toml", ".plugin-bus.toml"];
const ENV_PREFIX: &str = "PLUGIN_BUS_";

/// Configuration loader with support for multiple search paths.
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Creates a new configuration loader with no search paths.
    pub fn new() -> Self {
        Self {
            search_paths: Vec::new(),
        }
    }

    /// Adds a search path for configuration files.
    pub fn add_search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the current directory to search paths.
    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.add_search_path(cwd)
        } else {
            self
        }
    }

    /// Adds the user config directory to search paths.
    pub fn with_user_config_dir(self) -> Self {
        if let Some(config_dir) = dirs::config_dir() {
            self.add_search_path(config_dir.join("plugin-bus"))
        } else {
            self
        }
    }

    /// Loads configuration, layering a TOML file (if one is found on a
    /// search path) under environment variable overrides, and falling back
    /// to defaults entirely when no file exists.
    pub fn load(&self) -> ConfigResult<PluginBusConfig> {
        let mut figment = Figment::from(Serialized::defaults(PluginBusConfig::default()));

        if let Some(path) = self.find_config_file() {
            info!(path = %path.display(), "loading plugin bus configuration file");
            figment = figment.merge(Toml::file(&path));
        } else {
            info!("no plugin bus configuration file found, using defaults");
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: PluginBusConfig = figment.extract().map_err(ConfigError::Load)?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Loads configuration from a specific file, still honoring environment
    /// overrides on top.
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<PluginBusConfig> {
        let path = path.as_ref();
        let figment = Figment::from(Serialized::defaults(PluginBusConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let config: PluginBusConfig = figment.extract().map_err(ConfigError::Load)?;
        validate_config(&config)?;
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        for search_path in &self.search_paths {
            for name in CONFIG_NAMES {
                let path = search_path.join(name);
                debug!(path = %path.display(), "checking for config file");
                if path.exists() {
                    return Some(path);
                }
            }
        }
        None
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new().with_current_dir().with_user_config_dir()
    }
}

/// Convenience function to load configuration with default search paths.
pub fn load_config() -> ConfigResult<PluginBusConfig> {
    ConfigLoader::default().load()
}

/// Convenience function to load configuration from a specific file.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<PluginBusConfig> {
    ConfigLoader::new().load_from_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_bus_framework::SyncCallPolicy;
    use std::io::Write;

    #[test]
    fn empty_search_paths_yield_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config.fast_push.batch_size, 32);
        assert_eq!(config.safety.sync_call_in_handler, SyncCallPolicy::Warn);
    }

    #[test]
    fn loads_and_overrides_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin-bus.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[fast_push]\nbatch_size = 64\n").unwrap();
        writeln!(file, "[safety]\nsync_call_in_handler = \"reject\"\n").unwrap();
        drop(file);

        let config = ConfigLoader::new().load_from_file(&path).unwrap();
        assert_eq!(config.fast_push.batch_size, 64);
        assert_eq!(config.safety.sync_call_in_handler, SyncCallPolicy::Reject);
        // Fields not present in the file keep their defaults.
        assert_eq!(config.ingress.capacity, 1000);
    }

    #[test]
    fn environment_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin-bus.toml");
        std::fs::write(&path, "[fast_push]\nbatch_size = 64\n").unwrap();

        // SAFETY: test runs single-threaded with respect to this var.
        unsafe { std::env::set_var("PLUGIN_BUS_FAST_PUSH__BATCH_SIZE", "128") };
        let figment = Figment::from(Serialized::defaults(PluginBusConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let config: PluginBusConfig = figment.extract().unwrap();
        unsafe { std::env::remove_var("PLUGIN_BUS_FAST_PUSH__BATCH_SIZE") };

        assert_eq!(config.fast_push.batch_size, 128);
    }

    #[test]
    fn find_config_file_checks_every_search_path_in_order() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        std::fs::write(dir_b.path().join("plugin-bus.toml"), "").unwrap();

        let loader = ConfigLoader::new()
            .add_search_path(dir_a.path())
            .add_search_path(dir_b.path());
        let found = loader.find_config_file().unwrap();
        assert_eq!(found, dir_b.path().join("plugin-bus.toml"));
    }
}
