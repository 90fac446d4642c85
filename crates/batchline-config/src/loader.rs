//! Configuration loader with multi-source merging

use crate::{BatchlineConfig, Paths};
use anyhow::{Context, Result};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

/// A TOML file layer, in increasing precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLayer {
    /// `~/.config/batchline/config.toml`
    User,
    /// `batchline.toml` in the project directory
    Project,
    /// `batchline.local.toml` in the project directory, gitignored
    Local,
}

impl fmt::Display for FileLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "User file"),
            Self::Project => write!(f, "Project file"),
            Self::Local => write!(f, "Local file"),
        }
    }
}

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    env_vars: Option<config::Map<String, String>>,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "BATCHLINE".to_string(),
            env_vars: None,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "BATCHLINE")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Read the environment layer from `vars` instead of the process
    /// environment.
    pub fn with_env_vars<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Candidate file layers, lowest precedence first. Paths may not exist.
    pub fn file_layers(&self) -> Vec<(FileLayer, PathBuf)> {
        let mut layers = Vec::with_capacity(3);
        if let Ok(user) = Paths::new().user_config_file() {
            layers.push((FileLayer::User, user));
        }
        layers.push((
            FileLayer::Project,
            Paths::project_config_file(&self.project_dir),
        ));
        layers.push((FileLayer::Local, Paths::local_config_file(&self.project_dir)));
        layers
    }

    /// `BATCHLINE_QUEUE__NAME`, `BATCHLINE_BATCH__SIZE`, ...: `_` after the
    /// prefix, `__` between section and key.
    fn env_layer(&self) -> config::Environment {
        config::Environment::with_prefix(&self.env_prefix)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(self.env_vars.clone())
    }

    /// Load configuration from all sources with proper precedence, then
    /// validate it and resolve relative paths against the project directory.
    pub fn load(self) -> Result<BatchlineConfig> {
        let defaults = BatchlineConfig::default();
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&defaults)?);

        for (_, path) in self.file_layers() {
            if path.exists() {
                builder = builder.add_source(
                    config::File::from(path)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        let mut batchline_config: BatchlineConfig = builder
            .add_source(self.env_layer())
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        batchline_config
            .validate()
            .context("Configuration failed validation")?;
        batchline_config.resolve_paths(&self.project_dir);

        Ok(batchline_config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
