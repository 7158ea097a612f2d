//! Host-side configuration.
//!
//! Two optional TOML files feed the resolved [`Config`]:
//!
//! 1. **Global** (`~/.config/denbox/config.toml`): per-machine defaults
//! 2. **Project** (`.denbox.toml` in the project directory)
//!
//! Project values override global values field by field; the `env` map and
//! `volumes` list are merged with project entries winning. A missing file
//! is fine, an unparsable one is an error.
//!
//! ```toml
//! # ~/.config/denbox/config.toml
//! gpu = "off"
//!
//! [identity]
//! shell = "/bin/zsh"
//! ```
//!
//! ```toml
//! # .denbox.toml
//! image = "webapp-dev"
//! workdir = "/app"
//! env = { DATABASE_URL = "postgres://localhost/dev" }
//! ```

use crate::runtime::RuntimeType;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Per-project config file name.
pub const PROJECT_CONFIG_FILE: &str = ".denbox.toml";

/// GPU passthrough policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GpuMode {
    /// Request GPUs when the host looks GPU-capable.
    #[default]
    Auto,
    /// Always request GPUs.
    On,
    /// Never request GPUs.
    Off,
}

/// Resolved configuration after layering files over the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Image tag override; derived from the project directory when unset.
    pub image: Option<String>,
    /// Runtime override; auto-detected when unset.
    pub runtime: Option<RuntimeType>,
    /// GPU passthrough policy.
    pub gpu: GpuMode,
    /// Mount the project directory into the container.
    pub mount_project: bool,
    /// Container path the project directory is mounted at.
    pub workdir: String,
    /// Extra environment variables for launched containers.
    pub env: BTreeMap<String, String>,
    /// Extra volume mounts in `host:container` form.
    pub volumes: Vec<String>,
    /// Identity-related overrides.
    pub identity: IdentitySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image: None,
            runtime: None,
            gpu: GpuMode::Auto,
            mount_project: true,
            workdir: "/workspace".to_string(),
            env: BTreeMap::new(),
            volumes: Vec::new(),
            identity: IdentitySettings::default(),
        }
    }
}

/// Overrides for the identity forwarded to the entrypoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    /// Forwarded user name; the host user name when unset.
    pub user: Option<String>,
    /// Forwarded group name; the host group name when unset.
    pub group: Option<String>,
    /// Supplementary privilege group the entrypoint adds the user to.
    pub elevated_group: String,
    /// Login shell the entrypoint hands to useradd.
    pub shell: String,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            user: None,
            group: None,
            elevated_group: crate::provision::DEFAULT_ELEVATED_GROUP.to_string(),
            shell: crate::provision::DEFAULT_SHELL.to_string(),
        }
    }
}

/// On-disk representation: everything optional, so a file only overrides
/// the fields it actually mentions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub image: Option<String>,
    pub runtime: Option<RuntimeType>,
    pub gpu: Option<GpuMode>,
    pub mount_project: Option<bool>,
    pub workdir: Option<String>,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<String>,
    pub identity: Option<IdentityFile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityFile {
    pub user: Option<String>,
    pub group: Option<String>,
    pub elevated_group: Option<String>,
    pub shell: Option<String>,
}

impl Config {
    /// Load and layer the global and per-project config files.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let global = match Self::global_path() {
            Some(path) => Self::read_file(&path)?,
            None => None,
        };
        let project = Self::read_file(&project_dir.join(PROJECT_CONFIG_FILE))?;
        Ok(Self::resolve(global, project))
    }

    /// Path of the global config file, when a config dir exists.
    pub fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("denbox").join("config.toml"))
    }

    fn read_file(path: &Path) -> Result<Option<ConfigFile>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let file = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(file))
    }

    /// Layer config files over the defaults, later files winning.
    pub fn resolve(global: Option<ConfigFile>, project: Option<ConfigFile>) -> Self {
        let mut config = Self::default();
        for file in [global, project].into_iter().flatten() {
            config.overlay(file);
        }
        config
    }

    fn overlay(&mut self, file: ConfigFile) {
        if let Some(image) = file.image {
            self.image = Some(image);
        }
        if let Some(runtime) = file.runtime {
            self.runtime = Some(runtime);
        }
        if let Some(gpu) = file.gpu {
            self.gpu = gpu;
        }
        if let Some(mount_project) = file.mount_project {
            self.mount_project = mount_project;
        }
        if let Some(workdir) = file.workdir {
            self.workdir = workdir;
        }
        self.env.extend(file.env);
        self.volumes.extend(file.volumes);
        if let Some(identity) = file.identity {
            if let Some(user) = identity.user {
                self.identity.user = Some(user);
            }
            if let Some(group) = identity.group {
                self.identity.group = Some(group);
            }
            if let Some(elevated_group) = identity.elevated_group {
                self.identity.elevated_group = elevated_group;
            }
            if let Some(shell) = identity.shell {
                self.identity.shell = shell;
            }
        }
    }

    /// Render the effective configuration for `denbox config`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing configuration")
    }
}
