//! Container runtime plumbing.
//!
//! Drives containers through the Docker or Podman CLI. The runtime is
//! auto-detected or can be configured explicitly. Argument assembly is kept
//! separate from process spawning so the launch plans stay unit-testable.

mod error;

pub use error::{RuntimeError, RuntimeResult};

use crate::identity::Identity;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Docker runtime (the common case for dev machines).
    #[default]
    Docker,
    /// Podman runtime.
    Podman,
}

impl RuntimeType {
    /// Get the default binary name for this runtime.
    pub fn default_binary(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "docker"),
            RuntimeType::Podman => write!(f, "podman"),
        }
    }
}

/// A detected container runtime.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    runtime_type: RuntimeType,
    binary: String,
}

impl ContainerRuntime {
    /// Detect an available runtime, preferring Docker.
    pub fn detect() -> RuntimeResult<Self> {
        for runtime_type in [RuntimeType::Docker, RuntimeType::Podman] {
            if Self::is_binary_available(runtime_type.default_binary()) {
                return Ok(Self::with_type(runtime_type));
            }
        }
        Err(RuntimeError::NoRuntimeAvailable)
    }

    /// Use a specific runtime without probing for it.
    pub fn with_type(runtime_type: RuntimeType) -> Self {
        Self {
            binary: runtime_type.default_binary().to_string(),
            runtime_type,
        }
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    /// Check if a binary is available in PATH.
    fn is_binary_available(name: &str) -> bool {
        Command::new("which")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Whether GPU passthrough is worth requesting: either the NVIDIA
    /// driver tooling is on PATH or the runtime reports an `nvidia`
    /// runtime in its info output.
    pub fn gpu_available(&self) -> bool {
        if Self::is_binary_available("nvidia-smi") {
            return true;
        }

        let output = Command::new(&self.binary)
            .args(["info", "--format", "{{json .Runtimes}}"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output();

        match output {
            Ok(out) if out.status.success() => {
                serde_json::from_slice::<serde_json::Value>(&out.stdout)
                    .ok()
                    .and_then(|v| v.as_object().map(|m| m.contains_key("nvidia")))
                    .unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Build an image, streaming the build output to the terminal.
    /// The caller propagates the exit status.
    pub fn build(&self, ctx: &BuildContext) -> RuntimeResult<ExitStatus> {
        let args = ctx.args();
        info!("{} {}", self.binary, args.join(" "));
        Ok(Command::new(&self.binary).args(&args).status()?)
    }

    /// Launch a container in the foreground with inherited stdio.
    /// The caller propagates the exit status.
    pub fn run(&self, opts: &RunOptions) -> RuntimeResult<ExitStatus> {
        let args = opts.args();
        debug!("{} {}", self.binary, args.join(" "));
        Ok(Command::new(&self.binary).args(&args).status()?)
    }
}

/// Derive the project image tag from a directory name.
pub fn image_tag_for_dir(dir: &Path) -> String {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    sanitize_image_tag(&name)
}

/// Sanitize an arbitrary string into a valid image repository name:
/// lowercase, `[a-z0-9._-]`, starting alphanumeric. Empty results fall
/// back to a fixed tag.
pub fn sanitize_image_tag(name: &str) -> String {
    let mut tag = String::with_capacity(name.len());
    for c in name.chars().map(|c| c.to_ascii_lowercase()) {
        let valid = if tag.is_empty() {
            c.is_ascii_alphanumeric()
        } else {
            c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'
        };
        if valid {
            tag.push(c);
        } else if !tag.is_empty() {
            tag.push('-');
        }
    }
    while tag.ends_with(['-', '.', '_']) {
        tag.pop();
    }
    if tag.is_empty() {
        tag.push_str("denbox");
    }
    tag
}

/// Validate a user-supplied image reference before handing it to the
/// runtime CLI.
pub fn validate_image_ref(image: &str) -> RuntimeResult<()> {
    if image.is_empty() {
        return Err(RuntimeError::InvalidInput(
            "image reference cannot be empty".to_string(),
        ));
    }
    if image.len() > 256 {
        return Err(RuntimeError::InvalidInput(
            "image reference exceeds maximum length".to_string(),
        ));
    }
    let valid_chars =
        |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | ':' | '@');
    if image.starts_with('-') || !image.chars().all(valid_chars) {
        return Err(RuntimeError::InvalidInput(format!(
            "image reference '{image}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Inputs for an image build.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Build context directory.
    pub dir: PathBuf,
    /// Image tag to apply.
    pub tag: String,
    /// Explicit Dockerfile, when not `<dir>/Dockerfile`.
    pub dockerfile: Option<PathBuf>,
}

impl BuildContext {
    /// Assemble the `build` argument vector.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["build".to_string(), "-t".to_string(), self.tag.clone()];
        if let Some(file) = &self.dockerfile {
            args.push("-f".to_string());
            args.push(file.to_string_lossy().to_string());
        }
        args.push(self.dir.to_string_lossy().to_string());
        args
    }
}

/// Inputs for a container launch.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Image to run.
    pub image: String,
    /// Host identity forwarded into the container environment.
    pub identity: Identity,
    /// Command handed to the entrypoint; empty means interactive shell.
    pub command: Vec<String>,
    /// Allocate a pseudo-terminal.
    pub tty: bool,
    /// Request GPU passthrough (`--gpus all`).
    pub gpus: bool,
    /// Project mount as `(host_dir, container_dir)`.
    pub mount: Option<(String, String)>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Extra volume mounts in `host:container` form.
    pub volumes: Vec<String>,
}

impl RunOptions {
    pub fn new(image: impl Into<String>, identity: Identity) -> Self {
        Self {
            image: image.into(),
            identity,
            command: Vec::new(),
            tty: false,
            gpus: false,
            mount: None,
            env: Vec::new(),
            volumes: Vec::new(),
        }
    }

    /// Assemble the `run` argument vector.
    ///
    /// Containers are always removed on exit and get an interactive stdin;
    /// a pseudo-terminal and GPU access are only requested when detected
    /// or forced by the caller.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["run".into(), "--rm".into(), "-i".into()];

        if self.tty {
            args.push("-t".into());
        }
        if self.gpus {
            args.push("--gpus".into());
            args.push("all".into());
        }

        for (key, value) in self.identity.env_pairs() {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        for (key, value) in &self.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }

        for volume in &self.volumes {
            args.push("-v".into());
            args.push(volume.clone());
        }
        if let Some((host, container)) = &self.mount {
            args.push("-v".into());
            args.push(format!("{host}:{container}"));
            args.push("-w".into());
            args.push(container.clone());
        }

        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }
}
