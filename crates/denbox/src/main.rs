//! denbox - development containers that share your host identity.
//!
//! ## Usage
//!
//! ```bash
//! # Build the project image (tagged after the directory name)
//! denbox build
//!
//! # Drop into an interactive shell as yourself inside the container
//! denbox run
//!
//! # Run a one-off command, exit status passes straight through
//! denbox run -- pytest -x tests/
//!
//! # Show the effective configuration
//! denbox config
//! ```
//!
//! `run` forwards the host uid/gid/user/group into the container through
//! environment variables; `denbox-entrypoint` (the image's ENTRYPOINT)
//! provisions a matching account and executes the command as that user.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use denbox::config::{Config, GpuMode};
use denbox::identity::{Identity, sanitize_groupname, sanitize_username};
use denbox::provision::{ENV_ELEVATED_GROUP, ENV_SHELL};
use denbox::runtime::{
    BuildContext, ContainerRuntime, RunOptions, image_tag_for_dir, validate_image_ref,
};
use log::{debug, info};
use std::io::IsTerminal;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "denbox",
    version,
    about = "Development containers that share your host identity",
    after_help = "Examples:\n  \
        denbox build\n  \
        denbox run -- cargo test\n  \
        denbox run --gpu on --image webapp-dev"
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the project image.
    Build {
        /// Dockerfile to use instead of <PATH>/Dockerfile.
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Image tag; derived from the directory name when omitted.
        #[arg(short, long)]
        tag: Option<String>,
        /// Build context directory. Defaults to the current directory.
        path: Option<PathBuf>,
    },
    /// Launch a container as the host user.
    Run {
        /// Image to run; derived from the directory name when omitted.
        #[arg(short, long, env = "DENBOX_IMAGE")]
        image: Option<String>,
        /// GPU passthrough policy.
        #[arg(long, value_enum)]
        gpu: Option<GpuMode>,
        /// Do not mount the project directory.
        #[arg(long)]
        no_mount: bool,
        /// Command to run inside the container; an interactive shell
        /// when omitted.
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Command::Build { file, tag, path } => cmd_build(file, tag, path),
        Command::Run {
            image,
            gpu,
            no_mount,
            command,
        } => cmd_run(image, gpu, no_mount, command),
        Command::Config => cmd_config(),
    }
}

fn project_dir(path: Option<PathBuf>) -> Result<PathBuf> {
    let dir = match path {
        Some(path) => path,
        None => std::env::current_dir().context("determining current directory")?,
    };
    dir.canonicalize()
        .with_context(|| format!("resolving project directory {}", dir.display()))
}

fn select_runtime(config: &Config) -> Result<ContainerRuntime> {
    let runtime = match config.runtime {
        Some(runtime_type) => ContainerRuntime::with_type(runtime_type),
        None => ContainerRuntime::detect()?,
    };
    debug!("using container runtime: {}", runtime.runtime_type());
    Ok(runtime)
}

fn cmd_build(file: Option<PathBuf>, tag: Option<String>, path: Option<PathBuf>) -> Result<()> {
    let dir = project_dir(path)?;
    let config = Config::load(&dir)?;
    let runtime = select_runtime(&config)?;

    let tag = tag
        .or_else(|| config.image.clone())
        .unwrap_or_else(|| image_tag_for_dir(&dir));
    validate_image_ref(&tag)?;

    info!("building {} from {}", tag, dir.display());
    let status = runtime.build(&BuildContext {
        dir,
        tag,
        dockerfile: file,
    })?;

    // Build output already went to the terminal; just pass the verdict on.
    std::process::exit(status.code().unwrap_or(1));
}

fn cmd_run(
    image: Option<String>,
    gpu: Option<GpuMode>,
    no_mount: bool,
    command: Vec<String>,
) -> Result<()> {
    let dir = project_dir(None)?;
    let config = Config::load(&dir)?;
    let runtime = select_runtime(&config)?;

    let image = image
        .or_else(|| config.image.clone())
        .unwrap_or_else(|| image_tag_for_dir(&dir));
    validate_image_ref(&image)?;

    let mut identity = Identity::from_host();
    if let Some(user) = &config.identity.user {
        identity.user = sanitize_username(user);
    }
    if let Some(group) = &config.identity.group {
        identity.group = sanitize_groupname(group);
    }

    let gpus = match gpu.unwrap_or(config.gpu) {
        GpuMode::On => true,
        GpuMode::Off => false,
        GpuMode::Auto => runtime.gpu_available(),
    };

    let mut opts = RunOptions::new(image, identity);
    opts.command = command;
    opts.tty = std::io::stdin().is_terminal() && std::io::stdout().is_terminal();
    opts.gpus = gpus;
    if config.mount_project && !no_mount {
        opts.mount = Some((dir.to_string_lossy().to_string(), config.workdir.clone()));
    }
    opts.env = config.env.into_iter().collect();
    opts.env
        .push((ENV_SHELL.to_string(), config.identity.shell));
    opts.env
        .push((ENV_ELEVATED_GROUP.to_string(), config.identity.elevated_group));
    opts.volumes = config.volumes;

    let status = runtime.run(&opts)?;

    // The container's exit status is the command's exit status.
    std::process::exit(status.code().unwrap_or(1));
}

fn cmd_config() -> Result<()> {
    let dir = project_dir(None)?;
    let config = Config::load(&dir)?;
    print!("{}", config.to_toml()?);
    Ok(())
}
