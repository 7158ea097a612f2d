//! End-to-end tests for launch planning.
//!
//! Tests cover:
//! - Config file layering feeding a container launch
//! - Identity forwarding through the run argument vector
//! - Image tag derivation from project directories
//! - Entrypoint hand-off argv selection

use denbox::config::{Config, ConfigFile, GpuMode, PROJECT_CONFIG_FILE};
use denbox::handoff::target_argv;
use denbox::identity::Identity;
use denbox::runtime::{BuildContext, RunOptions, image_tag_for_dir};
use std::path::{Path, PathBuf};

fn host_identity() -> Identity {
    Identity {
        uid: 1001,
        gid: 1001,
        user: "alice".into(),
        group: "alice".into(),
    }
}

/// Assemble RunOptions the way `denbox run` does from a resolved config.
fn plan_run(config: &Config, project_dir: &Path, command: Vec<String>) -> RunOptions {
    let image = config
        .image
        .clone()
        .unwrap_or_else(|| image_tag_for_dir(project_dir));
    let mut opts = RunOptions::new(image, host_identity());
    opts.command = command;
    if config.mount_project {
        opts.mount = Some((
            project_dir.to_string_lossy().to_string(),
            config.workdir.clone(),
        ));
    }
    opts.env = config.env.clone().into_iter().collect();
    opts.volumes = config.volumes.clone();
    opts
}

// ============================================================================
// Config layering into launch plans
// ============================================================================

mod config_layering {
    use super::*;

    #[test]
    fn project_file_shapes_the_launch() {
        let project: ConfigFile = toml::from_str(
            r#"
            image = "webapp-dev"
            workdir = "/app"
            env = { DATABASE_URL = "postgres://localhost/dev" }
            volumes = ["/var/cache/pip:/root/.cache/pip"]
            "#,
        )
        .expect("valid project config");

        let config = Config::resolve(None, Some(project));
        let opts = plan_run(&config, Path::new("/home/alice/webapp"), vec![]);
        let args = opts.args();

        assert_eq!(opts.image, "webapp-dev");
        assert!(
            args.windows(2)
                .any(|w| w == ["-v", "/home/alice/webapp:/app"])
        );
        assert!(args.windows(2).any(|w| w == ["-w", "/app"]));
        assert!(
            args.windows(2)
                .any(|w| w == ["-e", "DATABASE_URL=postgres://localhost/dev"])
        );
        assert!(
            args.windows(2)
                .any(|w| w == ["-v", "/var/cache/pip:/root/.cache/pip"])
        );
    }

    #[test]
    fn global_defaults_survive_partial_project_file() {
        let global: ConfigFile =
            toml::from_str("gpu = \"off\"\nworkdir = \"/srv\"").expect("valid");
        let project: ConfigFile = toml::from_str("image = \"webapp\"").expect("valid");

        let config = Config::resolve(Some(global), Some(project));
        assert_eq!(config.gpu, GpuMode::Off);
        assert_eq!(config.workdir, "/srv");
        assert_eq!(config.image.as_deref(), Some("webapp"));
    }

    #[test]
    fn disabling_the_project_mount() {
        let project: ConfigFile = toml::from_str("mount_project = false").expect("valid");
        let config = Config::resolve(None, Some(project));
        let opts = plan_run(&config, Path::new("/home/alice/webapp"), vec![]);

        assert!(opts.mount.is_none());
        assert!(!opts.args().contains(&"-w".to_string()));
    }

    #[test]
    fn load_reads_project_file_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(PROJECT_CONFIG_FILE),
            "image = \"from-disk\"\n",
        )
        .expect("write config");

        let config = Config::load(dir.path()).expect("loads");
        assert_eq!(config.image.as_deref(), Some("from-disk"));
    }

    #[test]
    fn load_rejects_malformed_project_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(PROJECT_CONFIG_FILE), "image = [broken")
            .expect("write config");

        assert!(Config::load(dir.path()).is_err());
    }
}

// ============================================================================
// Identity forwarding
// ============================================================================

mod identity_forwarding {
    use super::*;

    #[test]
    fn every_launch_carries_the_full_identity() {
        let opts = plan_run(&Config::default(), Path::new("/home/alice/webapp"), vec![]);
        let args = opts.args();

        for expected in [
            "USER_ID=1001",
            "GROUP_ID=1001",
            "USER_NAME=alice",
            "GROUP_NAME=alice",
        ] {
            assert!(
                args.windows(2).any(|w| w[0] == "-e" && w[1] == expected),
                "missing {expected} in {args:?}"
            );
        }
    }

    #[test]
    fn forwarded_identity_parses_back_inside_the_container() {
        let opts = plan_run(&Config::default(), Path::new("/srv/webapp"), vec![]);
        let env: std::collections::HashMap<String, String> = opts
            .args()
            .windows(2)
            .filter(|w| w[0] == "-e")
            .filter_map(|w| w[1].split_once('=').map(|(k, v)| (k.into(), v.into())))
            .collect();

        let inside = Identity::from_env_with(|key| env.get(key).cloned());
        assert_eq!(inside, host_identity());
    }
}

// ============================================================================
// Image tags and build plans
// ============================================================================

mod image_tags {
    use super::*;

    #[test]
    fn tag_follows_directory_name() {
        assert_eq!(image_tag_for_dir(Path::new("/home/alice/webapp")), "webapp");
        assert_eq!(
            image_tag_for_dir(Path::new("/home/alice/ML Experiments")),
            "ml-experiments"
        );
    }

    #[test]
    fn build_plan_uses_derived_tag() {
        let dir = PathBuf::from("/home/alice/webapp");
        let ctx = BuildContext {
            tag: image_tag_for_dir(&dir),
            dir,
            dockerfile: None,
        };
        assert_eq!(
            ctx.args(),
            vec!["build", "-t", "webapp", "/home/alice/webapp"]
        );
    }
}

// ============================================================================
// Entrypoint hand-off
// ============================================================================

mod entrypoint_handoff {
    use super::*;

    #[test]
    fn no_command_means_login_shell() {
        let opts = plan_run(&Config::default(), Path::new("/srv/webapp"), vec![]);
        // Nothing after the image: the entrypoint sees an empty argv...
        assert_eq!(opts.args().last().map(String::as_str), Some("webapp"));
        // ...and turns it into a login shell.
        assert_eq!(target_argv(&[], "/bin/bash"), vec!["/bin/bash", "-l"]);
    }

    #[test]
    fn command_reaches_the_entrypoint_verbatim() {
        let command = vec!["pytest".to_string(), "-x".to_string()];
        let opts = plan_run(
            &Config::default(),
            Path::new("/srv/webapp"),
            command.clone(),
        );
        let args = opts.args();

        let image_pos = args.iter().position(|a| a == "webapp").expect("image");
        assert_eq!(&args[image_pos + 1..], command.as_slice());
        assert_eq!(target_argv(&command, "/bin/bash"), command);
    }
}
