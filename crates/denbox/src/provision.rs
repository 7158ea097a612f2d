//! Best-effort user/group provisioning inside the container.
//!
//! Base images differ in which accounts they pre-allocate: some ship a
//! default user at uid 1000, some none at all. Every step here therefore
//! tolerates pre-existing state -- "already exists" and "does not exist"
//! are part of normal operation, not failures. Nothing in this module
//! aborts the entrypoint; only the final exec is allowed to fail hard.

use crate::identity::{Identity, sanitize_gecos};
use log::debug;
use std::process::Command;

const USERADD: &str = "/usr/sbin/useradd";
const GROUPADD: &str = "/usr/sbin/groupadd";
const USERDEL: &str = "/usr/sbin/userdel";
const GETENT: &str = "/usr/bin/getent";
const ID: &str = "/usr/bin/id";

/// Optional override for the login shell handed to useradd.
pub const ENV_SHELL: &str = "DENBOX_SHELL";
/// Optional override for the supplementary privilege group.
pub const ENV_ELEVATED_GROUP: &str = "DENBOX_ELEVATED_GROUP";

/// Default supplementary group granting elevated privileges in the
/// container (members can escalate via the usual sudoers policy).
pub const DEFAULT_ELEVATED_GROUP: &str = "sudo";
/// Default login shell for the provisioned user.
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Creates the requested user/group pair on the container's identity
/// store via the shadow utilities.
pub struct Provisioner {
    identity: Identity,
    /// Supplementary group the user is added to (`-G`).
    pub elevated_group: String,
    /// Login shell handed to useradd (`-s`).
    pub shell: String,
    /// Whether useradd creates the home directory (`-m` vs `-M`).
    pub create_home: bool,
}

impl Provisioner {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            elevated_group: DEFAULT_ELEVATED_GROUP.to_string(),
            shell: DEFAULT_SHELL.to_string(),
            create_home: true,
        }
    }

    /// Apply the `DENBOX_SHELL` / `DENBOX_ELEVATED_GROUP` environment
    /// overrides, when present.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(shell) = std::env::var(ENV_SHELL) {
            self.shell = shell;
        }
        if let Ok(group) = std::env::var(ENV_ELEVATED_GROUP) {
            self.elevated_group = group;
        }
        self
    }

    /// Run the full provisioning sequence.
    ///
    /// Never fails: each step logs its error at debug level and moves on.
    /// Re-running with the same inputs is safe -- the eviction step finds
    /// nothing to remove and the create steps find their records already
    /// present.
    pub fn apply(&self) {
        // Some base images pre-allocate an account at the requested uid.
        // Evict it so useradd below can claim the uid.
        if let Some(occupant) = uid_occupant(self.identity.uid)
            && occupant != self.identity.user
        {
            best_effort(
                "userdel",
                run_tool(USERDEL, &["--remove", &occupant]),
            );
        }

        let groupadd_args = self.groupadd_args();
        let args: Vec<&str> = groupadd_args.iter().map(String::as_str).collect();
        best_effort("groupadd", run_tool(GROUPADD, &args));

        let useradd_args = self.useradd_args();
        let args: Vec<&str> = useradd_args.iter().map(String::as_str).collect();
        best_effort("useradd", run_tool(USERADD, &args));
    }

    /// Arguments for the groupadd invocation.
    pub fn groupadd_args(&self) -> Vec<String> {
        vec![
            "-g".to_string(),
            self.identity.gid.to_string(),
            self.identity.group.clone(),
        ]
    }

    /// Arguments for the useradd invocation.
    ///
    /// The primary group is passed numerically so the user lands in the
    /// right gid even when the groupadd step was skipped over an existing
    /// group with a different name.
    pub fn useradd_args(&self) -> Vec<String> {
        let mut args = vec![
            "-u".to_string(),
            self.identity.uid.to_string(),
            "-g".to_string(),
            self.identity.gid.to_string(),
            "-G".to_string(),
            self.elevated_group.clone(),
            "-s".to_string(),
            self.shell.clone(),
        ];
        args.push(if self.create_home { "-m" } else { "-M" }.to_string());
        args.push("-c".to_string());
        args.push(sanitize_gecos(&format!("denbox user {}", self.identity.user)));
        args.push(self.identity.user.clone());
        args
    }
}

fn best_effort(step: &str, result: Result<String, String>) {
    if let Err(e) = result {
        debug!("{step}: {e} (ignored)");
    }
}

fn run_tool(tool: &str, args: &[&str]) -> Result<String, String> {
    let output = Command::new(tool)
        .args(args)
        .output()
        .map_err(|e| format!("failed to execute {tool}: {e}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "{tool} failed (exit {}): {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Name of the account currently owning a uid, if any.
pub fn uid_occupant(uid: u32) -> Option<String> {
    let line = getent("passwd", &uid.to_string())?;
    let name = line.split(':').next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Check whether a user exists on the identity store.
pub fn user_exists(name: &str) -> bool {
    Command::new(ID)
        .args(["-u", name])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check whether a group exists on the identity store.
pub fn group_exists(name: &str) -> bool {
    Command::new(GETENT)
        .args(["group", name])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// A resolved `/etc/passwd` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    pub shell: String,
}

/// Resolve a user through `getent passwd`, so nss-backed stores work the
/// same as a plain passwd file.
pub fn resolve_user(name: &str) -> Option<PasswdEntry> {
    parse_passwd_line(&getent("passwd", name)?)
}

fn getent(database: &str, key: &str) -> Option<String> {
    let output = Command::new(GETENT).args([database, key]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let line = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if line.is_empty() { None } else { Some(line) }
}

// passwd format: name:password:uid:gid:gecos:home:shell
fn parse_passwd_line(line: &str) -> Option<PasswdEntry> {
    let fields: Vec<&str> = line.trim().split(':').collect();
    if fields.len() < 6 {
        return None;
    }
    Some(PasswdEntry {
        name: fields[0].to_string(),
        uid: fields[2].parse().ok()?,
        gid: fields[3].parse().ok()?,
        home: fields[5].to_string(),
        shell: fields.get(6).copied().unwrap_or("/bin/sh").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    fn alice() -> Identity {
        Identity {
            uid: 1001,
            gid: 1001,
            user: "alice".into(),
            group: "alice".into(),
        }
    }

    #[test]
    fn groupadd_args_shape() {
        let provisioner = Provisioner::new(alice());
        assert_eq!(provisioner.groupadd_args(), vec!["-g", "1001", "alice"]);
    }

    #[test]
    fn useradd_args_shape() {
        let provisioner = Provisioner::new(alice());
        let args = provisioner.useradd_args();
        assert_eq!(
            args,
            vec![
                "-u",
                "1001",
                "-g",
                "1001",
                "-G",
                "sudo",
                "-s",
                "/bin/bash",
                "-m",
                "-c",
                "denbox user alice",
                "alice",
            ]
        );
    }

    #[test]
    fn useradd_args_without_home() {
        let mut provisioner = Provisioner::new(alice());
        provisioner.create_home = false;
        assert!(provisioner.useradd_args().contains(&"-M".to_string()));
    }

    #[test]
    fn useradd_args_custom_shell_and_group() {
        let mut provisioner = Provisioner::new(alice());
        provisioner.shell = "/bin/zsh".into();
        provisioner.elevated_group = "wheel".into();
        let args = provisioner.useradd_args();
        assert!(args.windows(2).any(|w| w == ["-s", "/bin/zsh"]));
        assert!(args.windows(2).any(|w| w == ["-G", "wheel"]));
    }

    #[test]
    fn parse_passwd_full_line() {
        let entry = parse_passwd_line("alice:x:1001:1001:denbox user alice:/home/alice:/bin/bash")
            .expect("valid line");
        assert_eq!(entry.name, "alice");
        assert_eq!(entry.uid, 1001);
        assert_eq!(entry.gid, 1001);
        assert_eq!(entry.home, "/home/alice");
        assert_eq!(entry.shell, "/bin/bash");
    }

    #[test]
    fn parse_passwd_missing_shell_defaults() {
        let entry = parse_passwd_line("svc:x:99:99:svc:/var/lib/svc").expect("six fields");
        assert_eq!(entry.shell, "/bin/sh");
    }

    #[test]
    fn parse_passwd_rejects_garbage() {
        assert!(parse_passwd_line("").is_none());
        assert!(parse_passwd_line("too:few:fields").is_none());
        assert!(parse_passwd_line("name:x:not-a-uid:1:gecos:/home:/bin/sh").is_none());
    }
}
