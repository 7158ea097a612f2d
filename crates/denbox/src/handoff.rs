//! Final hand-off: drop privileges and replace the process image.
//!
//! This is the terminal action of the entrypoint. On success control never
//! comes back -- the container's PID 1 lineage continues as the target
//! command running under the provisioned user. On failure the error is the
//! process's exit reason; nothing upstream retries.

use crate::identity::Identity;
use crate::provision::resolve_user;
use anyhow::{Context, Result};
use log::{debug, error};
use rustix::process::geteuid;
use std::ffi::CString;
use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;

/// Shell used when the provisioned user cannot be resolved from the
/// identity store (a suppressed provisioning failure leaves only the
/// numeric ids to work with).
const FALLBACK_SHELL: &str = "/bin/sh";

/// The entrypoint's last step: exec the supplied command (or an
/// interactive login shell) as the provisioned user.
pub struct Handoff {
    identity: Identity,
    argv: Vec<String>,
}

impl Handoff {
    pub fn new(identity: Identity, argv: Vec<String>) -> Self {
        Self { identity, argv }
    }

    /// Replace the current process image. Returns only on failure.
    pub fn exec(self) -> Result<()> {
        let entry = resolve_user(&self.identity.user);
        let (uid, gid) = entry
            .as_ref()
            .map(|e| (e.uid, e.gid))
            .unwrap_or((self.identity.uid, self.identity.gid));
        let home = entry.as_ref().map_or("/", |e| e.home.as_str()).to_string();
        let shell = entry
            .as_ref()
            .map_or(FALLBACK_SHELL, |e| e.shell.as_str())
            .to_string();

        let interactive = self.argv.is_empty();
        let argv = target_argv(&self.argv, &shell);
        debug!("handing off to {argv:?} as {} (uid {uid})", self.identity.user);

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd.env("HOME", &home)
            .env("USER", &self.identity.user)
            .env("LOGNAME", &self.identity.user)
            .env("SHELL", &shell);
        if interactive {
            // A login shell starts in the provisioned home, a supplied
            // command keeps the container's working directory.
            cmd.current_dir(&home);
        }

        if geteuid().is_root() {
            let user = CString::new(self.identity.user.clone())
                .context("user name contains a null byte")?;
            // initgroups needs the account to exist; with only numeric ids
            // available, reduce supplementary groups to the primary gid.
            let use_initgroups = entry.is_some();
            unsafe {
                cmd.pre_exec(move || drop_privileges(&user, uid, gid, use_initgroups));
            }
        } else {
            debug!("not root, executing without a privilege change");
        }

        let err = cmd.exec();
        error!("failed to exec {:?}: {err}", argv[0]);
        Err(err).with_context(|| format!("executing {}", argv[0]))
    }
}

/// The argv to execute: the supplied command verbatim, or an interactive
/// login shell when none was given.
pub fn target_argv(argv: &[String], shell: &str) -> Vec<String> {
    if argv.is_empty() {
        vec![shell.to_string(), "-l".to_string()]
    } else {
        argv.to_vec()
    }
}

// Runs between fork and exec. Order matters: supplementary groups while
// still root, then the gid, then the uid -- after setuid the other two
// calls would no longer be permitted.
fn drop_privileges(
    user: &CString,
    uid: libc::uid_t,
    gid: libc::gid_t,
    use_initgroups: bool,
) -> io::Result<()> {
    unsafe {
        let rc = if use_initgroups {
            libc::initgroups(user.as_ptr(), gid)
        } else {
            libc::setgroups(1, &gid)
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::setgid(gid) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::setuid(uid) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_argv_becomes_login_shell() {
        assert_eq!(target_argv(&[], "/bin/bash"), vec!["/bin/bash", "-l"]);
        assert_eq!(target_argv(&[], "/bin/zsh"), vec!["/bin/zsh", "-l"]);
    }

    #[test]
    fn supplied_argv_passes_through_unmodified() {
        let argv = vec![
            "python3".to_string(),
            "-c".to_string(),
            "print('hi there')".to_string(),
        ];
        assert_eq!(target_argv(&argv, "/bin/bash"), argv);
    }

    #[test]
    fn argv_with_shell_lookalike_is_not_rewritten() {
        // Only a truly empty argv triggers the login-shell path.
        let argv = vec!["/bin/bash".to_string()];
        assert_eq!(target_argv(&argv, "/bin/bash"), argv);
    }
}
