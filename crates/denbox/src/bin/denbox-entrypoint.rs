//! denbox-entrypoint - container-side identity provisioning.
//!
//! Intended as the image's ENTRYPOINT, running as root PID 1. It reads the
//! identity forwarded by `denbox run` (`USER_ID`, `GROUP_ID`, `USER_NAME`,
//! `GROUP_NAME`, each with a default), makes sure a matching user/group
//! exists, then replaces itself with the supplied command -- or an
//! interactive login shell when none was given -- running as that user.
//!
//! ```dockerfile
//! COPY denbox-entrypoint /usr/local/bin/
//! ENTRYPOINT ["denbox-entrypoint"]
//! ```
//!
//! Every provisioning step is best-effort so the same image works whether
//! or not the base already ships an account at the requested uid. Only the
//! final exec can fail, and its error becomes the container's exit reason.
//!
//! The trailing arguments belong verbatim to the target command, so there
//! are no flags here; logging is controlled through `RUST_LOG`.

use anyhow::Result;
use denbox::handoff::Handoff;
use denbox::identity::Identity;
use denbox::provision::Provisioner;
use log::debug;
use rustix::process::geteuid;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let identity = Identity::from_env();
    let argv: Vec<String> = std::env::args().skip(1).collect();

    if geteuid().is_root() {
        Provisioner::new(identity.clone())
            .with_env_overrides()
            .apply();
    } else {
        // Without root there is nothing to provision and no privilege to
        // drop; hand off directly.
        debug!("not running as root, skipping provisioning");
    }

    Handoff::new(identity, argv).exec()
}
