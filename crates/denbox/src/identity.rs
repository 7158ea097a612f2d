//! Host/container identity mapping.
//!
//! The identity request is the tuple (uid, gid, user name, group name). On
//! the host it is captured from the invoking user and forwarded into the
//! container through environment variables; inside the container the
//! entrypoint reads the same variables once at startup, provisions a
//! matching account, and never mutates the identity afterwards.

use log::warn;
use rustix::process::{getgid, getuid};
use std::process::Command;

/// Environment variable carrying the numeric user id.
pub const ENV_USER_ID: &str = "USER_ID";
/// Environment variable carrying the numeric group id.
pub const ENV_GROUP_ID: &str = "GROUP_ID";
/// Environment variable carrying the user name.
pub const ENV_USER_NAME: &str = "USER_NAME";
/// Environment variable carrying the group name.
pub const ENV_GROUP_NAME: &str = "GROUP_NAME";

/// Fallback uid when `USER_ID` is unset.
pub const DEFAULT_UID: u32 = 1000;
/// Fallback gid when `GROUP_ID` is unset.
pub const DEFAULT_GID: u32 = 1000;
/// Fallback user name when `USER_NAME` is unset.
pub const DEFAULT_USER_NAME: &str = "user";
/// Fallback group name when `GROUP_NAME` is unset.
pub const DEFAULT_GROUP_NAME: &str = "group";

/// Linux account names are capped at 32 characters.
const ACCOUNT_NAME_MAX: usize = 32;

/// The identity to provision inside a container: numeric ids plus the
/// account names they should appear under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
    pub user: String,
    pub group: String,
}

impl Identity {
    /// Read the identity from the process environment, falling back to the
    /// documented defaults for anything unset.
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Testable core of [`from_env`](Self::from_env): the lookup closure
    /// stands in for `std::env::var`.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let user = lookup(ENV_USER_NAME).unwrap_or_else(|| DEFAULT_USER_NAME.to_string());
        let group = lookup(ENV_GROUP_NAME).unwrap_or_else(|| DEFAULT_GROUP_NAME.to_string());
        Self {
            uid: numeric_var(&lookup, ENV_USER_ID, DEFAULT_UID),
            gid: numeric_var(&lookup, ENV_GROUP_ID, DEFAULT_GID),
            user: sanitize_username(&user),
            group: sanitize_groupname(&group),
        }
    }

    /// Capture the identity of the invoking host user.
    ///
    /// Names come from `id -un` / `id -gn` (falling back to `$USER`, then
    /// the documented defaults) and are sanitized so they stay valid
    /// account names on whatever base image the container uses.
    pub fn from_host() -> Self {
        let user = host_name("-un")
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("LOGNAME").ok())
            .unwrap_or_else(|| DEFAULT_USER_NAME.to_string());
        let group = host_name("-gn").unwrap_or_else(|| DEFAULT_GROUP_NAME.to_string());
        Self {
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
            user: sanitize_username(&user),
            group: sanitize_groupname(&group),
        }
    }

    /// The environment variables that forward this identity into a
    /// container, in `(key, value)` form.
    pub fn env_pairs(&self) -> [(&'static str, String); 4] {
        [
            (ENV_USER_ID, self.uid.to_string()),
            (ENV_GROUP_ID, self.gid.to_string()),
            (ENV_USER_NAME, self.user.clone()),
            (ENV_GROUP_NAME, self.group.clone()),
        ]
    }
}

fn numeric_var(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("{key}={raw:?} is not a valid id, using default {default}");
                default
            }
        },
    }
}

fn host_name(flag: &str) -> Option<String> {
    let output = Command::new("id").arg(flag).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if name.is_empty() { None } else { Some(name) }
}

/// Sanitize an arbitrary string into a valid Linux user name.
///
/// Rules (the shadow suite's useradd rejects anything else):
/// - lowercase letters, digits, underscore, hyphen
/// - first character must be a letter or underscore
/// - at most 32 characters, no trailing hyphen
///
/// Total: any input yields a usable name; empty results fall back to
/// [`DEFAULT_USER_NAME`].
pub fn sanitize_username(input: &str) -> String {
    sanitize_account_name(input, DEFAULT_USER_NAME)
}

/// Sanitize an arbitrary string into a valid Linux group name.
/// Same rules as [`sanitize_username`], falling back to
/// [`DEFAULT_GROUP_NAME`].
pub fn sanitize_groupname(input: &str) -> String {
    sanitize_account_name(input, DEFAULT_GROUP_NAME)
}

fn sanitize_account_name(input: &str, fallback: &str) -> String {
    let mut name = String::with_capacity(ACCOUNT_NAME_MAX);

    for c in input.chars() {
        if name.len() >= ACCOUNT_NAME_MAX {
            break;
        }
        let c = c.to_ascii_lowercase();
        if name.is_empty() {
            if c.is_ascii_lowercase() || c == '_' {
                name.push(c);
            } else if c.is_ascii_digit() {
                // A leading digit would be taken for a uid by some tools.
                name.push('_');
                if name.len() < ACCOUNT_NAME_MAX {
                    name.push(c);
                }
            } else {
                name.push('_');
            }
        } else if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
            name.push(c);
        } else {
            name.push('_');
        }
    }

    while name.ends_with('-') {
        name.pop();
    }

    if name.is_empty() {
        name.push_str(fallback);
    }

    name
}

/// Sanitize a GECOS/comment field for useradd.
/// The shadow suite rejects ':' and control characters.
pub fn sanitize_gecos(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| {
            if c == ':' || c == '\n' || c == '\r' || c == '\0' {
                ' '
            } else {
                c
            }
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "denbox user".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn identity_from(pairs: &[(&str, &str)]) -> Identity {
        let map = env(pairs);
        Identity::from_env_with(|key| map.get(key).cloned())
    }

    #[test]
    fn from_env_all_defaults() {
        let identity = identity_from(&[]);
        assert_eq!(identity.uid, 1000);
        assert_eq!(identity.gid, 1000);
        assert_eq!(identity.user, "user");
        assert_eq!(identity.group, "group");
    }

    #[test]
    fn from_env_all_overridden() {
        let identity = identity_from(&[
            ("USER_ID", "1001"),
            ("GROUP_ID", "1002"),
            ("USER_NAME", "alice"),
            ("GROUP_NAME", "staff"),
        ]);
        assert_eq!(identity.uid, 1001);
        assert_eq!(identity.gid, 1002);
        assert_eq!(identity.user, "alice");
        assert_eq!(identity.group, "staff");
    }

    #[test]
    fn from_env_garbage_ids_fall_back() {
        let identity = identity_from(&[("USER_ID", "not-a-number"), ("GROUP_ID", "")]);
        assert_eq!(identity.uid, 1000);
        assert_eq!(identity.gid, 1000);
    }

    #[test]
    fn from_env_sanitizes_names() {
        let identity = identity_from(&[("USER_NAME", "Alice Smith"), ("GROUP_NAME", "Domain Users")]);
        assert_eq!(identity.user, "alice_smith");
        assert_eq!(identity.group, "domain_users");
    }

    #[test]
    fn env_pairs_round_trip() {
        let identity = Identity {
            uid: 1001,
            gid: 1001,
            user: "alice".into(),
            group: "alice".into(),
        };
        let pairs = identity.env_pairs();
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        let round = Identity::from_env_with(|key| map.get(key).cloned());
        assert_eq!(round, identity);
    }

    #[test]
    fn sanitize_simple_names_unchanged() {
        assert_eq!(sanitize_username("alice"), "alice");
        assert_eq!(sanitize_username("bob123"), "bob123");
        assert_eq!(sanitize_username("user_name"), "user_name");
        assert_eq!(sanitize_username("user-name"), "user-name");
    }

    #[test]
    fn sanitize_folds_case() {
        assert_eq!(sanitize_username("Alice"), "alice");
        assert_eq!(sanitize_username("BOB"), "bob");
    }

    #[test]
    fn sanitize_leading_digit_gets_underscore() {
        assert_eq!(sanitize_username("123user"), "_123user");
        assert_eq!(sanitize_username("1"), "_1");
    }

    #[test]
    fn sanitize_replaces_invalid_characters() {
        assert_eq!(sanitize_username("user@domain"), "user_domain");
        assert_eq!(sanitize_username("user.name"), "user_name");
        assert_eq!(sanitize_username("@"), "_");
    }

    #[test]
    fn sanitize_trims_trailing_hyphens() {
        assert_eq!(sanitize_username("user-"), "user");
        assert_eq!(sanitize_username("a-b--"), "a-b");
    }

    #[test]
    fn sanitize_empty_falls_back() {
        assert_eq!(sanitize_username(""), "user");
        assert_eq!(sanitize_groupname(""), "group");
        assert_eq!(sanitize_groupname("---"), "group");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "a".repeat(64);
        assert_eq!(sanitize_username(&long).len(), 32);
    }

    #[test]
    fn gecos_strips_forbidden_characters() {
        assert_eq!(sanitize_gecos("denbox: host\nuser"), "denbox  host user");
        assert_eq!(sanitize_gecos("::"), "denbox user");
        assert_eq!(sanitize_gecos("  padded  "), "padded");
    }
}
