//! Remote selection for fetch-like operations.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::git::Remote;

const DEFAULT_REMOTE: &str = "origin";

static OWNER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[:/](?P<owner>[^/:]+)/(?P<repo>[^/]+?)(?:\.git)?/?$").expect("valid regex")
});

/// Owner segment of a remote URL (`git@github.com:odoo-dev/odoo.git` -> `odoo-dev`)
pub fn remote_owner(url: &str) -> Option<&str> {
    OWNER_RE
        .captures(url.trim())
        .and_then(|caps| caps.name("owner"))
        .map(|m| m.as_str())
}

/// Pick the remote to fetch from.
///
/// A requested fork matches a remote by name first, then by the owner in its
/// URL. Without a fork (or when no remote matches it) the repository's
/// configured default is used, then `origin`.
pub fn resolve_remote(remotes: &[Remote], fork: Option<&str>, default_remote: Option<&str>) -> String {
    if let Some(fork) = fork.map(str::trim).filter(|f| !f.is_empty()) {
        if let Some(remote) = remotes.iter().find(|r| r.name == fork) {
            return remote.name.clone();
        }
        if let Some(remote) = remotes
            .iter()
            .find(|r| remote_owner(&r.fetch_url).is_some_and(|o| o.eq_ignore_ascii_case(fork)))
        {
            return remote.name.clone();
        }
    }

    default_remote
        .filter(|d| remotes.is_empty() || remotes.iter().any(|r| r.name == *d))
        .unwrap_or(DEFAULT_REMOTE)
        .to_string()
}
