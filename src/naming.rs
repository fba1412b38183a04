//! Branch naming rules.
//!
//! Base branches are long-lived integration lines (`16.0`, `master`,
//! `saas-17.4`). Development branches are `<base><sep><suffix>` where the
//! separator is `-` or `_`. Everything here is pure and infallible; a name
//! that cannot be derived simply yields an empty base.

use once_cell::sync::Lazy;
use regex::Regex;

/// Two-digit major with `.0`, the literal `master`, or `saas-NN.N`.
const BASE_SHAPES: &str = r"(?:\d{2}\.0|master|saas-\d{2}\.\d)";

static BASE_BRANCH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^{BASE_SHAPES}$")).expect("valid base branch regex"));

static DEV_BRANCH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^{BASE_SHAPES}[-_]")).expect("valid dev branch regex"));

/// Leading `saas-NN.N` segment whose own dash is not a derivation separator.
static SAAS_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^saas-\d{2}\.\d").expect("valid saas prefix regex"));

const SEPARATORS: [char; 2] = ['-', '_'];

/// Infer the base branch a development branch was derived from.
///
/// Returns an empty string when `name` carries no derivation suffix, which
/// is exactly what makes it a base branch (see [`is_base_branch`]).
///
/// ```
/// use branchctl::naming::infer_base;
/// assert_eq!(infer_base("saas-16.3-foo-bar"), "saas-16.3");
/// assert_eq!(infer_base("17.0_foo"), "17.0");
/// assert_eq!(infer_base("master"), "");
/// ```
pub fn infer_base(name: &str) -> String {
    let start = SAAS_PREFIX_RE.find(name).map_or(0, |m| m.end());

    match name[start..].find(SEPARATORS) {
        Some(offset) => name[..start + offset].to_string(),
        None => String::new(),
    }
}

/// True iff `name` has no derivation suffix.
pub fn is_base_branch(name: &str) -> bool {
    infer_base(name).is_empty()
}

/// The base a name belongs to: itself for a base branch, else its inferred base.
pub fn base_of(name: &str) -> String {
    let base = infer_base(name);
    if base.is_empty() {
        name.to_string()
    } else {
        base
    }
}

/// Whether `name` has one of the recognized base-branch shapes.
pub fn matches_base_pattern(name: &str) -> bool {
    BASE_BRANCH_RE.is_match(name)
}

/// Whether `name` starts with a recognized base shape followed by a separator.
pub fn matches_dev_pattern(name: &str) -> bool {
    DEV_BRANCH_RE.is_match(name)
}
