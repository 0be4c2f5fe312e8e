// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Version comparison module
//!
//! Versions are compared as normalized strings, not by semver ordering: any
//! difference between the running version and the published tag counts as an
//! available update, including a textual downgrade.

/// Version reported by builds made outside the release pipeline.
pub const DEV_VERSION: &str = "dev";

/// Strip a single leading `v`/`V` and surrounding whitespace.
pub fn normalize(version: &str) -> &str {
    let version = version.trim();
    version.strip_prefix(['v', 'V']).unwrap_or(version)
}

/// True for the development sentinel and for strings that do not look like a
/// release version at all (empty, or not starting with a digit).
pub fn is_development(version: &str) -> bool {
    let version = normalize(version);
    if version.eq_ignore_ascii_case(DEV_VERSION) || version.eq_ignore_ascii_case("development") {
        return true;
    }
    !version.starts_with(|c: char| c.is_ascii_digit())
}

/// Returns true when `latest` should replace `current`.
pub fn needs_update(current: &str, latest: &str) -> bool {
    if is_development(current) {
        return true;
    }
    normalize(current) != normalize(latest)
}
