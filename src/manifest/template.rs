//! `{version}`, `{os}` and `{arch}` placeholders in download URLs.

use super::{Platform, VersionSpec};

/// Placeholders a download URL may contain.
pub const PLACEHOLDERS: [&str; 3] = ["version", "os", "arch"];

/// Names of all `{...}` placeholders in `template`, in order of appearance.
///
/// Fails on an unterminated `{` or a stray `}`.
pub fn placeholders(template: &str) -> Result<Vec<&str>, String> {
    let mut names = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find(['{', '}']) {
        if rest[open..].starts_with('}') {
            return Err(format!("unmatched '}}' in URL template '{}'", template));
        }
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| format!("unterminated '{{' in URL template '{}'", template))?;
        names.push(&after[..close]);
        rest = &after[close + 1..];
    }

    Ok(names)
}

/// Substitute placeholders for a concrete platform and version.
///
/// Templates are validated at load time, so unknown placeholders never reach
/// this point.
pub fn expand(template: &str, version: &VersionSpec, platform: &Platform) -> String {
    template
        .replace("{version}", &version.to_string())
        .replace("{os}", platform.os())
        .replace("{arch}", platform.arch())
}
