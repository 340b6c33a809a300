//! Lenient semantic-version helpers for plugin declarations

use semver::{Version, VersionReq};

const OPERATORS: [&str; 7] = ["=", ">", ">=", "<", "<=", "~", "^"];

/// Parse a declared version, tolerating `v` prefixes and missing components
///
/// `"1.2"` becomes `1.2.0`, `"v3"` becomes `3.0.0`.
#[must_use]
pub fn parse_lenient(raw: &str) -> Option<Version> {
    let raw = raw.trim().trim_start_matches(['v', 'V']);
    if let Ok(version) = Version::parse(raw) {
        return Some(version);
    }

    let (core, suffix) = raw.find(['-', '+']).map_or((raw, ""), |i| raw.split_at(i));
    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.len() > 3
        || parts
            .iter()
            .any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }
    while parts.len() < 3 {
        parts.push("0");
    }

    Version::parse(&format!("{}{suffix}", parts.join("."))).ok()
}

/// Check a compatibility range against the host version
///
/// Accepts comma- or whitespace-separated comparators and `||` alternatives.
/// A bare version reads the npm way: `1.2.3` matches exactly `1.2.3` and a
/// partial `1.2` matches any `1.2.x`, not the Cargo caret range. A range that
/// cannot be parsed is never satisfied.
#[must_use]
pub fn satisfies(range: &str, host: &Version) -> bool {
    range
        .split("||")
        .filter_map(|alt| normalize_comparators(alt))
        .filter_map(|req| VersionReq::parse(&req).ok())
        .any(|req| req.matches(host))
}

/// Whether `incoming` is strictly older than `installed`
///
/// Unparseable versions never count as older.
#[must_use]
pub fn is_older(installed: Option<&str>, incoming: Option<&str>) -> bool {
    match (
        installed.and_then(parse_lenient),
        incoming.and_then(parse_lenient),
    ) {
        (Some(installed), Some(incoming)) => incoming < installed,
        _ => false,
    }
}

fn normalize_comparators(alt: &str) -> Option<String> {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op: Option<&str> = None;

    for token in alt.split([',', ' ', '\t']).filter(|t| !t.is_empty()) {
        if OPERATORS.contains(&token) {
            pending_op = Some(token);
            continue;
        }
        let token = match pending_op.take() {
            Some(op) => format!("{op}{token}"),
            None if is_bare_version(token) => format!("={token}"),
            None => token.to_string(),
        };
        comparators.push(token);
    }

    if pending_op.is_some() {
        return None;
    }
    if comparators.is_empty() {
        return Some("*".to_string());
    }
    Some(comparators.join(", "))
}

/// A plain version with no operator and no wildcard
fn is_bare_version(token: &str) -> bool {
    token.starts_with(|c: char| c.is_ascii_digit()) && !token.contains(['x', 'X', '*'])
}
