use semver::Version;

/// Returns `true` when `available` is strictly newer than `current`.
///
/// Tags may carry a leading `v` and omit trailing components (`1.2` is
/// `1.2.0`). A pre-release sorts before the release of the same numbers.
/// Anything that does not parse is treated as "not newer".
pub fn is_newer(current: &str, available: &str) -> bool {
    match (parse_lenient(current), parse_lenient(available)) {
        (Some(cur), Some(avail)) => avail > cur,
        _ => {
            tracing::warn!(current, available, "cannot compare versions, assuming not newer");
            false
        }
    }
}

/// Strip the tag decoration GitHub releases usually carry.
pub fn normalize_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag)
}

fn parse_lenient(raw: &str) -> Option<Version> {
    let text = normalize_tag(raw);
    if let Ok(v) = Version::parse(text) {
        return Some(v);
    }

    let split_at = text.find(['-', '+']).unwrap_or(text.len());
    let (core, rest) = text.split_at(split_at);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(rest);
    Version::parse(&padded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_bump_is_newer() {
        assert!(is_newer("1.0.0", "1.0.1"));
    }

    #[test]
    fn lower_minor_is_not_newer() {
        assert!(!is_newer("1.1.0", "1.0.9"));
    }

    #[test]
    fn lower_major_is_not_newer() {
        assert!(!is_newer("2.0.0", "1.9.9"));
    }

    #[test]
    fn release_is_newer_than_its_prerelease() {
        assert!(is_newer("1.0.0-beta", "1.0.0"));
        assert!(!is_newer("1.0.0", "1.0.0-beta"));
    }

    #[test]
    fn components_compare_numerically() {
        assert!(is_newer("1.9.0", "1.10.0"));
    }

    #[test]
    fn equal_versions_are_not_newer() {
        assert!(!is_newer("1.1.0", "1.1.0"));
        assert!(!is_newer("1.1.0", "v1.1.0"));
    }

    #[test]
    fn short_versions_are_padded() {
        assert!(is_newer("1.2", "1.2.1"));
        assert!(!is_newer("1.2.0", "1.2"));
        assert!(is_newer("1.2-rc1", "1.2"));
    }

    #[test]
    fn garbage_is_not_newer() {
        assert!(!is_newer("1.0.0", "latest"));
        assert!(!is_newer("not-a-version", "1.0.0"));
        assert!(!is_newer("1.0.0", "1..2"));
        assert!(!is_newer("1.0.0", "1.2.3.4"));
    }

    #[test]
    fn normalize_strips_v_prefix_and_whitespace() {
        assert_eq!(normalize_tag("v1.2.0"), "1.2.0");
        assert_eq!(normalize_tag(" V2.0.0 "), "2.0.0");
        assert_eq!(normalize_tag("1.2.0"), "1.2.0");
    }
}
