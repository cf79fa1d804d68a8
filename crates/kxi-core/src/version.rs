//! Version compatibility gating between the platform chart and its operator
//!
//! Every function here is pure. They run before any cluster mutation, so a
//! rejected combination never leaves partial state behind.

use std::cmp::Ordering;

use semver::Version;

use crate::error::{CoreError, Result};

/// Parse a full semantic version
pub fn parse_version(version: &str) -> Result<Version> {
    Version::parse(version.trim().trim_start_matches('v')).map_err(|source| {
        CoreError::InvalidVersion {
            version: version.to_string(),
            source,
        }
    })
}

/// Extract `(major, minor)`, ignoring patch and any pre-release suffix
pub fn parse_minor(version: &str) -> Result<(u64, u64)> {
    let invalid = || CoreError::Version(format!("Invalid version '{}'", version));

    let core = version.trim().trim_start_matches('v');
    let mut parts = core.split(['.', '-', '+']);
    let major = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(invalid)?;
    let minor = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(invalid)?;
    Ok((major, minor))
}

/// `major.minor` string, as passed to `helm search repo --version`
pub fn minor_version(version: &str) -> Result<String> {
    let (major, minor) = parse_minor(version)?;
    Ok(format!("{}.{}", major, minor))
}

/// True when both versions share major and minor
pub fn is_minor_compatible(a: &str, b: &str) -> bool {
    match (parse_minor(a), parse_minor(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Pick the operator version to install alongside `platform_version`
///
/// Only minor-compatible candidates are considered. A candidate equal to the
/// platform version wins outright; otherwise the greatest by semver precedence
/// is chosen, with pre-releases below their release. Among candidates of equal
/// precedence, `installed` is preferred when it is one of them.
pub fn select_matching_operator_version(
    platform_version: &str,
    candidates: &[String],
    installed: Option<&str>,
) -> Option<String> {
    let platform = parse_version(platform_version).ok();

    let compatible: Vec<(Version, &String)> = candidates
        .iter()
        .filter(|c| is_minor_compatible(platform_version, c))
        .filter_map(|c| parse_version(c).ok().map(|v| (v, c)))
        .collect();

    if let Some(platform) = &platform {
        if let Some((_, exact)) = compatible.iter().find(|(v, _)| v == platform) {
            return Some((*exact).clone());
        }
    }

    let installed = installed.and_then(|i| parse_version(i).ok());

    compatible
        .iter()
        .max_by(|(a, _), (b, _)| {
            a.cmp_precedence(b).then_with(|| match &installed {
                Some(i) if a == i => Ordering::Greater,
                Some(i) if b == i => Ordering::Less,
                _ => Ordering::Equal,
            })
        })
        .map(|(_, c)| (*c).clone())
}

/// Reject a target that sorts below the currently installed version
///
/// Equal versions pass so a reinstall of the same version is allowed.
pub fn check_upgrade_version(current: &str, target: &str) -> Result<()> {
    let current_v = parse_version(current)?;
    let target_v = parse_version(target)?;

    if target_v.cmp_precedence(&current_v) == Ordering::Less {
        return Err(CoreError::Version(format!(
            "Cannot upgrade from version {} to version {}. Target version must be higher than currently installed version.",
            current, target
        )));
    }
    Ok(())
}

/// Rollback targets for the platform and operator must share a minor version
pub fn check_rollback_minor_match(insights_target: &str, operator_target: &str) -> Result<()> {
    if parse_minor(insights_target)? != parse_minor(operator_target)? {
        return Err(CoreError::Version(format!(
            "Insights rollback target version {} is incompatible with target operator version {}. Minor versions must match.",
            insights_target, operator_target
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_minor() {
        let cases = [
            ("1.6.0", (1, 6)),
            ("1.6.1-rc.1", (1, 6)),
            ("1.6.1-rc.1-mr-x", (1, 6)),
            ("10.12", (10, 12)),
            ("v2.0.3", (2, 0)),
            ("1.2-rc.1", (1, 2)),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_minor(input).unwrap(), expected, "{}", input);
        }
    }

    #[test]
    fn test_parse_minor_invalid() {
        for input in ["", "1", "a.b.c", "1.x.0"] {
            assert!(parse_minor(input).is_err(), "{}", input);
        }
    }

    #[test]
    fn test_minor_version() {
        assert_eq!(minor_version("1.4.2-rc.3").unwrap(), "1.4");
    }

    #[test]
    fn test_is_minor_compatible() {
        let cases = [
            ("1.6.0", "1.6.9", true),
            ("1.6.0", "1.6.1-rc.1", true),
            ("1.6.0-rc.2", "1.6.0", true),
            ("1.6.0", "1.7.0", false),
            ("1.6.0", "2.6.0", false),
            ("1.6.0", "garbage", false),
        ];
        for (a, b, expected) in cases {
            assert_eq!(is_minor_compatible(a, b), expected, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_select_exact_release() {
        let candidates = strings(&["1.6.0", "1.6.1-rc.1-mr-x", "1.6.1-rc.1", "1.6.1"]);
        assert_eq!(
            select_matching_operator_version("1.6.0", &candidates, None).as_deref(),
            Some("1.6.0")
        );
    }

    #[test]
    fn test_select_release_above_release_candidates() {
        let candidates = strings(&[
            "1.6.0",
            "1.6.1-rc.1-mr-x",
            "1.6.1-rc.1",
            "1.6.1",
            "1.6.1-rc.2-mr-x",
        ]);
        assert_eq!(
            select_matching_operator_version("1.6.0-rc.2", &candidates, None).as_deref(),
            Some("1.6.1")
        );
    }

    #[test]
    fn test_select_greatest_prerelease_when_no_release() {
        let candidates = strings(&["1.6.1-rc.1", "1.6.1-rc.2", "1.5.9", "1.7.0"]);
        assert_eq!(
            select_matching_operator_version("1.6.0", &candidates, None).as_deref(),
            Some("1.6.1-rc.2")
        );
    }

    #[test]
    fn test_select_ignores_other_minors() {
        let candidates = strings(&["1.5.0", "1.7.0", "2.6.0"]);
        assert_eq!(select_matching_operator_version("1.6.0", &candidates, None), None);
        assert_eq!(select_matching_operator_version("1.6.0", &[], None), None);
    }

    #[test]
    fn test_select_prefers_installed_on_tie() {
        let candidates = strings(&["1.6.2+build.1", "1.6.2+build.2", "1.6.1"]);
        assert_eq!(
            select_matching_operator_version("1.6.0", &candidates, Some("1.6.2+build.1"))
                .as_deref(),
            Some("1.6.2+build.1")
        );
        // Installed but lower precedence does not win
        assert_eq!(
            select_matching_operator_version("1.6.0", &candidates, Some("1.6.1")).as_deref(),
            Some("1.6.2+build.2")
        );
    }

    #[test]
    fn test_check_upgrade_version_table() {
        let cases = [
            ("1.0.0", "1.0.0", true),
            ("1.0.0", "1.0.1", true),
            ("1.0.0", "1.1.0", true),
            ("1.2.1", "1.0.0", false),
            ("1.0.0", "0.9.9", false),
            ("1.0.0-rc.1", "1.0.0", true),
            ("1.0.0", "1.0.0-rc.1", false),
            ("1.0.0-rc.2", "1.0.0-rc.1", false),
            ("1.0.0-rc.1", "1.0.0-rc.2", true),
            ("1.0.0-rc.1", "1.0.0-rc.1", true),
        ];
        for (current, target, ok) in cases {
            assert_eq!(
                check_upgrade_version(current, target).is_ok(),
                ok,
                "{} -> {}",
                current,
                target
            );
        }
    }

    #[test]
    fn test_check_upgrade_version_message() {
        let err = check_upgrade_version("1.2.1", "1.0.0").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot upgrade from version 1.2.1 to version 1.0.0. Target version must be higher than currently installed version."
        );
    }

    #[test]
    fn test_check_upgrade_version_invalid() {
        assert!(matches!(
            check_upgrade_version("1.0", "1.1.0"),
            Err(CoreError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn test_check_rollback_minor_match() {
        assert!(check_rollback_minor_match("1.2.3", "1.2.0").is_ok());
        assert!(check_rollback_minor_match("1.2.3-rc.1", "1.2.9").is_ok());

        let err = check_rollback_minor_match("1.2.3", "1.4.0").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Insights rollback target version 1.2.3 is incompatible with target operator version 1.4.0. Minor versions must match."
        );
    }
}
