//! Version selection over tag lists.

use semver::Version;

/// Parse a tag as a clean `v`-prefixed semver version.
///
/// Pre-release and build-metadata suffixes are excluded: `v1.2.3-rc.1`
/// is a valid tag but never a "latest" candidate.
pub fn clean_semver(tag: &str) -> Option<Version> {
    let version = Version::parse(tag.strip_prefix('v')?).ok()?;
    if version.pre.is_empty() && version.build.is_empty() {
        Some(version)
    } else {
        None
    }
}

/// The highest clean semver tag in `tags`, by semver ordering.
pub fn highest_clean_semver_tag(tags: &[String]) -> Option<String> {
    tags.iter()
        .filter_map(|tag| clean_semver(tag).map(|version| (version, tag)))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, tag)| tag.clone())
}

/// Pick the version string to record for a checkout.
///
/// Precedence: clean `v`-semver tags at HEAD in decreasing semver order,
/// then remaining tags in reverse lexicographic order, then the full
/// HEAD SHA. Branch names are never recorded.
pub fn best_version_at_head(tags_at_head: &[String], head_sha: &str) -> String {
    if let Some(tag) = highest_clean_semver_tag(tags_at_head) {
        return tag;
    }
    if let Some(tag) = tags_at_head.iter().max() {
        return tag.clone();
    }
    head_sha.to_string()
}
