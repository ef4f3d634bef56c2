//! Key validation and segment-bounded prefix matching

use crate::{BlobstoreError, Result};

/// Validate a blob key.
///
/// Keys are `/`-separated, relative, and contain no empty, `.` or `..`
/// segments. The same rules keep filesystem backends inside their root.
pub fn validate_key(key: &str) -> Result<()> {
    let invalid = |reason| {
        Err(BlobstoreError::InvalidKey {
            key: key.to_string(),
            reason,
        })
    };

    if key.is_empty() {
        return invalid("key is empty");
    }
    if key.starts_with('/') {
        return invalid("key must be relative");
    }
    if key.contains('\0') {
        return invalid("key contains a NUL byte");
    }
    for segment in key.split('/') {
        match segment {
            "" => return invalid("key contains an empty segment"),
            "." | ".." => return invalid("key contains a relative segment"),
            _ => {}
        }
    }
    Ok(())
}

/// Validate a prefix and return it without its trailing `/`.
///
/// The empty prefix is valid and matches every key.
pub fn normalize_prefix(prefix: &str) -> Result<&str> {
    let trimmed = prefix.strip_suffix('/').unwrap_or(prefix);
    if trimmed.is_empty() {
        return Ok("");
    }
    validate_key(trimmed)?;
    Ok(trimmed)
}

/// Whether `key` lies under the normalized `prefix`.
///
/// Matching stops at segment boundaries: `"dir"` matches `"dir"` and
/// `"dir/one"` but never `"dirty/x"`.
pub fn matches_prefix(key: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match key.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("packages/myguid")]
    #[case("one")]
    #[case("droplets/guid/sha256-digest")]
    #[case("app.tgz")]
    fn test_valid_keys(#[case] key: &str) {
        assert!(validate_key(key).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("/etc/passwd")]
    #[case("dir//one")]
    #[case("dir/../escape")]
    #[case("./one")]
    #[case("trailing/")]
    fn test_invalid_keys(#[case] key: &str) {
        assert!(matches!(
            validate_key(key),
            Err(BlobstoreError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("").unwrap(), "");
        assert_eq!(normalize_prefix("/").unwrap(), "");
        assert_eq!(normalize_prefix("dir").unwrap(), "dir");
        assert_eq!(normalize_prefix("dir/").unwrap(), "dir");
        assert!(normalize_prefix("../dir").is_err());
    }

    #[rstest]
    #[case("dir/one", "dir", true)]
    #[case("dir", "dir", true)]
    #[case("dir/sub/two", "dir/sub", true)]
    #[case("dirty/x", "dir", false)]
    #[case("dir2", "dir", false)]
    #[case("other/dir/one", "dir", false)]
    #[case("anything", "", true)]
    fn test_matches_prefix(#[case] key: &str, #[case] prefix: &str, #[case] expected: bool) {
        assert_eq!(matches_prefix(key, prefix), expected);
    }

    proptest! {
        #[test]
        fn prop_children_always_match(parent in "[a-z]{1,8}", child in "[a-z0-9]{1,8}") {
            let key = format!("{}/{}", parent, child);
            prop_assert!(matches_prefix(&key, &parent));
        }

        #[test]
        fn prop_sibling_with_longer_name_never_matches(parent in "[a-z]{1,8}", tail in "[a-z]{1,4}", child in "[a-z]{1,8}") {
            let key = format!("{}{}/{}", parent, tail, child);
            prop_assert!(!matches_prefix(&key, &parent));
        }
    }
}
