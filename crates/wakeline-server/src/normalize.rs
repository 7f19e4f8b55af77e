/// Collapses contiguous repeats of any routing prefix segment (`/api/api/x` becomes `/api/x`).
/// Returns `None` when the path is already canonical. Matching is literal and case-sensitive.
pub fn normalize_path(path: &str, prefixes: &[String]) -> Option<String> {
    let mut out: Vec<&str> = Vec::new();
    let mut changed = false;
    for segment in path.split('/') {
        let repeats_prefix = !segment.is_empty()
            && out.last() == Some(&segment)
            && prefixes.iter().any(|p| p == segment);
        if repeats_prefix {
            changed = true;
            continue;
        }
        out.push(segment);
    }
    changed.then(|| out.join("/"))
}

/// Canonical form of `path`; applying it twice gives the same result as once.
pub fn canonical_path(path: &str, prefixes: &[String]) -> String {
    normalize_path(path, prefixes).unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> Vec<String> {
        vec!["api".to_string()]
    }

    #[test]
    fn duplicated_prefix_collapses() {
        assert_eq!(
            normalize_path("/api/api/test/types", &api()).as_deref(),
            Some("/api/test/types")
        );
        assert_eq!(
            normalize_path("/api/api/api/auth/login", &api()).as_deref(),
            Some("/api/auth/login")
        );
    }

    #[test]
    fn canonical_paths_are_left_alone() {
        assert_eq!(normalize_path("/api/test/types", &api()), None);
        assert_eq!(normalize_path("/", &api()), None);
        // repeats that are not routing prefixes, or not contiguous, are content
        assert_eq!(normalize_path("/api/test/test", &api()), None);
        assert_eq!(normalize_path("/api/x/api", &api()), None);
        assert_eq!(normalize_path("/api/API/x", &api()), None);
    }

    #[test]
    fn normalizing_is_idempotent() {
        for path in ["/api/api/test/types", "/api/api/", "/v1/v1/api/api/x", "/plain"] {
            let prefixes = vec!["api".to_string(), "v1".to_string()];
            let once = canonical_path(path, &prefixes);
            assert_eq!(canonical_path(&once, &prefixes), once, "{path}");
        }
        assert_eq!(
            canonical_path("/v1/v1/api/api/x", &["api".to_string(), "v1".to_string()]),
            "/v1/api/x"
        );
    }
}
