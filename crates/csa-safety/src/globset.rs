use glob::Pattern;

/// Matches `path` against a single glob pattern. Invalid patterns never
/// match (and never panic) rather than rejecting everything or everything
/// through — a misconfigured glob should fail closed for `deny` and fail
/// open for `allow` is handled by the caller, not here.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches(path),
        Err(_) => false,
    }
}
