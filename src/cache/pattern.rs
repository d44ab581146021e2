//! Glob matching for pattern invalidation

/// Glob pattern matching for cache keys.
///
/// `*` matches any run of characters (including none) and `?` matches exactly
/// one character. Everything else matches literally. The pattern is anchored
/// at both ends, so `course:id=1*` matches `course:id=1` and `course:id=12`
/// but not `x:course:id=1`.
pub fn glob_match(pattern: &str, input: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if !pattern.contains(['*', '?']) {
        return pattern == input;
    }

    if let Some(prefix) = pattern.strip_suffix('*') {
        if !prefix.contains(['*', '?']) {
            return input.starts_with(prefix);
        }
    }

    let pattern: Vec<char> = pattern.chars().collect();
    let input: Vec<char> = input.chars().collect();

    let (mut p, mut i) = (0usize, 0usize);
    // Position of the last `*` seen and the input index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while i < input.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == input[i]) {
            p += 1;
            i += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, i));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            // Let the last `*` swallow one more character
            p = star + 1;
            i = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}
