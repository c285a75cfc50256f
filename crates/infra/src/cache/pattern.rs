//! `*` wildcard matching for `invalidate_pattern`.

/// Match `key` against `pattern`, where `*` matches any run of characters
/// (including none) and every other character matches itself.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let stars = pattern.matches('*').count();
    match stars {
        0 => return pattern == key,
        1 if pattern.ends_with('*') => return key.starts_with(&pattern[..pattern.len() - 1]),
        1 if pattern.starts_with('*') => return key.ends_with(&pattern[1..]),
        2 if pattern.len() >= 2 && pattern.starts_with('*') && pattern.ends_with('*') => {
            return key.contains(&pattern[1..pattern.len() - 1]);
        }
        _ => {}
    }
    wildcard(pattern.as_bytes(), key.as_bytes())
}

/// Greedy matcher with single-star backtracking
fn wildcard(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some(p);
            p += 1;
            resume = t;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some(s) = star {
            p = s + 1;
            resume += 1;
            t = resume;
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&b| b == b'*')
}
