//! Ant-style path patterns
//!
//! - `?` matches exactly one character within a segment
//! - `*` matches zero or more characters within a segment
//! - `**` matches zero or more whole segments
//!
//! A pattern ending in `/**` also matches its bare prefix, so `/app/**`
//! matches `/app` as well as `/app/x/y`.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AntPattern {
    raw: String,
    segments: Vec<String>,
}

impl AntPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let segments = split_segments(&raw).map(str::to_string).collect();
        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a request path against this pattern
    pub fn matches(&self, path: &str) -> bool {
        let path_segments: Vec<&str> = split_segments(path).collect();
        let pattern_segments: Vec<&str> = self.segments.iter().map(String::as_str).collect();
        match_segments(&pattern_segments, &path_segments)
    }
}

impl fmt::Display for AntPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => {
            // Collapse consecutive ** and try every split point
            (0..=path.len()).any(|skip| match_segments(rest, &path[skip..]))
        }
        Some((segment, rest)) => match path.split_first() {
            Some((candidate, path_rest)) => {
                match_segment(segment.as_bytes(), candidate.as_bytes())
                    && match_segments(rest, path_rest)
            }
            None => false,
        },
    }
}

/// Wildcard match within a single segment (`*` and `?`)
fn match_segment(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_star_matches_any_depth() {
        let pattern = AntPattern::new("/camunda/app/**");
        assert!(pattern.matches("/camunda/app"));
        assert!(pattern.matches("/camunda/app/"));
        assert!(pattern.matches("/camunda/app/cockpit/default/"));
        assert!(pattern.matches("/camunda/app/a/b/c/d"));
        assert!(!pattern.matches("/camunda/apps"));
        assert!(!pattern.matches("/camunda/api/engine"));
        assert!(!pattern.matches("/other/camunda/app"));
    }

    #[test]
    fn test_double_star_in_the_middle() {
        let pattern = AntPattern::new("/camunda/app/**/logout");
        assert!(pattern.matches("/camunda/app/logout"));
        assert!(pattern.matches("/camunda/app/x/logout"));
        assert!(pattern.matches("/camunda/app/cockpit/default/logout"));
        assert!(!pattern.matches("/camunda/app/x/logout/more"));
        assert!(!pattern.matches("/camunda/app/x/signout"));
        assert!(!pattern.matches("/camunda/api/logout"));
    }

    #[test]
    fn test_single_star_stays_within_segment() {
        let pattern = AntPattern::new("/camunda/app/*");
        assert!(pattern.matches("/camunda/app/cockpit"));
        assert!(!pattern.matches("/camunda/app/cockpit/default"));

        let pattern = AntPattern::new("/lib/*.js");
        assert!(pattern.matches("/lib/require.js"));
        assert!(pattern.matches("/lib/.js"));
        assert!(!pattern.matches("/lib/require.css"));
    }

    #[test]
    fn test_question_mark() {
        let pattern = AntPattern::new("/v?/items");
        assert!(pattern.matches("/v1/items"));
        assert!(!pattern.matches("/v10/items"));
        assert!(!pattern.matches("/v/items"));
    }

    #[test]
    fn test_trailing_double_star_root() {
        let pattern = AntPattern::new("/engine-rest/**");
        assert!(pattern.matches("/engine-rest"));
        assert!(pattern.matches("/engine-rest/process-definition/key/x/start"));
        assert!(!pattern.matches("/engine-restx"));
    }

    #[test]
    fn test_star_backtracking() {
        assert!(match_segment(b"a*b*c", b"aXXbYYc"));
        assert!(match_segment(b"*c", b"abcbc"));
        assert!(!match_segment(b"a*b", b"aXXc"));
        assert!(match_segment(b"**", b""));
    }

    #[test]
    fn test_display_returns_raw_pattern() {
        assert_eq!(AntPattern::new("/x/**").to_string(), "/x/**");
    }
}
