//! Repository pattern matching for access-control rules.
//!
//! # Responsibilities
//! - Match a repository name against a configured pattern
//! - Pick the most specific pattern when several match
//!
//! # Design Decisions
//! - Patterns are matched per `/`-separated component
//! - `*` matches exactly one component, `**` matches zero or more
//! - Matching is case-sensitive
//! - No regex to guarantee O(n) matching

/// A compiled repository pattern such as `team/*` or `mirror/**`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
    AnyDepth,
}

impl RepoPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s {
                "*" => Segment::Any,
                "**" => Segment::AnyDepth,
                literal => Segment::Literal(literal.to_string()),
            })
            .collect();
        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Higher is more specific. Literal components weigh more than wildcards.
    pub fn specificity(&self) -> usize {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(_) => 4,
                Segment::Any => 2,
                Segment::AnyDepth => 1,
            })
            .sum()
    }

    pub fn matches(&self, repo: &str) -> bool {
        let parts: Vec<&str> = repo.split('/').filter(|s| !s.is_empty()).collect();
        match_segments(&self.segments, &parts)
    }
}

fn match_segments(pattern: &[Segment], parts: &[&str]) -> bool {
    match pattern.split_first() {
        None => parts.is_empty(),
        Some((Segment::AnyDepth, rest)) => (0..=parts.len()).any(|skip| match_segments(rest, &parts[skip..])),
        Some((segment, rest)) => match parts.split_first() {
            Some((part, remaining)) => {
                let ok = match segment {
                    Segment::Literal(l) => l == part,
                    _ => true,
                };
                ok && match_segments(rest, remaining)
            }
            None => false,
        },
    }
}

/// The most specific pattern in `patterns` that matches `repo`.
pub fn best_match<'a, I>(patterns: I, repo: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    patterns
        .into_iter()
        .map(|p| (p, RepoPattern::new(p.as_str())))
        .filter(|(_, compiled)| compiled.matches(repo))
        .max_by_key(|(_, compiled)| compiled.specificity())
        .map(|(raw, _)| raw.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern() {
        let pattern = RepoPattern::new("library/alpine");
        assert!(pattern.matches("library/alpine"));
        assert!(!pattern.matches("library/Alpine"));
        assert!(!pattern.matches("library/alpine/extra"));
    }

    #[test]
    fn test_single_component_wildcard() {
        let pattern = RepoPattern::new("team/*");
        assert!(pattern.matches("team/app"));
        assert!(!pattern.matches("team"));
        assert!(!pattern.matches("team/app/nested"));
    }

    #[test]
    fn test_any_depth_wildcard() {
        let pattern = RepoPattern::new("mirror/**");
        assert!(pattern.matches("mirror"));
        assert!(pattern.matches("mirror/a/b/c"));
        assert!(!pattern.matches("other/a"));

        assert!(RepoPattern::new("**").matches("anything/at/all"));
    }

    #[test]
    fn test_most_specific_wins() {
        let patterns = vec!["**".to_string(), "team/**".to_string(), "team/app".to_string()];
        assert_eq!(best_match(&patterns, "team/app"), Some("team/app"));
        assert_eq!(best_match(&patterns, "team/other"), Some("team/**"));
        assert_eq!(best_match(&patterns, "elsewhere"), Some("**"));
        assert_eq!(best_match(&patterns[1..], "elsewhere"), None);
    }
}
