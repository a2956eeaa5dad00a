//! Route pattern parsing and path normalization.
//!
//! Patterns are `/`-separated. A segment written `{name}` or `:name` is a
//! parameter hole capturing the corresponding request segment verbatim;
//! every other segment must match literally.

use crate::{Error, Result};

/// One parsed pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Must match the request segment exactly.
    Literal(String),
    /// Captures the request segment under the given name.
    Param(String),
}

/// A compiled dynamic route pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
    param_names: Vec<String>,
}

impl Pattern {
    /// Parses a pattern into ordered segments, extracting parameter names.
    ///
    /// Fails on empty parameter names (`{}` or a bare `:`) and duplicate
    /// parameter names within the same pattern.
    pub fn parse(pattern: &str) -> Result<Pattern> {
        let normalized = normalize_path(pattern);
        let mut segments = Vec::new();
        let mut param_names = Vec::new();

        for part in normalized.split('/').filter(|p| !p.is_empty()) {
            let param = if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}'))
            {
                Some(inner)
            } else {
                part.strip_prefix(':')
            };

            match param {
                Some(name) => {
                    if name.is_empty() {
                        return Err(Error::invalid_input(format!(
                            "empty parameter name in pattern {pattern:?}"
                        )));
                    }
                    if param_names.iter().any(|n| n == name) {
                        return Err(Error::invalid_input(format!(
                            "duplicate parameter {name:?} in pattern {pattern:?}"
                        )));
                    }
                    param_names.push(name.to_string());
                    segments.push(Segment::Param(name.to_string()));
                }
                None => segments.push(Segment::Literal(part.to_string())),
            }
        }

        Ok(Pattern {
            raw: normalized,
            segments,
            param_names,
        })
    }

    /// Returns `true` when the pattern contains at least one parameter hole.
    pub fn is_dynamic(&self) -> bool {
        !self.param_names.is_empty()
    }

    /// The normalized pattern text.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Parameter names in positional order.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// Attempts to match the already-split request path segments.
    ///
    /// Requires segment-count equality and literal-segment equality; on a
    /// match, returns the captured values in `param_names()` order.
    pub fn match_segments(&self, path_segments: &[&str]) -> Option<Vec<String>> {
        if path_segments.len() != self.segments.len() {
            return None;
        }

        let mut captures = Vec::with_capacity(self.param_names.len());
        for (segment, part) in self.segments.iter().zip(path_segments) {
            match segment {
                Segment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                Segment::Param(_) => captures.push((*part).to_string()),
            }
        }
        Some(captures)
    }
}

/// Normalizes a request path: collapses doubled slashes, strips the trailing
/// slash (except for the root path) and guarantees a leading slash.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');

    let mut last_was_slash = true;
    for ch in path.chars() {
        if ch == '/' {
            if !last_was_slash {
                out.push('/');
            }
            last_was_slash = true;
        } else {
            out.push(ch);
            last_was_slash = false;
        }
    }

    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Splits a normalized path into its non-empty segments.
pub fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|p| !p.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/a/b"), "/a/b");
        assert_eq!(normalize_path("/a/b/"), "/a/b");
        assert_eq!(normalize_path("a/b"), "/a/b");
        assert_eq!(normalize_path("//a//b//"), "/a/b");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("///"), "/");
    }

    #[test]
    fn test_parse_literal_pattern() {
        let pattern = Pattern::parse("/users/list").unwrap();
        assert!(!pattern.is_dynamic());
        assert_eq!(pattern.raw(), "/users/list");
        assert!(pattern.param_names().is_empty());
    }

    #[test]
    fn test_parse_braced_params() {
        let pattern = Pattern::parse("/users/{id}/posts/{post_id}").unwrap();
        assert!(pattern.is_dynamic());
        assert_eq!(pattern.param_names(), ["id", "post_id"]);
    }

    #[test]
    fn test_parse_colon_params() {
        let pattern = Pattern::parse("/users/:id").unwrap();
        assert!(pattern.is_dynamic());
        assert_eq!(pattern.param_names(), ["id"]);
    }

    #[test]
    fn test_parse_mixed_styles() {
        let pattern = Pattern::parse("/a/{x}/b/:y").unwrap();
        assert_eq!(pattern.param_names(), ["x", "y"]);
    }

    #[test]
    fn test_parse_rejects_empty_param() {
        assert!(Pattern::parse("/users/{}").is_err());
        assert!(Pattern::parse("/users/:").is_err());
    }

    #[test]
    fn test_parse_rejects_duplicate_param() {
        assert!(Pattern::parse("/a/{id}/b/{id}").is_err());
    }

    #[test]
    fn test_match_segments_literal_mismatch() {
        let pattern = Pattern::parse("/users/{id}").unwrap();
        assert!(pattern.match_segments(&["posts", "42"]).is_none());
    }

    #[test]
    fn test_match_segments_count_mismatch() {
        let pattern = Pattern::parse("/users/{id}").unwrap();
        assert!(pattern.match_segments(&["users"]).is_none());
        assert!(pattern.match_segments(&["users", "42", "extra"]).is_none());
    }

    #[test]
    fn test_match_segments_captures_in_order() {
        let pattern = Pattern::parse("/users/{id}/posts/{post_id}").unwrap();
        let captures = pattern
            .match_segments(&["users", "42", "posts", "7"])
            .unwrap();
        assert_eq!(captures, ["42", "7"]);
    }

    #[test]
    fn test_param_captures_verbatim() {
        let pattern = Pattern::parse("/files/:name").unwrap();
        let captures = pattern.match_segments(&["files", "report%202024.pdf"]).unwrap();
        assert_eq!(captures, ["report%202024.pdf"]);
    }
}
