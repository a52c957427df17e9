//! Path normalization and include/exclude glob matching.
//!
//! # Responsibility
//! - Normalize locations to one `/`-separated form (`.`/`..` collapsed).
//! - Compile include/exclude glob sets anchored at a base path.
//!
//! # Invariants
//! - Excess `..` segments are an error on absolute paths and are clamped on
//!   relative paths.
//! - Filesystem locations that identify archives go through
//!   `absolute_location`, so the clamp never applies to them.
//! - A path matches a `PathMatcher` iff it matches at least one include and
//!   no exclude.

use regex::Regex;
use std::path::Path;
use thiserror::Error;

pub type PathResult<T> = Result<T, PathError>;

#[derive(Debug, Clone, Error)]
pub enum PathError {
    #[error("path `{0}` climbs above its root")]
    ExcessParentSegments(String),
    #[error("invalid glob pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("cannot resolve `{path}` against the working directory: {reason}")]
    Unresolvable { path: String, reason: String },
}

/// Normalizes a path string.
///
/// Both `/` and `\` are accepted as separators; empty and `.` segments are
/// dropped and `..` removes the previous segment. Drive prefixes (`C:`) are
/// kept and mark the path as absolute.
///
/// # Errors
/// - `ExcessParentSegments` when an absolute path has more `..` segments
///   than names to remove.
pub fn normalize(path: &str) -> PathResult<String> {
    let unified = path.replace('\\', "/");
    let (prefix, body) = split_root(&unified);
    let absolute = prefix.is_some();

    let mut segments: Vec<&str> = Vec::new();
    for segment in body.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() && absolute {
                    return Err(PathError::ExcessParentSegments(path.to_string()));
                }
            }
            name => segments.push(name),
        }
    }

    let joined = segments.join("/");
    Ok(match prefix {
        Some(root) => format!("{root}{joined}"),
        None if joined.is_empty() => ".".to_string(),
        None => joined,
    })
}

/// Normalizes a filesystem path.
pub fn normalize_path(path: &Path) -> PathResult<String> {
    normalize(&path.to_string_lossy())
}

/// Resolves `path` against the working directory, then normalizes it.
///
/// Two different files never share a location this way, whatever form the
/// caller's path had.
pub fn absolute_location(path: &Path) -> PathResult<String> {
    let absolute = std::path::absolute(path).map_err(|err| PathError::Unresolvable {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    normalize_path(&absolute)
}

/// Returns whether the path string is absolute (`/x`, `\x` or `C:/x`).
pub fn is_absolute(path: &str) -> bool {
    split_root(&path.replace('\\', "/")).0.is_some()
}

fn split_root(unified: &str) -> (Option<String>, &str) {
    if let Some(rest) = unified.strip_prefix('/') {
        return (Some("/".to_string()), rest);
    }
    let bytes = unified.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        let rest = unified[2..].trim_start_matches('/');
        return (Some(format!("{}/", &unified[..2])), rest);
    }
    (None, unified)
}

/// Compiled include/exclude glob set.
///
/// Glob syntax: `*` matches within one segment, `?` matches one character,
/// `**` matches any number of segments.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    includes: Vec<Regex>,
    excludes: Vec<Regex>,
}

impl PathMatcher {
    /// Anchors each relative pattern at `base`, normalizes it, and compiles it.
    pub fn new<S: AsRef<str>>(base: &str, includes: &[S], excludes: &[S]) -> PathResult<Self> {
        Ok(Self {
            includes: compile_all(base, includes)?,
            excludes: compile_all(base, excludes)?,
        })
    }

    /// Matches an already-normalized location.
    pub fn matches(&self, location: &str) -> bool {
        self.includes.iter().any(|regex| regex.is_match(location))
            && !self.excludes.iter().any(|regex| regex.is_match(location))
    }

    /// Normalizes `path` and matches it; unnormalizable paths never match.
    pub fn matches_path(&self, path: &Path) -> bool {
        normalize_path(path).is_ok_and(|location| self.matches(&location))
    }
}

fn compile_all<S: AsRef<str>>(base: &str, patterns: &[S]) -> PathResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| compile(base, pattern.as_ref()))
        .collect()
}

fn compile(base: &str, pattern: &str) -> PathResult<Regex> {
    let anchored = if is_absolute(pattern) || base.is_empty() {
        normalize(pattern)?
    } else {
        normalize(&format!("{base}/{pattern}"))?
    };
    Regex::new(&glob_to_regex(&anchored)).map_err(|source| PathError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

fn glob_to_regex(glob: &str) -> String {
    let mut regex = String::with_capacity(glob.len() * 2 + 2);
    regex.push('^');
    let chars: Vec<char> = glob.chars().collect();
    let mut index = 0;
    while index < chars.len() {
        match chars[index] {
            '*' if chars.get(index + 1) == Some(&'*') => {
                if chars.get(index + 2) == Some(&'/') {
                    regex.push_str("(?:.*/)?");
                    index += 3;
                } else {
                    regex.push_str(".*");
                    index += 2;
                }
                continue;
            }
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            other => regex.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
        index += 1;
    }
    regex.push('$');
    regex
}
