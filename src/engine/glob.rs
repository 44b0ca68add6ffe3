//! File filters applied to every hit: include/exclude globs, excluded
//! directories and the modification-time window.
//!
//! Globs use fnmatch semantics where `*` also crosses `/`.

use std::path::Path;

use regex::Regex;
use tracing::debug;

use crate::types::{FileMeta, SearchOptions};

/// Compile a glob to an anchored regex: `*` → `.*`, `?` → `.`, everything
/// else literal.
pub fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::with_capacity(pattern.len() * 2 + 2);
    re.push('^');
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            _ => re.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    re.push('$');
    match Regex::new(&re) {
        Ok(r) => Some(r),
        Err(e) => {
            debug!(pattern, error = %e, "Glob did not compile");
            None
        }
    }
}

pub fn fnmatch(pattern: &str, path: &str) -> bool {
    glob_to_regex(pattern).is_some_and(|re| re.is_match(path))
}

/// Compiled once per search and applied to every candidate file.
#[derive(Debug, Default)]
pub struct FileFilter {
    include: Option<Glob>,
    exclude: Option<Glob>,
    exclude_dir: Option<Glob>,
    since: i64,
    before: i64,
}

/// A glob that failed to compile matches nothing.
#[derive(Debug)]
struct Glob(Option<Regex>);

impl Glob {
    fn new(pattern: &str) -> Option<Self> {
        if pattern.is_empty() {
            None
        } else {
            Some(Self(glob_to_regex(pattern)))
        }
    }

    fn is_match(&self, s: &str) -> bool {
        self.0.as_ref().is_some_and(|re| re.is_match(s))
    }
}

impl FileFilter {
    pub fn from_options(opts: &SearchOptions) -> Self {
        Self {
            include: Glob::new(&opts.include_glob),
            exclude: Glob::new(&opts.exclude_glob),
            exclude_dir: Glob::new(&opts.exclude_dir_glob),
            since: opts.since,
            before: opts.before,
        }
    }

    pub fn accepts_path(&self, path: &str) -> bool {
        if let Some(inc) = &self.include {
            if !inc.is_match(path) {
                return false;
            }
        }
        if let Some(exc) = &self.exclude {
            if exc.is_match(path) {
                return false;
            }
        }
        if let Some(dir_glob) = &self.exclude_dir {
            if dir_glob.is_match(&parent_dir(path)) {
                return false;
            }
        }
        true
    }

    pub fn accepts(&self, file: &FileMeta) -> bool {
        if self.since > 0 && file.last_modified < self.since {
            return false;
        }
        if self.before > 0 && file.last_modified >= self.before {
            return false;
        }
        self.accepts_path(&file.path)
    }
}

/// Directory part of a repo-relative path, `"."` at the top level.
fn parent_dir(path: &str) -> String {
    match Path::new(path).parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy().into_owned(),
        _ => ".".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(include: &str, exclude: &str, exclude_dir: &str) -> SearchOptions {
        SearchOptions {
            include_glob: include.to_string(),
            exclude_glob: exclude.to_string(),
            exclude_dir_glob: exclude_dir.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_star_crosses_slashes() {
        assert!(fnmatch("*.go", "internal/auth/login.go"));
        assert!(fnmatch("internal/*", "internal/a/b/c.rs"));
        assert!(!fnmatch("*.go", "main.rs"));
    }

    #[test]
    fn test_question_mark_and_literals() {
        assert!(fnmatch("a?c.txt", "abc.txt"));
        assert!(!fnmatch("a?c.txt", "abcxtxt"));
        assert!(fnmatch("lib(1).[ch]", "lib(1).[ch]"));
        assert!(!fnmatch("lib+", "libb"));
    }

    #[test]
    fn test_include_and_exclude() {
        let f = FileFilter::from_options(&opts("*.go", "*_test.go", ""));
        assert!(f.accepts_path("auth.go"));
        assert!(!f.accepts_path("auth_test.go"));
        assert!(!f.accepts_path("auth.rs"));
    }

    #[test]
    fn test_exclude_dir_matches_parent() {
        let f = FileFilter::from_options(&opts("", "", "vendor*"));
        assert!(!f.accepts_path("vendor/lib/x.go"));
        assert!(f.accepts_path("src/vendor.go"));

        let top = FileFilter::from_options(&opts("", "", "."));
        assert!(!top.accepts_path("main.go"));
        assert!(top.accepts_path("cmd/main.go"));
    }

    #[test]
    fn test_time_window() {
        let f = FileFilter::from_options(&SearchOptions {
            since: 100,
            before: 200,
            ..Default::default()
        });
        let file = |t| FileMeta {
            path: "a.go".to_string(),
            last_modified: t,
            ..Default::default()
        };
        assert!(!f.accepts(&file(99)));
        assert!(f.accepts(&file(100)));
        assert!(f.accepts(&file(199)));
        assert!(!f.accepts(&file(200)));
    }

    #[test]
    fn test_empty_filter_accepts_everything() {
        let f = FileFilter::default();
        assert!(f.accepts_path("anything/at/all.bin"));
    }
}
