use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use walkdir::{DirEntry, WalkDir};

use crate::error::RunError;

/// Selects files by exact file name or by a `*.ext` suffix wildcard.
///
/// The extension is literal: glob metacharacters after `*.` match only
/// themselves. A name needs at least one character before `.ext`, so the
/// dotfile `.txt` has no extension and is not matched by `*.txt`.
#[derive(Debug, Clone)]
pub enum FilenamePattern {
    Exact(OsString),
    Suffix { pattern: String, matcher: GlobMatcher },
}

impl FilenamePattern {
    pub fn parse(raw: &str) -> Result<Self, RunError> {
        if let Some(extension) = raw.strip_prefix("*.").filter(|ext| !ext.is_empty()) {
            let matcher = GlobBuilder::new(&format!("?*.{}", globset::escape(extension)))
                .backslash_escape(false)
                .build()
                .map_err(|source| RunError::Pattern {
                    pattern: raw.to_string(),
                    source,
                })?
                .compile_matcher();
            return Ok(Self::Suffix {
                pattern: raw.to_string(),
                matcher,
            });
        }
        Ok(Self::Exact(OsString::from(raw)))
    }

    pub fn matches(&self, file_name: &OsStr) -> bool {
        match self {
            Self::Exact(name) => name == file_name,
            Self::Suffix { matcher, .. } => matcher.is_match(Path::new(file_name)),
        }
    }
}

impl fmt::Display for FilenamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(name) => write!(f, "{}", name.to_string_lossy()),
            Self::Suffix { pattern, .. } => f.write_str(pattern),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    pub skip_hidden: bool,
    /// Globs matched against paths relative to the root.
    pub exclude: Vec<String>,
}

/// Matching files in traversal order, plus entries the walk could not read.
#[derive(Debug, Default)]
pub struct Candidates {
    pub files: Vec<PathBuf>,
    pub errors: Vec<walkdir::Error>,
}

/// Walks `root` recursively and returns every regular file whose name
/// matches `pattern`. Order follows the directory listing and is not sorted.
pub fn collect_candidates(
    root: &Path,
    pattern: &FilenamePattern,
    options: &WalkOptions,
) -> Result<Candidates, RunError> {
    if !root.is_dir() {
        return Err(RunError::Path(root.to_path_buf()));
    }
    let exclude = build_exclude_globs(&options.exclude)?;
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !(options.skip_hidden && entry.depth() > 0 && is_hidden(entry)));

    let mut candidates = Candidates::default();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                candidates.errors.push(err);
                continue;
            }
        };
        if !entry.file_type().is_file() || !pattern.matches(entry.file_name()) {
            continue;
        }
        if is_excluded(root, entry.path(), exclude.as_ref()) {
            continue;
        }
        candidates.files.push(entry.into_path());
    }

    Ok(candidates)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn is_excluded(root: &Path, path: &Path, exclude: Option<&GlobSet>) -> bool {
    let Some(set) = exclude else {
        return false;
    };
    let relative = path.strip_prefix(root).unwrap_or(path);
    set.is_match(normalize_slashes(relative).as_str())
}

fn normalize_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn build_exclude_globs(patterns: &[String]) -> Result<Option<GlobSet>, RunError> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let invalid = |pattern: &str, source| RunError::Pattern {
        pattern: pattern.to_string(),
        source,
    };
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|err| invalid(pattern, err))?);
    }
    builder
        .build()
        .map(Some)
        .map_err(|err| invalid(&patterns.join(", "), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn names(candidates: &Candidates) -> Vec<String> {
        let mut names: Vec<_> = candidates
            .files
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn suffix_pattern_matches_extension_only() {
        let pattern = FilenamePattern::parse("*.txt").expect("pattern");
        assert!(matches!(pattern, FilenamePattern::Suffix { .. }));
        assert!(pattern.matches(OsStr::new("notes.txt")));
        assert!(!pattern.matches(OsStr::new("notes.txt.bak")));
        assert!(!pattern.matches(OsStr::new("notes.md")));
        assert_eq!(pattern.to_string(), "*.txt");
    }

    #[test]
    fn suffix_extension_is_literal() {
        let pattern = FilenamePattern::parse("*.c*").expect("pattern");
        assert!(!pattern.matches(OsStr::new("main.cpp")));
        assert!(!pattern.matches(OsStr::new("main.c")));
        assert!(pattern.matches(OsStr::new("main.c*")));

        let pattern = FilenamePattern::parse("*.t?t").expect("pattern");
        assert!(!pattern.matches(OsStr::new("a.txt")));

        let pattern = FilenamePattern::parse("*.[").expect("unbalanced bracket is literal");
        assert!(pattern.matches(OsStr::new("a.[")));
        assert_eq!(pattern.to_string(), "*.[");

        let pattern = FilenamePattern::parse("*.{a,b}").expect("pattern");
        assert!(!pattern.matches(OsStr::new("x.a")));
        assert!(pattern.matches(OsStr::new("x.{a,b}")));
    }

    #[cfg(unix)]
    #[test]
    fn backslash_in_extension_is_literal() {
        let pattern = FilenamePattern::parse("*.a\\").expect("trailing backslash");
        assert!(pattern.matches(OsStr::new("x.a\\")));
        assert!(!pattern.matches(OsStr::new("x.a")));
    }

    #[test]
    fn suffix_needs_a_name_before_the_extension() {
        let pattern = FilenamePattern::parse("*.txt").expect("pattern");
        assert!(!pattern.matches(OsStr::new(".txt")));
        assert!(pattern.matches(OsStr::new("..txt")));
        assert!(pattern.matches(OsStr::new(".hidden.txt")));
        assert!(pattern.matches(OsStr::new("a.b.txt")));
    }

    #[test]
    fn exact_pattern_requires_full_name() {
        let pattern = FilenamePattern::parse("config.ini").expect("pattern");
        assert!(pattern.matches(OsStr::new("config.ini")));
        assert!(!pattern.matches(OsStr::new("config.ini.bak")));
        assert!(!pattern.matches(OsStr::new("my-config.ini")));
    }

    #[test]
    fn bare_star_dot_is_an_exact_name() {
        assert!(matches!(
            FilenamePattern::parse("*.").expect("pattern"),
            FilenamePattern::Exact(_)
        ));
    }

    #[test]
    fn missing_root_is_a_path_error() {
        let temp = tempdir().expect("temp dir");
        let pattern = FilenamePattern::parse("*.txt").expect("pattern");
        let err = collect_candidates(&temp.path().join("nope"), &pattern, &WalkOptions::default())
            .expect_err("missing root");
        assert!(matches!(err, RunError::Path(_)));

        let file = temp.path().join("file.txt");
        fs::write(&file, "x").expect("write file");
        let err = collect_candidates(&file, &pattern, &WalkOptions::default())
            .expect_err("file root");
        assert!(matches!(err, RunError::Path(_)));
    }

    #[test]
    fn walks_nested_directories() {
        let temp = tempdir().expect("temp dir");
        let nested = temp.path().join("a").join("b");
        fs::create_dir_all(&nested).expect("nested dir");
        fs::write(temp.path().join("top.txt"), "x").expect("write");
        fs::write(nested.join("deep.txt"), "x").expect("write");
        fs::write(nested.join("deep.md"), "x").expect("write");

        let pattern = FilenamePattern::parse("*.txt").expect("pattern");
        let found = collect_candidates(temp.path(), &pattern, &WalkOptions::default())
            .expect("walk");
        assert_eq!(names(&found), vec!["deep.txt", "top.txt"]);
        assert!(found.errors.is_empty());
    }

    #[test]
    fn hidden_and_excluded_entries_are_skipped_on_request() {
        let temp = tempdir().expect("temp dir");
        let hidden = temp.path().join(".git");
        let vendor = temp.path().join("vendor");
        fs::create_dir_all(&hidden).expect("hidden dir");
        fs::create_dir_all(&vendor).expect("vendor dir");
        fs::write(hidden.join("a.txt"), "x").expect("write");
        fs::write(vendor.join("b.txt"), "x").expect("write");
        fs::write(temp.path().join("c.txt"), "x").expect("write");

        let pattern = FilenamePattern::parse("*.txt").expect("pattern");
        let all = collect_candidates(temp.path(), &pattern, &WalkOptions::default())
            .expect("walk");
        assert_eq!(names(&all), vec!["a.txt", "b.txt", "c.txt"]);

        let options = WalkOptions {
            skip_hidden: true,
            exclude: vec!["vendor/**".to_string()],
        };
        let filtered = collect_candidates(temp.path(), &pattern, &options).expect("walk");
        assert_eq!(names(&filtered), vec!["c.txt"]);
    }

    #[test]
    fn invalid_exclude_glob_is_rejected() {
        let temp = tempdir().expect("temp dir");
        let pattern = FilenamePattern::parse("*.txt").expect("pattern");
        let options = WalkOptions {
            skip_hidden: false,
            exclude: vec!["a[".to_string()],
        };
        let err = collect_candidates(temp.path(), &pattern, &options).expect_err("bad glob");
        assert!(matches!(err, RunError::Pattern { .. }));
    }

    #[test]
    fn normalize_slashes_handles_backslashes() {
        assert_eq!(
            normalize_slashes(Path::new("foo\\bar\\baz.txt")),
            "foo/bar/baz.txt"
        );
    }
}
