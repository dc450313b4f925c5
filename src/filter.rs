// Keepsake backup system.

//! Compile ordered include/exclude glob rules into a per-path predicate.
//!
//! A filter file holds one rule per line: a `+` or `-` sign, whitespace,
//! then a glob matched against paths relative to the source root. `#`
//! starts a comment. Evaluation starts from "included" and the last
//! matching rule wins.

use std::cell::Cell;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use tracing::{debug, warn};

use crate::misc::slash_path;
use crate::vfs::Filesystem;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Include,
    Exclude,
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Sign::Include => "+",
            Sign::Exclude => "-",
        })
    }
}

struct Rule {
    line: usize,
    sign: Sign,
    text: String,
    matcher: GlobMatcher,
    /// Set when this rule flips a path's decision during a walk.
    used: Cell<bool>,
}

/// An ordered rule list compiled into a path predicate.
///
/// The predicate is evaluated per file; directories are traversed
/// regardless and appear in a snapshot only when a descendant is included.
pub struct Filter {
    rules: Vec<Rule>,
    file: Option<PathBuf>,
}

impl Filter {
    /// A filter that includes everything.
    pub fn everything() -> Filter {
        Filter {
            rules: Vec::new(),
            file: None,
        }
    }

    /// Compile a filter file against a source root.
    pub fn from_file(
        fs: &dyn Filesystem,
        file: &Path,
        source_root: &Path,
    ) -> Result<Filter> {
        let mut text = String::new();
        fs.open_read(file)
            .and_then(|mut r| r.read_to_string(&mut text))
            .map_err(|source| Error::ReadFilter {
                path: file.to_path_buf(),
                source,
            })?;
        let mut filter = Filter::from_rules(&text, source_root, fs.case_insensitive(), file)?;
        filter.file = Some(file.to_path_buf());
        Ok(filter)
    }

    /// Compile rule text directly; `file` is used only in error messages.
    pub fn from_rules(
        text: &str,
        source_root: &Path,
        case_insensitive: bool,
        file: &Path,
    ) -> Result<Filter> {
        let mut rules = Vec::new();
        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parse_err = |reason: &str| Error::ParseFilter {
                path: file.to_path_buf(),
                line: line_no + 1,
                reason: reason.to_owned(),
            };
            let sign = match line.chars().next() {
                Some('+') => Sign::Include,
                Some('-') => Sign::Exclude,
                _ => {
                    return Err(parse_err(
                        "the first symbol of each line must be +, -, or #",
                    ))
                }
            };
            let pattern = line[1..].trim();
            if pattern.is_empty() {
                return Err(parse_err("missing pattern"));
            }
            let pattern = normalize_pattern(pattern, source_root).ok_or_else(|| {
                parse_err("pattern looks at paths outside the source folder")
            })?;
            let matcher = GlobBuilder::new(&pattern)
                .literal_separator(true)
                .case_insensitive(case_insensitive)
                .build()?
                .compile_matcher();
            debug!("Filter rule added: {} {}", sign, pattern);
            rules.push(Rule {
                line: line_no + 1,
                sign,
                text: pattern,
                matcher,
                used: Cell::new(false),
            });
        }
        Ok(Filter { rules, file: None })
    }

    /// Decide whether a source-relative path is included.
    ///
    /// `default` is the decision before any rule applies: true for
    /// ordinary paths, false for platform reparse points, which a rule
    /// can re-include.
    pub fn included_with_default(&self, rel: &Path, default: bool) -> bool {
        let candidate = slash_path(rel);
        let mut included = default;
        for rule in &self.rules {
            let include = rule.sign == Sign::Include;
            if included == include || !rule.matcher.is_match(&candidate) {
                continue;
            }
            included = include;
            rule.used.set(true);
            debug!(
                "File {:?} {} by line {}: {} {}",
                rel,
                if included { "included" } else { "excluded" },
                rule.line,
                rule.sign,
                rule.text,
            );
        }
        included
    }

    pub fn included(&self, rel: &Path) -> bool {
        self.included_with_default(rel, true)
    }

    /// Warn about rules that never changed any path's decision during the
    /// walk that just finished.
    pub fn warn_unused(&self) {
        for rule in self.rules.iter().filter(|r| !r.used.get()) {
            warn!(
                "{}: line #{} ({} {}) had no effect",
                self.file
                    .as_deref()
                    .unwrap_or_else(|| Path::new("filter"))
                    .display(),
                rule.line,
                rule.sign,
                rule.text,
            );
        }
    }
}

/// Resolve a pattern to a forward-slash glob relative to the source root.
///
/// Absolute patterns must point inside the source root; relative patterns
/// are taken as already source-relative.
fn normalize_pattern(pattern: &str, source_root: &Path) -> Option<String> {
    let as_path = Path::new(pattern);
    if as_path.is_absolute() {
        let rel = as_path.strip_prefix(source_root).ok()?;
        Some(slash_path(rel))
    } else {
        Some(pattern.replace('\\', "/"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn compile(text: &str) -> Filter {
        Filter::from_rules(text, Path::new("/src"), false, Path::new("test-filter")).unwrap()
    }

    #[test]
    fn empty_filter_includes_everything() {
        let filter = Filter::everything();
        assert!(filter.included(Path::new("anything/at/all")));
    }

    #[test]
    fn last_matching_rule_wins() {
        let filter = compile("- dir/**\n+ dir/keep/**\n");
        assert!(!filter.included(Path::new("dir/junk.txt")));
        assert!(filter.included(Path::new("dir/keep/x.txt")));
        assert!(filter.included(Path::new("other.txt")));
    }

    #[test]
    fn exclude_then_include_then_exclude() {
        let filter = compile("- **/*.log\n+ important.log\n- important.log\n");
        assert!(!filter.included(Path::new("a/b.log")));
        assert!(!filter.included(Path::new("important.log")));
    }

    #[test]
    fn question_mark_and_classes() {
        let filter = compile("- foo?\n- bar[abc]\n- [!a-z]\n");
        assert!(!filter.included(Path::new("foox")));
        assert!(filter.included(Path::new("foo")));
        assert!(!filter.included(Path::new("bara")));
        assert!(filter.included(Path::new("bar")));
        assert!(!filter.included(Path::new("1")));
        assert!(filter.included(Path::new("a")));
    }

    #[test]
    fn star_does_not_cross_separators() {
        let filter = compile("- dir/*\n");
        assert!(!filter.included(Path::new("dir/file")));
        assert!(filter.included(Path::new("dir/sub/file")));
    }

    #[test]
    fn double_star_crosses_separators() {
        let filter = compile("- dir/**\n");
        assert!(!filter.included(Path::new("dir/file")));
        assert!(!filter.included(Path::new("dir/sub/file")));
    }

    #[cfg(unix)]
    #[test]
    fn absolute_patterns_resolve_inside_source_root() {
        let filter =
            Filter::from_rules("- /src/dir/**\n", Path::new("/src"), false, Path::new("f"))
                .unwrap();
        assert!(!filter.included(Path::new("dir/file")));

        let outside = Filter::from_rules("- /elsewhere/**\n", Path::new("/src"), false, Path::new("f"));
        assert!(outside.is_err());
    }

    #[test]
    fn comments_and_blanks_are_ignored() {
        let filter = compile("# a comment\n\n- junk/**\n");
        assert!(!filter.included(Path::new("junk/x")));
    }

    #[test]
    fn bad_sign_is_an_error() {
        assert!(Filter::from_rules("junk/**\n", Path::new("/src"), false, Path::new("f")).is_err());
    }

    #[test]
    fn reparse_points_need_a_rule_to_come_back() {
        let filter = compile("+ junction/**\n");
        // Excluded by default...
        assert!(!filter.included_with_default(Path::new("other"), false));
        // ...unless a rule re-includes.
        assert!(filter.included_with_default(Path::new("junction/data"), false));
    }

    #[test]
    fn case_insensitive_matching() {
        let filter =
            Filter::from_rules("- *.ISO\n", Path::new("/src"), true, Path::new("f")).unwrap();
        assert!(!filter.included(Path::new("disc.iso")));
    }
}
