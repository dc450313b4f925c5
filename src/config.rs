// Keepsake backup system.

//! Read a declarative `key: value` configuration file.
//!
//! The file compiles into an argv fragment spliced ahead of the real
//! command line, so later (real) arguments override the file per key and
//! `--no-<flag>` negations win by ordinary last-wins parsing.

use std::ffi::OsString;
use std::io::Read;
use std::path::Path;

use crate::vfs::Filesystem;
use crate::{Error, Result};

/// Parse a configuration file into command-line arguments.
///
/// Keys are lowercased with spaces replaced by dashes; a blank value
/// makes a flag. The `config` key is rejected to keep files from
/// including each other.
pub fn config_to_args(fs: &dyn Filesystem, path: &Path) -> Result<Vec<OsString>> {
    let mut text = String::new();
    fs.open_read(path)
        .and_then(|mut r| r.read_to_string(&mut text))
        .map_err(|source| Error::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;

    let mut args: Vec<OsString> = Vec::new();
    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parse_err = |reason: &str| Error::ParseConfig {
            path: path.to_path_buf(),
            line: line_no + 1,
            reason: reason.to_owned(),
        };
        let (raw_key, raw_value) = line
            .split_once(':')
            .ok_or_else(|| parse_err("expected `key: value`"))?;
        let key = canonical_key(raw_key);
        if key.is_empty() {
            return Err(parse_err("missing parameter name"));
        }
        if key == "config" {
            return Err(parse_err(
                "the `config` parameter has no effect inside a configuration file",
            ));
        }
        args.push(format!("--{key}").into());
        let value = strip_quotes(raw_value);
        if !value.is_empty() {
            args.push(value.into());
        }
    }
    Ok(args)
}

/// Lowercase a key and replace runs of spaces with dashes.
fn canonical_key(raw: &str) -> String {
    raw.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Strip outer whitespace, then one pair of surrounding double quotes.
///
/// Quoting preserves deliberate leading or trailing whitespace in a
/// value; inner quotes are untouched.
fn strip_quotes(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() > 1 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vfs::LocalFs;
    use std::fs;

    fn parse(content: &str) -> Result<Vec<OsString>> {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.txt");
        fs::write(&path, content).unwrap();
        config_to_args(&LocalFs, &path)
    }

    #[test]
    fn keys_are_canonicalized() {
        let args = parse("User Folder: /home/me\nBackup Folder: /mnt/backup\n").unwrap();
        assert_eq!(
            args,
            ["--user-folder", "/home/me", "--backup-folder", "/mnt/backup"]
        );
    }

    #[test]
    fn blank_values_are_flags() {
        let args = parse("Delete On Error:\ndebug:\n").unwrap();
        assert_eq!(args, ["--delete-on-error", "--debug"]);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let args = parse("# a comment\n\nfilter: rules.txt\n").unwrap();
        assert_eq!(args, ["--filter", "rules.txt"]);
    }

    #[test]
    fn one_quote_pair_is_stripped() {
        let args = parse("log: \"  spaced name.txt \"\n").unwrap();
        assert_eq!(args, ["--log", "  spaced name.txt "]);

        let args = parse("log: \"\"twice.txt\"\"\n").unwrap();
        assert_eq!(args, ["--log", "\"twice.txt\""]);

        let args = parse("log: mid\"quote\".txt\n").unwrap();
        assert_eq!(args, ["--log", "mid\"quote\".txt"]);
    }

    #[test]
    fn values_may_contain_colons() {
        let args = parse("backup folder: C:\\backups\n").unwrap();
        assert_eq!(args, ["--backup-folder", "C:\\backups"]);
    }

    #[test]
    fn config_key_is_rejected() {
        assert!(matches!(
            parse("config: other.txt\n"),
            Err(Error::ParseConfig { .. })
        ));
    }

    #[test]
    fn missing_colon_is_an_error() {
        assert!(matches!(parse("just some words\n"), Err(Error::ParseConfig { .. })));
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            config_to_args(&LocalFs, &tmp.path().join("absent.txt")),
            Err(Error::ReadConfig { .. })
        ));
    }
}
