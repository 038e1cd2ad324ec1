//! Minimal `.env` parser: `KEY=value` lines, `#` comments, blank lines
//! skipped, optional single or double quoting.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::LoadError;

/// Resolves the `.env` path to read: `override_dir` if given, else the
/// current directory. Returns `None` if no such file exists (not an error —
/// running without a `.env` is the common case).
pub fn dotenv_path(override_dir: Option<&Path>) -> Option<PathBuf> {
    let dir = match override_dir {
        Some(d) => d.to_path_buf(),
        None => std::env::current_dir().ok()?,
    };
    let path = dir.join(".env");
    path.is_file().then_some(path)
}

fn strip_quotes(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1].replace("\\\"", "\"")
    } else if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

pub fn parse_dotenv(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        out.insert(key.to_string(), strip_quotes(value.trim()));
    }
    out
}

/// Loads and parses the `.env` file, or an empty map if there is none.
pub fn load_env_map(override_dir: Option<&Path>) -> Result<HashMap<String, String>, LoadError> {
    let Some(path) = dotenv_path(override_dir) else {
        return Ok(HashMap::new());
    };
    let content = std::fs::read_to_string(path).map_err(|_| LoadError::DotenvRead)?;
    Ok(parse_dotenv(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_key_value() {
        let map = parse_dotenv("FOO=bar\n");
        assert_eq!(map.get("FOO"), Some(&"bar".to_string()));
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let map = parse_dotenv("# a comment\n\nFOO=bar\n");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn strips_double_quotes_with_escape() {
        let map = parse_dotenv(r#"FOO="a \"quoted\" value""#);
        assert_eq!(map.get("FOO"), Some(&"a \"quoted\" value".to_string()));
    }

    #[test]
    fn strips_single_quotes_without_escape_support() {
        let map = parse_dotenv("FOO='literal $value'");
        assert_eq!(map.get("FOO"), Some(&"literal $value".to_string()));
    }

    #[test]
    fn lines_without_equals_are_skipped() {
        let map = parse_dotenv("not a valid line\nFOO=bar\n");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn empty_key_is_skipped() {
        let map = parse_dotenv("=novalue\nFOO=bar\n");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn empty_content_yields_empty_map() {
        assert!(parse_dotenv("").is_empty());
    }

    #[test]
    fn bare_key_equals_is_an_empty_value() {
        let map = parse_dotenv("FOO=\nBAR=\"\"");
        assert_eq!(map.get("FOO"), Some(&"".to_string()));
        assert_eq!(map.get("BAR"), Some(&"".to_string()));
    }

    #[test]
    fn missing_file_returns_empty_map_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let map = load_env_map(Some(dir.path())).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn reads_file_from_override_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "FOO=bar\n").unwrap();
        let map = load_env_map(Some(dir.path())).unwrap();
        assert_eq!(map.get("FOO"), Some(&"bar".to_string()));
    }
}
