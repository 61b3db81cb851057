// src/requirement/file.rs

//! Requirements-file parsing
//!
//! Supports the subset of pip's requirements-file format the tool relies on:
//! comments, line continuations, nested `-r` includes, `-e` editables and
//! index options. Unknown options are logged and skipped.

use super::{Origin, Requirement};
use crate::error::{Error, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\s+)#.*$").expect("comment regex is valid"));

/// Everything read out of a set of requirements files
#[derive(Debug, Clone, Default)]
pub struct RequirementSet {
    /// Direct requirements in file order, exact duplicates removed
    pub requirements: Vec<Requirement>,
    /// `-i/--index-url`, last one wins
    pub index_url: Option<String>,
    pub extra_index_urls: Vec<String>,
    pub find_links: Vec<String>,
}

impl RequirementSet {
    fn push(&mut self, requirement: Requirement) {
        let duplicate = self.requirements.iter().any(|existing| {
            existing.identity() == requirement.identity()
                && existing.editable == requirement.editable
                && existing.spec() == requirement.spec()
        });
        if duplicate {
            debug!("Skipping duplicate requirement {}", requirement);
        } else {
            self.requirements.push(requirement);
        }
    }
}

/// Parse requirements files in order, following `-r` includes
pub fn parse_requirement_files(paths: &[PathBuf]) -> Result<RequirementSet> {
    let mut set = RequirementSet::default();
    for path in paths {
        let mut stack = Vec::new();
        parse_file(path, &mut set, &mut stack)?;
    }
    Ok(set)
}

fn parse_file(path: &Path, set: &mut RequirementSet, stack: &mut Vec<PathBuf>) -> Result<()> {
    let content = fs::read_to_string(path).map_err(|source| Error::RequirementsFile {
        path: path.to_path_buf(),
        source,
    })?;

    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    stack.push(canonical);

    let base_dir = path.parent().unwrap_or(Path::new(""));

    for (line_no, line) in logical_lines(&content) {
        let origin = Origin::File {
            path: path.to_path_buf(),
            line: line_no,
        };

        if !line.starts_with('-') {
            let requirement =
                Requirement::parse(&line, origin).map_err(|msg| Error::parse(path, line_no, msg))?;
            set.push(requirement);
            continue;
        }

        let (option, value) = split_option(&line);
        let require_value = || {
            value
                .clone()
                .ok_or_else(|| Error::parse(path, line_no, format!("{} requires an argument", option)))
        };

        match option.as_str() {
            "-r" | "--requirement" => {
                let nested = base_dir.join(require_value()?);
                let nested_canonical = nested.canonicalize().unwrap_or_else(|_| nested.clone());
                if stack.contains(&nested_canonical) {
                    return Err(Error::parse(
                        path,
                        line_no,
                        format!("Recursive requirements include of {}", nested.display()),
                    ));
                }
                parse_file(&nested, set, stack).map_err(|e| match e {
                    Error::RequirementsFile { path: missing, .. } if missing == nested => {
                        Error::parse(
                            path,
                            line_no,
                            format!("Could not open requirements file {}", nested.display()),
                        )
                    }
                    other => other,
                })?;
            }
            "-e" | "--editable" => {
                let requirement = Requirement::parse_editable(&require_value()?, origin)
                    .map_err(|msg| Error::parse(path, line_no, msg))?;
                set.push(requirement);
            }
            "-i" | "--index-url" => set.index_url = Some(require_value()?),
            "--extra-index-url" => set.extra_index_urls.push(require_value()?),
            "-f" | "--find-links" => set.find_links.push(require_value()?),
            other => {
                warn!(
                    "{}:{}: ignoring unsupported option '{}'",
                    path.display(),
                    line_no,
                    other
                );
            }
        }
    }

    stack.pop();
    Ok(())
}

/// Join continuation lines and strip comments, keeping the first line number
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (index, raw) in content.lines().enumerate() {
        let line_no = index + 1;
        let (start, mut text) = match pending.take() {
            Some((start, mut acc)) => {
                acc.push_str(raw);
                (start, acc)
            }
            None => (line_no, raw.to_string()),
        };

        if text.ends_with('\\') {
            text.pop();
            pending = Some((start, text));
            continue;
        }

        let stripped = COMMENT_RE.replace(&text, "");
        let stripped = stripped.trim();
        if !stripped.is_empty() {
            lines.push((start, stripped.to_string()));
        }
    }

    if let Some((start, text)) = pending {
        let stripped = COMMENT_RE.replace(&text, "");
        if !stripped.trim().is_empty() {
            lines.push((start, stripped.trim().to_string()));
        }
    }

    lines
}

/// `--opt=value`, `--opt value`, `-o value`
fn split_option(line: &str) -> (String, Option<String>) {
    let (head, tail) = match line.find(|c: char| c.is_whitespace() || c == '=') {
        Some(i) => (&line[..i], Some(line[i + 1..].trim())),
        None => (line, None),
    };
    (
        head.to_string(),
        tail.filter(|v| !v.is_empty()).map(str::to_string),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirement::{PackageName, SourceLocator};
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_comments_and_continuations() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            "requirements.txt",
            "# top comment\n\nflake8==2.2.5  # pinned\nmccabe\\\n>=0.2\n",
        );

        let set = parse_requirement_files(&[path.clone()]).unwrap();
        assert_eq!(set.requirements.len(), 2);
        assert_eq!(set.requirements[0].spec(), "flake8==2.2.5");
        assert_eq!(
            set.requirements[0].origin,
            Origin::File {
                path: path.clone(),
                line: 3
            }
        );
        assert_eq!(set.requirements[1].spec(), "mccabe>=0.2");
        assert_eq!(
            set.requirements[1].origin,
            Origin::File { path, line: 4 }
        );
    }

    #[test]
    fn test_parse_nested_includes_and_options() {
        let temp = TempDir::new().unwrap();
        write(&temp, "base.txt", "six==1.16.0\n--extra-index-url https://extra.example/simple\n");
        let path = write(
            &temp,
            "requirements.txt",
            "-r base.txt\n--index-url=https://mirror.example/simple\n-e ./local#egg=local\n-c constraints.txt\n",
        );

        let set = parse_requirement_files(&[path]).unwrap();
        assert_eq!(set.requirements.len(), 2);
        assert_eq!(set.requirements[0].name, Some(PackageName::new("six")));
        assert!(set.requirements[1].editable);
        assert!(matches!(set.requirements[1].source, SourceLocator::LocalPath(_)));
        assert_eq!(set.index_url.as_deref(), Some("https://mirror.example/simple"));
        assert_eq!(set.extra_index_urls, vec!["https://extra.example/simple".to_string()]);
    }

    #[test]
    fn test_parse_duplicate_lines_collapse() {
        let temp = TempDir::new().unwrap();
        let a = write(&temp, "a.txt", "six==1.16.0\n");
        let b = write(&temp, "b.txt", "six==1.16.0\nsix>=1\n");

        let set = parse_requirement_files(&[a, b]).unwrap();
        assert_eq!(set.requirements.len(), 2);
    }

    #[test]
    fn test_parse_error_reports_file_and_line() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "requirements.txt", "six\nfoo==\n");

        let err = parse_requirement_files(&[path]).unwrap_err();
        match err {
            Error::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_recursive_include_fails() {
        let temp = TempDir::new().unwrap();
        write(&temp, "a.txt", "-r b.txt\n");
        write(&temp, "b.txt", "-r a.txt\n");

        let err = parse_requirement_files(&[temp.path().join("a.txt")]).unwrap_err();
        assert!(err.to_string().contains("Recursive requirements include"));
    }

    #[test]
    fn test_parse_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = parse_requirement_files(&[temp.path().join("nope.txt")]).unwrap_err();
        assert!(matches!(err, Error::RequirementsFile { .. }));
    }
}
