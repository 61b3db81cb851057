// src/requirement/mod.rs

//! Package requirements
//!
//! A [`Requirement`] is one normalized line of a requirements file (or a
//! command-line spec, or a dependency declared by an installed package).
//! Requirements are immutable once parsed; the resolver derives new ones for
//! sub-dependencies with an [`Origin`] pointing back at the requirer.

mod file;
mod marker;

pub use file::{RequirementSet, parse_requirement_files};
pub use marker::{Marker, MarkerEnvironment};

use crate::error::{Error, Result};
use crate::version::VersionConstraint;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)").expect("name regex is valid")
});

static SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_.]+").expect("separator regex is valid"));

const VCS_SCHEMES: [&str; 4] = ["git+", "hg+", "svn+", "bzr+"];
const ARCHIVE_SUFFIXES: [&str; 6] = [".whl", ".tar.gz", ".tgz", ".zip", ".tar.bz2", ".tar"];

/// Normalize a project name: lowercase, with runs of `-`, `_`, `.` folded to `-`
pub fn normalize_name(name: &str) -> String {
    SEPARATOR_RE.replace_all(name.trim(), "-").to_ascii_lowercase()
}

/// A normalized project name; two requirements with equal names are the same package
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageName(String);

impl PackageName {
    pub fn new(name: &str) -> Self {
        Self(normalize_name(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a requirement's content comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// Resolved by name against the configured package indexes
    Index,
    /// A direct archive URL
    Url(String),
    /// A version-control URL (`git+https://...`)
    Vcs(String),
    /// A local directory or archive
    LocalPath(PathBuf),
}

/// What pulled a requirement in, for error messages and cycle detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    CommandLine,
    File { path: PathBuf, line: usize },
    /// Declared by the distribution that satisfied this parent requirement
    Requirement(Arc<Requirement>),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::CommandLine => write!(f, "command line"),
            Origin::File { path, line } => write!(f, "-r {} (line {})", path.display(), line),
            Origin::Requirement(parent) => write!(f, "{}", parent),
        }
    }
}

/// A single package requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Normalized name; `None` for unnamed URL/path requirements
    pub name: Option<PackageName>,
    /// Name as written, kept for messages
    pub display_name: Option<String>,
    pub extras: Vec<String>,
    pub constraint: VersionConstraint,
    pub marker: Option<Marker>,
    pub source: SourceLocator,
    pub editable: bool,
    pub origin: Origin,
}

impl Requirement {
    /// Parse a requirement line (PEP 508 subset, bare URLs, or local paths)
    pub fn parse(line: &str, origin: Origin) -> std::result::Result<Self, String> {
        let line = line.trim();
        if line.is_empty() {
            return Err("empty requirement".to_string());
        }

        if looks_like_locator(line) {
            return Ok(Self::from_locator(line, false, origin));
        }

        let caps = NAME_RE
            .captures(line)
            .ok_or_else(|| format!("Invalid requirement '{}'", line))?;
        let raw_name = caps[1].to_string();
        let mut rest = line[raw_name.len()..].trim_start();

        let mut extras = Vec::new();
        if let Some(after) = rest.strip_prefix('[') {
            let end = after
                .find(']')
                .ok_or_else(|| format!("Invalid requirement '{}': unclosed extras", line))?;
            extras = after[..end]
                .split(',')
                .map(normalize_name)
                .filter(|e| !e.is_empty())
                .collect();
            rest = after[end + 1..].trim_start();
        }

        let mut source = SourceLocator::Index;
        let (body, marker_text) = if let Some(url_part) = rest.strip_prefix('@') {
            // a URL may itself contain ';', so the marker needs whitespace before it
            let url_part = url_part.trim_start();
            match url_part.find(" ;") {
                Some(i) => {
                    source = classify_url(&url_part[..i]);
                    ("", Some(&url_part[i + 2..]))
                }
                None => {
                    source = classify_url(url_part);
                    ("", None)
                }
            }
        } else {
            match rest.split_once(';') {
                Some((body, marker)) => (body, Some(marker)),
                None => (rest, None),
            }
        };

        let body = body.trim();
        let body = body
            .strip_prefix('(')
            .and_then(|b| b.strip_suffix(')'))
            .unwrap_or(body);
        let constraint = VersionConstraint::parse(body)
            .map_err(|e| format!("Invalid requirement '{}': {}", line, e))?;

        let marker = marker_text
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(Marker::parse)
            .transpose()
            .map_err(|e| format!("Invalid requirement '{}': {}", line, e))?;

        Ok(Self {
            name: Some(PackageName::new(&raw_name)),
            display_name: Some(raw_name),
            extras,
            constraint,
            marker,
            source,
            editable: false,
            origin,
        })
    }

    /// Parse an `-e` target: a local directory or a VCS URL
    pub fn parse_editable(target: &str, origin: Origin) -> std::result::Result<Self, String> {
        let target = target.trim();
        if target.is_empty() {
            return Err("-e requires a path or URL".to_string());
        }
        Ok(Self::from_locator(target, true, origin))
    }

    /// Parse a requirement given on the command line
    pub fn from_spec(spec: &str) -> Result<Self> {
        Self::parse(spec, Origin::CommandLine)
            .map_err(|message| Error::parse("<command line>", 0, message))
    }

    fn from_locator(text: &str, editable: bool, origin: Origin) -> Self {
        let (location, fragment) = match text.split_once('#') {
            Some((location, fragment)) => (location, Some(fragment)),
            None => (text, None),
        };
        let egg = fragment.and_then(|frag| {
            frag.split('&')
                .find_map(|kv| kv.strip_prefix("egg="))
                .filter(|name| !name.is_empty())
        });

        let source = if location.contains("://") || location.starts_with("file:") {
            classify_url(text)
        } else {
            SourceLocator::LocalPath(PathBuf::from(location))
        };

        Self {
            name: egg.map(PackageName::new),
            display_name: egg.map(str::to_string),
            extras: Vec::new(),
            constraint: VersionConstraint::any(),
            marker: None,
            source,
            editable,
            origin,
        }
    }

    /// The same requirement pulled in by a different origin
    pub fn with_origin(&self, origin: Origin) -> Self {
        Self {
            origin,
            ..self.clone()
        }
    }

    /// `name[extras]constraint`, or the locator for unnamed requirements
    pub fn spec(&self) -> String {
        let locator = match &self.source {
            SourceLocator::Index => None,
            SourceLocator::Url(url) | SourceLocator::Vcs(url) => Some(url.clone()),
            SourceLocator::LocalPath(path) => Some(path.display().to_string()),
        };

        let Some(name) = &self.display_name else {
            return locator.unwrap_or_default();
        };

        if let Some(locator) = locator
            && (self.editable || !matches!(self.source, SourceLocator::Url(_)))
        {
            return locator;
        }

        let mut spec = name.clone();
        if !self.extras.is_empty() {
            spec.push('[');
            spec.push_str(&self.extras.join(","));
            spec.push(']');
        }
        if let SourceLocator::Url(url) = &self.source {
            spec.push_str(" @ ");
            spec.push_str(url);
        } else {
            spec.push_str(&self.constraint.to_string());
        }
        spec
    }

    /// Identity used to avoid processing the same requirement twice
    pub fn identity(&self) -> (Option<PackageName>, String) {
        (self.name.clone(), self.constraint.to_string())
    }

    /// Pinned to one exact version and resolved through an index
    pub fn is_pinned(&self) -> bool {
        self.is_cacheable() && self.constraint.pinned().is_some()
    }

    /// Only index requirements have a stable name+version cache key
    pub fn is_cacheable(&self) -> bool {
        !self.editable && self.source == SourceLocator::Index && self.name.is_some()
    }

    /// Requirements up the origin chain, nearest first
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors {
            origin: &self.origin,
        }
    }

    /// Whether `name` already appears among this requirement's ancestors
    pub fn has_ancestor(&self, name: &PackageName) -> bool {
        self.ancestors().any(|parent| parent.name.as_ref() == Some(name))
    }

    /// Marker check for the target interpreter; unmarked requirements always apply
    pub fn applies_to(&self, env: &MarkerEnvironment, extras: &[String]) -> bool {
        self.marker
            .as_ref()
            .is_none_or(|marker| marker.evaluate(env, extras))
    }
}

/// Iterator over a requirement's origin chain
pub struct Ancestors<'a> {
    origin: &'a Origin,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Requirement;

    fn next(&mut self) -> Option<Self::Item> {
        match self.origin {
            Origin::Requirement(parent) => {
                self.origin = &parent.origin;
                Some(parent.as_ref())
            }
            _ => None,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.editable {
            write!(f, "-e ")?;
        }
        write!(f, "{}", self.spec())?;
        match &self.origin {
            Origin::CommandLine => Ok(()),
            origin => write!(f, " (from {})", origin),
        }
    }
}

fn classify_url(url: &str) -> SourceLocator {
    let url = url.trim();
    if VCS_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
        SourceLocator::Vcs(url.to_string())
    } else if let Some(path) = url.strip_prefix("file://") {
        SourceLocator::LocalPath(PathBuf::from(path.split('#').next().unwrap_or(path)))
    } else if let Some(path) = url.strip_prefix("file:") {
        SourceLocator::LocalPath(PathBuf::from(path.split('#').next().unwrap_or(path)))
    } else {
        SourceLocator::Url(url.to_string())
    }
}

fn looks_like_locator(line: &str) -> bool {
    let first = line.split_whitespace().next().unwrap_or(line);
    if first.contains("://") || first.starts_with("file:") {
        return true;
    }
    if VCS_SCHEMES.iter().any(|scheme| first.starts_with(scheme)) {
        return true;
    }
    if first.starts_with('.') || first.starts_with('/') || first.starts_with('~') {
        return true;
    }
    let bare = first.split(['#', ';']).next().unwrap_or(first);
    let has_operator = bare.contains(['=', '<', '>', '!', '~', '@', '[']);
    (!has_operator && bare.contains('/'))
        || ARCHIVE_SUFFIXES.iter().any(|suffix| bare.ends_with(suffix))
        || (!has_operator && Path::new(bare).is_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(line: &str) -> Requirement {
        Requirement::parse(line, Origin::CommandLine).unwrap()
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Foo__Bar.baz"), "foo-bar-baz");
        assert_eq!(PackageName::new("Pure_Python-Package").as_str(), "pure-python-package");
    }

    #[test]
    fn test_parse_name_and_constraint() {
        let r = req("Flake8 >= 2.0, <3");
        assert_eq!(r.name, Some(PackageName::new("flake8")));
        assert_eq!(r.spec(), "Flake8>=2.0,<3");
        assert!(!r.is_pinned());
        assert!(r.is_cacheable());
    }

    #[test]
    fn test_parse_pinned_with_extras_and_marker() {
        let r = req("requests[Security,socks]==2.31.0 ; python_version >= '3.7'");
        assert!(r.is_pinned());
        assert_eq!(r.extras, vec!["security".to_string(), "socks".to_string()]);
        assert!(r.marker.is_some());
        assert_eq!(r.spec(), "requests[security,socks]==2.31.0");
    }

    #[test]
    fn test_parse_parenthesized_specifier() {
        let r = req("mccabe (>=0.2.1)");
        assert_eq!(r.constraint.to_string(), ">=0.2.1");
    }

    #[test]
    fn test_parse_direct_url() {
        let r = req("pkg @ https://example.com/pkg-1.0.tar.gz");
        assert_eq!(
            r.source,
            SourceLocator::Url("https://example.com/pkg-1.0.tar.gz".to_string())
        );
        assert!(!r.is_cacheable());
        assert_eq!(r.spec(), "pkg @ https://example.com/pkg-1.0.tar.gz");
    }

    #[test]
    fn test_parse_vcs_with_egg() {
        let r = req("git+https://github.com/org/proj.git#egg=proj");
        assert!(matches!(r.source, SourceLocator::Vcs(_)));
        assert_eq!(r.name, Some(PackageName::new("proj")));
        assert!(!r.is_cacheable());
    }

    #[test]
    fn test_parse_local_path_is_unnamed() {
        let r = req("./vendor/thing");
        assert_eq!(r.name, None);
        assert_eq!(r.source, SourceLocator::LocalPath(PathBuf::from("./vendor/thing")));
    }

    #[test]
    fn test_parse_editable() {
        let r = Requirement::parse_editable("./src/pkg#egg=pkg", Origin::CommandLine).unwrap();
        assert!(r.editable);
        assert!(!r.is_cacheable());
        assert_eq!(r.to_string(), "-e ./src/pkg");
    }

    #[test]
    fn test_parse_rejects_bad_specifier() {
        assert!(Requirement::parse("foo==", Origin::CommandLine).is_err());
        assert!(Requirement::parse("foo[bar", Origin::CommandLine).is_err());
        assert!(Requirement::from_spec("").is_err());
    }

    #[test]
    fn test_display_with_origin_chain() {
        let top = Requirement::parse(
            "flake8==2.2.5",
            Origin::File {
                path: PathBuf::from("requirements.txt"),
                line: 3,
            },
        )
        .unwrap();
        let child = Requirement::parse("mccabe>=0.2.1", Origin::Requirement(Arc::new(top))).unwrap();
        assert_eq!(
            child.to_string(),
            "mccabe>=0.2.1 (from flake8==2.2.5 (from -r requirements.txt (line 3)))"
        );
        assert!(child.has_ancestor(&PackageName::new("Flake8")));
        assert!(!child.has_ancestor(&PackageName::new("mccabe")));
    }
}
