// src/version/mod.rs

//! Version handling and constraint satisfaction for package requirements
//!
//! This module provides PEP 440 version parsing and comparison, plus the
//! specifier sets used by requirement lines (`>=1.0,<2`, `==1.4.*`, `~=2.2`).

use crate::error::{Error, Result};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)^\s*v?
        (?:(?P<epoch>[0-9]+)!)?
        (?P<release>[0-9]+(?:\.[0-9]+)*)
        (?:[-_.]?(?P<pre_l>alpha|a|beta|b|preview|pre|c|rc)[-_.]?(?P<pre_n>[0-9]+)?)?
        (?:-(?P<post_n1>[0-9]+)|[-_.]?(?P<post_l>post|rev|r)[-_.]?(?P<post_n2>[0-9]+)?)?
        (?:[-_.]?(?P<dev_l>dev)[-_.]?(?P<dev_n>[0-9]+)?)?
        (?:\+(?P<local>[a-z0-9]+(?:[-_.][a-z0-9]+)*))?
        \s*$",
    )
    .expect("version regex is valid")
});

/// Pre-release phase, in sort order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreRelease {
    Alpha,
    Beta,
    Rc,
}

impl PreRelease {
    fn parse(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "a" | "alpha" => Self::Alpha,
            "b" | "beta" => Self::Beta,
            _ => Self::Rc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alpha => "a",
            Self::Beta => "b",
            Self::Rc => "rc",
        }
    }
}

/// One dot-separated segment of a local version label
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocalSegment {
    Number(u64),
    Text(String),
}

impl Ord for LocalSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            // numeric segments sort above alphanumeric ones
            (Self::Number(_), Self::Text(_)) => Ordering::Greater,
            (Self::Text(_), Self::Number(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for LocalSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed PEP 440 version
///
/// Format: `[N!]N(.N)*[{a|b|rc}N][.postN][.devN][+local]`
/// Examples:
/// - "1.2.3" → release=[1, 2, 3]
/// - "2!1.0" → epoch=2, release=[1, 0]
/// - "1.0rc1" → release=[1, 0], pre=(Rc, 1)
/// - "1.0.post2.dev3+ubuntu.1" → post=2, dev=3, local=[ubuntu, 1]
#[derive(Debug, Clone)]
pub struct Version {
    pub epoch: u64,
    pub release: Vec<u64>,
    pub pre: Option<(PreRelease, u64)>,
    pub post: Option<u64>,
    pub dev: Option<u64>,
    pub local: Vec<LocalSegment>,
}

impl Version {
    /// Parse a version string
    pub fn parse(s: &str) -> Result<Self> {
        let caps = VERSION_RE.captures(s).ok_or_else(|| Error::InvalidVersion {
            input: s.to_string(),
            reason: "not a PEP 440 version".to_string(),
        })?;

        let number = |name: &str| -> Result<Option<u64>> {
            caps.name(name)
                .map(|m| {
                    m.as_str().parse::<u64>().map_err(|e| Error::InvalidVersion {
                        input: s.to_string(),
                        reason: e.to_string(),
                    })
                })
                .transpose()
        };

        let epoch = number("epoch")?.unwrap_or(0);
        let release = caps["release"]
            .split('.')
            .map(|part| {
                part.parse::<u64>().map_err(|e| Error::InvalidVersion {
                    input: s.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let pre = match caps.name("pre_l") {
            Some(label) => Some((PreRelease::parse(label.as_str()), number("pre_n")?.unwrap_or(0))),
            None => None,
        };

        let post = if caps.name("post_n1").is_some() {
            number("post_n1")?
        } else if caps.name("post_l").is_some() {
            Some(number("post_n2")?.unwrap_or(0))
        } else {
            None
        };

        let dev = if caps.name("dev_l").is_some() {
            Some(number("dev_n")?.unwrap_or(0))
        } else {
            None
        };

        let local = caps
            .name("local")
            .map(|m| {
                m.as_str()
                    .split(['.', '-', '_'])
                    .map(|seg| match seg.parse::<u64>() {
                        Ok(n) => LocalSegment::Number(n),
                        Err(_) => LocalSegment::Text(seg.to_ascii_lowercase()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }

    /// The same version without its local label
    pub fn public(&self) -> Self {
        Self {
            local: Vec::new(),
            ..self.clone()
        }
    }

    /// Release segments with trailing zeros removed, for comparison
    fn release_key(&self) -> &[u64] {
        let end = self
            .release
            .iter()
            .rposition(|&n| n != 0)
            .map_or(0, |i| i + 1);
        &self.release[..end]
    }

    /// Compare two versions following PEP 440 ordering
    pub fn compare(&self, other: &Version) -> Ordering {
        // First compare epochs
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match self.release_key().cmp(other.release_key()) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match self.pre_key().cmp(&other.pre_key()) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match self.post.cmp(&other.post) {
            Ordering::Equal => {}
            ord => return ord,
        }

        // A release without a dev segment sorts after its dev releases
        let dev_cmp = match (self.dev, other.dev) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(&b),
        };
        match dev_cmp {
            Ordering::Equal => {}
            ord => return ord,
        }

        // Finally compare local labels (absent sorts first)
        self.local.cmp(&other.local)
    }

    /// Sort key for the pre-release component
    ///
    /// `1.0.dev1` sorts before `1.0a1`, which sorts before `1.0`.
    fn pre_key(&self) -> (u8, Option<(PreRelease, u64)>) {
        match (self.pre, self.post, self.dev) {
            (None, None, Some(_)) => (0, None),
            (Some(pre), _, _) => (1, Some(pre)),
            (None, _, _) => (2, None),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release: Vec<String> = self.release.iter().map(u64::to_string).collect();
        write!(f, "{}", release.join("."))?;
        if let Some((phase, n)) = self.pre {
            write!(f, "{}{}", phase.as_str(), n)?;
        }
        if let Some(post) = self.post {
            write!(f, ".post{}", post)?;
        }
        if let Some(dev) = self.dev {
            write!(f, ".dev{}", dev)?;
        }
        if !self.local.is_empty() {
            let local: Vec<String> = self
                .local
                .iter()
                .map(|seg| match seg {
                    LocalSegment::Number(n) => n.to_string(),
                    LocalSegment::Text(s) => s.clone(),
                })
                .collect();
            write!(f, "+{}", local.join("."))?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Specifier comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `~=`
    Compatible,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<=`
    LessOrEqual,
    /// `>=`
    GreaterOrEqual,
    /// `<`
    LessThan,
    /// `>`
    GreaterThan,
    /// `===`
    Arbitrary,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compatible => "~=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessOrEqual => "<=",
            Self::GreaterOrEqual => ">=",
            Self::LessThan => "<",
            Self::GreaterThan => ">",
            Self::Arbitrary => "===",
        }
    }

    /// Split a leading operator off a specifier string
    fn split(s: &str) -> Option<(Self, &str)> {
        // longest operators first
        const OPERATORS: [(&str, Operator); 8] = [
            ("===", Operator::Arbitrary),
            ("~=", Operator::Compatible),
            ("==", Operator::Equal),
            ("!=", Operator::NotEqual),
            ("<=", Operator::LessOrEqual),
            (">=", Operator::GreaterOrEqual),
            ("<", Operator::LessThan),
            (">", Operator::GreaterThan),
        ];
        OPERATORS
            .iter()
            .find_map(|(text, op)| s.strip_prefix(text).map(|rest| (*op, rest.trim())))
    }
}

/// A single `operator version` clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specifier {
    pub operator: Operator,
    /// The version text as written (needed for `===` and `.*` prefixes)
    pub raw: String,
    /// Parsed version; for `==X.*` this is `X`
    pub version: Option<Version>,
    pub wildcard: bool,
}

impl Specifier {
    /// Parse one clause such as `>=1.0` or `== 1.4.*`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = |reason: &str| Error::InvalidVersion {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let (operator, rest) = Operator::split(s).ok_or_else(|| invalid("missing operator"))?;
        if rest.is_empty() {
            return Err(invalid("missing version"));
        }

        if operator == Operator::Arbitrary {
            return Ok(Self {
                operator,
                raw: rest.to_string(),
                version: Version::parse(rest).ok(),
                wildcard: false,
            });
        }

        let (text, wildcard) = match rest.strip_suffix(".*") {
            Some(prefix) => (prefix, true),
            None => (rest, false),
        };
        if wildcard && !matches!(operator, Operator::Equal | Operator::NotEqual) {
            return Err(invalid("wildcards are only allowed with == and !="));
        }

        let version = Version::parse(text)?;
        if operator == Operator::Compatible && version.release.len() < 2 {
            return Err(invalid("~= requires at least two release segments"));
        }

        Ok(Self {
            operator,
            raw: rest.to_string(),
            version: Some(version),
            wildcard,
        })
    }

    /// Check if a version satisfies this clause
    pub fn contains(&self, candidate: &Version) -> bool {
        let Some(version) = &self.version else {
            // `===` against something that is not a PEP 440 version
            return self.operator == Operator::Arbitrary
                && self.raw.eq_ignore_ascii_case(&candidate.to_string());
        };

        match self.operator {
            Operator::Equal if self.wildcard => prefix_match(version, candidate),
            Operator::NotEqual if self.wildcard => !prefix_match(version, candidate),
            Operator::Equal => equal_match(version, candidate),
            Operator::NotEqual => !equal_match(version, candidate),
            Operator::Compatible => {
                let mut prefix = version.public();
                prefix.release.pop();
                prefix.pre = None;
                prefix.post = None;
                prefix.dev = None;
                candidate.public() >= version.public() && prefix_match(&prefix, candidate)
            }
            Operator::LessOrEqual => candidate.public() <= *version,
            Operator::GreaterOrEqual => candidate.public() >= *version,
            Operator::LessThan => candidate.public() < *version,
            Operator::GreaterThan => candidate.public() > *version,
            Operator::Arbitrary => self.raw.eq_ignore_ascii_case(&candidate.to_string()),
        }
    }
}

/// `==V` ignores the candidate's local label unless V has one
fn equal_match(version: &Version, candidate: &Version) -> bool {
    if version.local.is_empty() {
        candidate.public() == *version
    } else {
        candidate == version
    }
}

/// `==V.*`: epoch equal and the release starts with V's release segments
fn prefix_match(prefix: &Version, candidate: &Version) -> bool {
    if prefix.epoch != candidate.epoch {
        return false;
    }
    prefix.release.iter().enumerate().all(|(i, &segment)| {
        candidate.release.get(i).copied().unwrap_or(0) == segment
    })
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.operator.as_str(), self.raw)
    }
}

/// A conjunction of specifiers; empty means any version is acceptable
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionConstraint {
    specifiers: Vec<Specifier>,
}

impl VersionConstraint {
    /// The unconstrained set
    pub fn any() -> Self {
        Self::default()
    }

    /// Parse a version constraint string
    ///
    /// Examples:
    /// - ">=1.2.3" → one clause
    /// - ">= 1.0, < 2.0" → both must hold
    /// - "" or "*" → any version
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.is_empty() || s == "*" {
            return Ok(Self::any());
        }

        let specifiers = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Specifier::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { specifiers })
    }

    /// Check if a version satisfies every clause
    pub fn satisfies(&self, version: &Version) -> bool {
        self.specifiers.iter().all(|spec| spec.contains(version))
    }

    pub fn is_any(&self) -> bool {
        self.specifiers.is_empty()
    }

    /// The exact version this constraint pins, if it is a single `==`/`===`
    pub fn pinned(&self) -> Option<&Version> {
        match self.specifiers.as_slice() {
            [spec] if !spec.wildcard
                && matches!(spec.operator, Operator::Equal | Operator::Arbitrary) =>
            {
                spec.version.as_ref()
            }
            _ => None,
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.specifiers.iter().map(Specifier::to_string).collect();
        write!(f, "{}", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_version_parse_simple() {
        let ver = v("1.2.3");
        assert_eq!(ver.epoch, 0);
        assert_eq!(ver.release, vec![1, 2, 3]);
        assert_eq!(ver.pre, None);
    }

    #[test]
    fn test_version_parse_with_epoch() {
        let ver = v("2!1.2.3");
        assert_eq!(ver.epoch, 2);
        assert_eq!(ver.release, vec![1, 2, 3]);
    }

    #[test]
    fn test_version_parse_full() {
        let ver = v("1.0rc2.post3.dev4+Ubuntu-1");
        assert_eq!(ver.pre, Some((PreRelease::Rc, 2)));
        assert_eq!(ver.post, Some(3));
        assert_eq!(ver.dev, Some(4));
        assert_eq!(
            ver.local,
            vec![LocalSegment::Text("ubuntu".into()), LocalSegment::Number(1)]
        );
    }

    #[test]
    fn test_version_parse_rejects_garbage() {
        assert!(Version::parse("not-a-version").is_err());
        assert!(Version::parse("").is_err());
    }

    #[test]
    fn test_version_compare_epochs() {
        assert!(v("1!1.0") > v("2.0")); // Higher epoch wins even with lower version
    }

    #[test]
    fn test_version_trailing_zeros_are_equal() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert!(v("1.0.1") > v("1.0"));
    }

    #[test]
    fn test_version_prerelease_ordering() {
        let ordered = ["1.0.dev1", "1.0a1", "1.0b2", "1.0rc1", "1.0", "1.0.post1", "1.1"];
        for pair in ordered.windows(2) {
            assert!(v(pair[0]) < v(pair[1]), "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_version_display_normalizes() {
        assert_eq!(v("1.0-1").to_string(), "1.0.post1");
        assert_eq!(v("2!1.0alpha3").to_string(), "2!1.0a3");
    }

    #[test]
    fn test_version_constraint_parse_exact() {
        let c = VersionConstraint::parse("==1.2.3").unwrap();
        assert!(c.satisfies(&v("1.2.3")));
        assert!(!c.satisfies(&v("1.2.4")));
        assert_eq!(c.pinned(), Some(&v("1.2.3")));
    }

    #[test]
    fn test_version_constraint_greater_or_equal() {
        let c = VersionConstraint::parse(">= 0.2.1").unwrap();
        assert!(c.satisfies(&v("0.2.1")));
        assert!(c.satisfies(&v("0.3")));
        assert!(!c.satisfies(&v("0.2")));
        assert_eq!(c.pinned(), None);
    }

    #[test]
    fn test_version_constraint_and() {
        let c = VersionConstraint::parse(">=1.0.0, <2.0.0").unwrap();
        assert!(c.satisfies(&v("1.5.0")));
        assert!(!c.satisfies(&v("2.0.0")));
        assert!(!c.satisfies(&v("0.9.0")));
    }

    #[test]
    fn test_version_constraint_wildcard() {
        let c = VersionConstraint::parse("==1.4.*").unwrap();
        assert!(c.satisfies(&v("1.4")));
        assert!(c.satisfies(&v("1.4.7")));
        assert!(!c.satisfies(&v("1.5")));
        assert_eq!(c.pinned(), None);
    }

    #[test]
    fn test_version_constraint_compatible() {
        let c = VersionConstraint::parse("~=2.2").unwrap();
        assert!(c.satisfies(&v("2.2")));
        assert!(c.satisfies(&v("2.9")));
        assert!(!c.satisfies(&v("3.0")));
        assert!(VersionConstraint::parse("~=2").is_err());
    }

    #[test]
    fn test_version_constraint_local_labels() {
        let c = VersionConstraint::parse("==1.0").unwrap();
        assert!(c.satisfies(&v("1.0+local.7")));
        let strict = VersionConstraint::parse("==1.0+local.7").unwrap();
        assert!(!strict.satisfies(&v("1.0")));
    }

    #[test]
    fn test_version_constraint_any() {
        let c = VersionConstraint::parse("").unwrap();
        assert!(c.is_any());
        assert!(c.satisfies(&v("99.99.99")));
    }

    #[test]
    fn test_version_constraint_display() {
        let c = VersionConstraint::parse(">= 1.0.0, < 2.0.0").unwrap();
        assert_eq!(c.to_string(), ">=1.0.0,<2.0.0");
    }
}
