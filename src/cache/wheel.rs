// src/cache/wheel.rs

//! Binary artifact filenames
//!
//! Artifacts follow `{name}-{version}(-{build})?-{python}-{abi}-{platform}.whl`.
//! Each tag component may hold several dot-separated values
//! (`py2.py3-none-any`), which expand to one [`CompatTag`] per combination.

use crate::requirement::PackageName;
use crate::version::Version;
use std::fmt;

/// One interpreter/ABI/platform triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompatTag {
    pub python: String,
    pub abi: String,
    pub platform: String,
}

impl CompatTag {
    pub fn new(python: &str, abi: &str, platform: &str) -> Self {
        Self {
            python: python.to_ascii_lowercase(),
            abi: abi.to_ascii_lowercase(),
            platform: platform.to_ascii_lowercase(),
        }
    }

    /// Parse a `python-abi-platform` triple with no compressed sets
    pub fn parse(tag: &str) -> Option<Self> {
        let mut parts = tag.split('-');
        let (python, abi, platform) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || python.is_empty() || abi.is_empty() || platform.is_empty() {
            return None;
        }
        Some(Self::new(python, abi, platform))
    }
}

impl fmt::Display for CompatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.python, self.abi, self.platform)
    }
}

/// A parsed artifact filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelFilename {
    pub name: PackageName,
    pub version: Version,
    pub build: Option<String>,
    pub tags: Vec<CompatTag>,
}

impl WheelFilename {
    pub fn parse(filename: &str) -> Result<Self, String> {
        let stem = filename
            .strip_suffix(".whl")
            .ok_or_else(|| format!("'{}' is not a .whl file", filename))?;

        let parts: Vec<&str> = stem.split('-').collect();
        let (name, version, build, tag_parts) = match parts.as_slice() {
            [name, version, python, abi, platform] => (*name, *version, None, [*python, *abi, *platform]),
            [name, version, build, python, abi, platform] => {
                (*name, *version, Some(build.to_string()), [*python, *abi, *platform])
            }
            _ => return Err(format!("'{}' does not have 5 or 6 dash-separated fields", filename)),
        };

        let version = Version::parse(version).map_err(|e| e.to_string())?;

        let [python, abi, platform] = tag_parts;
        let mut tags = Vec::new();
        for py in python.split('.') {
            for ab in abi.split('.') {
                for plat in platform.split('.') {
                    tags.push(CompatTag::new(py, ab, plat));
                }
            }
        }

        Ok(Self {
            name: PackageName::new(name),
            version,
            build,
            tags,
        })
    }

    /// Best (lowest) position of any of this artifact's tags in `supported`
    ///
    /// An empty `supported` list accepts every tag at equal priority.
    pub fn tag_priority(&self, supported: &[CompatTag]) -> Option<usize> {
        if supported.is_empty() {
            return Some(0);
        }
        self.tags
            .iter()
            .filter_map(|tag| supported.iter().position(|s| s == tag))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compressed_tags() {
        let wheel = WheelFilename::parse("Pure_Python-1.0-py2.py3-none-any.whl").unwrap();
        assert_eq!(wheel.name, PackageName::new("pure-python"));
        assert_eq!(wheel.version, Version::parse("1.0").unwrap());
        assert_eq!(wheel.build, None);
        assert_eq!(
            wheel.tags,
            vec![
                CompatTag::new("py2", "none", "any"),
                CompatTag::new("py3", "none", "any"),
            ]
        );
    }

    #[test]
    fn test_parse_build_tag() {
        let wheel =
            WheelFilename::parse("simplejson-3.6.5-1-cp312-cp312-manylinux_2_17_x86_64.whl")
                .unwrap();
        assert_eq!(wheel.build.as_deref(), Some("1"));
        assert_eq!(wheel.tags.len(), 1);
    }

    #[test]
    fn test_parse_rejects_non_artifacts() {
        assert!(WheelFilename::parse("pkg-1.0.tar.gz").is_err());
        assert!(WheelFilename::parse("pkg-1.0-any.whl").is_err());
        assert!(WheelFilename::parse("pkg-notaversion-py3-none-any.whl").is_err());
    }

    #[test]
    fn test_tag_priority() {
        let supported = vec![
            CompatTag::new("cp312", "cp312", "linux_x86_64"),
            CompatTag::new("py3", "none", "any"),
        ];
        let native = WheelFilename::parse("x-1.0-cp312-cp312-linux_x86_64.whl").unwrap();
        let pure = WheelFilename::parse("x-1.0-py2.py3-none-any.whl").unwrap();
        let foreign = WheelFilename::parse("x-1.0-cp27-cp27mu-linux_i686.whl").unwrap();

        assert_eq!(native.tag_priority(&supported), Some(0));
        assert_eq!(pure.tag_priority(&supported), Some(1));
        assert_eq!(foreign.tag_priority(&supported), None);
        assert_eq!(foreign.tag_priority(&[]), Some(0));
    }

    #[test]
    fn test_compat_tag_parse() {
        assert_eq!(
            CompatTag::parse("py3-none-any"),
            Some(CompatTag::new("py3", "none", "any"))
        );
        assert_eq!(CompatTag::parse("py3-none"), None);
    }
}
