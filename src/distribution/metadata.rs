// src/distribution/metadata.rs

//! Core-metadata parsing (`METADATA`, `PKG-INFO`, `requires.txt`)

use super::{InstalledDistribution, declared_origin};
use crate::requirement::Requirement;
use crate::version::Version;

/// Parse an RFC 822 style metadata header block
///
/// Only `Name`, `Version` and `Requires-Dist` are used. For egg-info
/// distributions the declared requirements come from `requires.txt` instead.
pub fn parse_metadata(
    text: &str,
    requires_txt: Option<&str>,
) -> Result<InstalledDistribution, String> {
    let mut name = None;
    let mut version = None;
    let mut requires_dist = Vec::new();

    for (key, value) in headers(text) {
        match key.to_ascii_lowercase().as_str() {
            "name" => name = Some(value),
            "version" => version = Some(value),
            "requires-dist" => requires_dist.push(value),
            _ => {}
        }
    }

    let name = name.ok_or("missing Name header")?;
    let version = version.ok_or("missing Version header")?;
    let version = Version::parse(&version).map_err(|e| e.to_string())?;

    let mut requires = Vec::new();
    for line in &requires_dist {
        requires.push(Requirement::parse(line, declared_origin())?);
    }
    if let Some(content) = requires_txt {
        requires.extend(parse_requires_txt(content)?);
    }

    Ok(InstalledDistribution::new(&name, version).with_requires(requires))
}

/// Parse setuptools' `requires.txt`
///
/// Sections look like `[extra]`, `[extra:marker]` or `[:marker]` and gate
/// the lines that follow.
pub fn parse_requires_txt(content: &str) -> Result<Vec<Requirement>, String> {
    let mut requires = Vec::new();
    let mut section_marker: Option<String> = None;

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let (extra, marker) = match section.split_once(':') {
                Some((extra, marker)) => (extra.trim(), Some(marker.trim())),
                None => (section.trim(), None),
            };
            section_marker = match (extra.is_empty(), marker) {
                (true, None) => None,
                (true, Some(m)) => Some(m.to_string()),
                (false, None) => Some(format!("extra == \"{}\"", extra)),
                (false, Some(m)) => Some(format!("extra == \"{}\" and ({})", extra, m)),
            };
            continue;
        }

        let full = match &section_marker {
            Some(marker) => format!("{} ; {}", line, marker),
            None => line.to_string(),
        };
        requires.push(Requirement::parse(&full, declared_origin())?);
    }

    Ok(requires)
}

/// Header lines up to the first blank line, with continuations folded in
fn headers(text: &str) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = out.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            out.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirement::MarkerEnvironment;

    #[test]
    fn test_parse_metadata_headers() {
        let text = "Metadata-Version: 2.1\nName: Pure_Python_Package\nVersion: 0.2.0\n\
                    Requires-Dist: six\nRequires-Dist: pytest ; extra == 'testing'\n\nbody: not a header\n";
        let dist = parse_metadata(text, None).unwrap();
        assert_eq!(dist.name.as_str(), "pure-python-package");
        assert_eq!(dist.display_name, "Pure_Python_Package");
        assert_eq!(dist.requires.len(), 2);

        let env = MarkerEnvironment::default();
        assert_eq!(dist.requirements_for(&[], &env).len(), 1);
        assert_eq!(dist.requirements_for(&["testing".to_string()], &env).len(), 2);
    }

    #[test]
    fn test_parse_metadata_missing_version() {
        assert!(parse_metadata("Name: x\n", None).is_err());
    }

    #[test]
    fn test_parse_requires_txt_sections() {
        let content = "six\n[:python_version < '3']\nfutures\n[tls:sys_platform == 'win32']\nwincert\n";
        let reqs = parse_requires_txt(content).unwrap();
        assert_eq!(reqs.len(), 3);
        assert!(reqs[0].marker.is_none());

        let env = MarkerEnvironment::default();
        assert!(!reqs[1].applies_to(&env, &[]));
        assert!(!reqs[2].applies_to(&env, &["tls".to_string()]));
    }
}
