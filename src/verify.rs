use crate::errors::*;
use crate::exec;
use crate::package::control;
use crate::release;
use crate::repo::{self, RepositoryIndex};
use crate::version;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::process::Command;

#[derive(Debug, PartialEq)]
pub enum Violation {
    Filename {
        deb: PathBuf,
        reason: String,
    },
    Control {
        deb: PathBuf,
        field: &'static str,
        expected: String,
        found: Option<String>,
    },
    ByHash {
        section: String,
        path: String,
    },
    Bumps {
        package: String,
        arch: String,
        upstream: String,
        versions: Vec<String>,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, w: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Violation::Filename { deb, reason } => write!(w, "{deb:?}: {reason}"),
            Violation::Control {
                deb,
                field,
                expected,
                found: Some(found),
            } => write!(w, "{deb:?}: {field} is {found:?}, filename says {expected:?}"),
            Violation::Control {
                deb,
                field,
                expected,
                found: None,
            } => write!(w, "{deb:?}: {field} is missing, filename says {expected:?}"),
            Violation::ByHash { section, path } => {
                write!(w, "{path:?} has no by-hash/{section} copy")
            }
            Violation::Bumps {
                package,
                arch,
                upstream,
                versions,
            } => write!(
                w,
                "{package} {upstream} ({arch}) is packaged more than once: {}",
                versions.join(", ")
            ),
        }
    }
}

/// Compare the control fields of a package with the components of its filename
pub fn check_control(deb: &Path, fields: &str) -> Vec<Violation> {
    let name = deb
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (package, version, arch) = match release::parse_deb_filename(&name) {
        Ok(parts) => parts,
        Err(err) => {
            return vec![Violation::Filename {
                deb: deb.to_owned(),
                reason: format!("{err:#}"),
            }]
        }
    };
    let fields = match control::parse_paragraph(fields) {
        Ok(fields) => fields,
        Err(err) => {
            return vec![Violation::Filename {
                deb: deb.to_owned(),
                reason: format!("Failed to parse control fields: {err:#}"),
            }]
        }
    };

    [
        ("Package", package),
        ("Version", version),
        ("Architecture", arch),
    ]
    .into_iter()
    .filter_map(|(field, expected)| {
        let found = fields.get(field);
        if found.map(String::as_str) == Some(expected) {
            None
        } else {
            Some(Violation::Control {
                deb: deb.to_owned(),
                field,
                expected: expected.to_string(),
                found: found.cloned(),
            })
        }
    })
    .collect()
}

/// Every upstream version may only be in the repository with a single bump suffix
pub fn check_bumps(debs: &[PathBuf]) -> Vec<Violation> {
    let mut groups = BTreeMap::<_, BTreeSet<_>>::new();
    for deb in debs {
        let Some(name) = deb.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        // malformed names are reported by check_control
        let Ok((package, version, arch)) = release::parse_deb_filename(name) else {
            continue;
        };
        let (upstream, _bump) = version::unbumped(version);
        groups
            .entry((package.to_string(), arch.to_string(), upstream.to_string()))
            .or_default()
            .insert(version.to_string());
    }

    groups
        .into_iter()
        .filter(|(_, versions)| versions.len() > 1)
        .map(|((package, arch, upstream), versions)| Violation::Bumps {
            package,
            arch,
            upstream,
            versions: versions.into_iter().collect(),
        })
        .collect()
}

pub async fn verify(dir: &Path) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();

    let debs = repo::prebuilt(dir).await?;
    info!("Verifying {} packages in {dir:?}", debs.len());
    for deb in &debs {
        let fields = exec::output(
            Command::new("dpkg-deb")
                .arg("-f")
                .arg(deb)
                .args(["Version", "Package", "Architecture"]),
        )
        .await?;
        violations.extend(check_control(deb, &String::from_utf8_lossy(&fields)));
    }
    violations.extend(check_bumps(&debs));

    let index = RepositoryIndex::load(dir).await?;
    for (algo, path) in index.missing_by_hash().await {
        violations.push(Violation::ByHash {
            section: algo.section().to_string(),
            path,
        });
    }

    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_matches() {
        let deb = Path::new("repo/zotero-beta_7.1-beta.3+9a1c_amd64.deb");
        let fields = "Version: 7.1-beta.3+9a1c\nPackage: zotero-beta\nArchitecture: amd64\n";
        assert_eq!(check_control(deb, fields), vec![]);
    }

    #[test]
    fn test_control_version_mismatch() {
        let deb = Path::new("repo/zotero_7.0.11-1_amd64.deb");
        let fields = "Version: 7.0.11\nPackage: zotero\nArchitecture: amd64\n";
        let violations = check_control(deb, fields);
        assert_eq!(
            violations,
            vec![Violation::Control {
                deb: deb.to_owned(),
                field: "Version",
                expected: "7.0.11-1".to_string(),
                found: Some("7.0.11".to_string()),
            }]
        );
        assert_eq!(
            violations[0].to_string(),
            r#""repo/zotero_7.0.11-1_amd64.deb": Version is "7.0.11", filename says "7.0.11-1""#
        );
    }

    #[test]
    fn test_control_missing_field() {
        let deb = Path::new("repo/jurism_6.0.30m3_i386.deb");
        let fields = "Version: 6.0.30m3\nPackage: jurism\n";
        let violations = check_control(deb, fields);
        assert_eq!(violations.len(), 1);
        assert!(matches!(
            &violations[0],
            Violation::Control { field: "Architecture", found: None, .. }
        ));
    }

    #[test]
    fn test_duplicate_bumps() {
        let repo = Path::new("repo");
        let debs = vec![
            repo.join("zotero_6.0.26-1_amd64.deb"),
            repo.join("zotero_6.0.26_amd64.deb"),
            repo.join("zotero_6.0.26_i386.deb"),
            repo.join("zotero_6.0.27-1_amd64.deb"),
            repo.join("jurism_6.0.26_amd64.deb"),
            repo.join("zotero.deb"),
        ];
        let violations = check_bumps(&debs);
        assert_eq!(
            violations,
            vec![Violation::Bumps {
                package: "zotero".to_string(),
                arch: "amd64".to_string(),
                upstream: "6.0.26".to_string(),
                versions: vec!["6.0.26".to_string(), "6.0.26-1".to_string()],
            }]
        );
        assert_eq!(
            violations[0].to_string(),
            "zotero 6.0.26 (amd64) is packaged more than once: 6.0.26, 6.0.26-1"
        );
    }

    #[test]
    fn test_bad_filename() {
        let violations = check_control(Path::new("repo/zotero.deb"), "");
        assert!(matches!(&violations[..], [Violation::Filename { .. }]));
    }
}
