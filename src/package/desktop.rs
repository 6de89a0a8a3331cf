use crate::errors::*;
use crate::ini::Ini;
use crate::package::control::DebMetadata;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const DESKTOP_ENTRY: &str = "Desktop Entry";
pub const DEFAULT_CATEGORIES: &str = "Science;Office;Education;Literature";

pub const MIME_TYPES: &[&str] = &[
    "x-scheme-handler/zotero",
    "application/x-endnote-refer",
    "application/x-research-info-systems",
    "text/ris",
    "text/x-research-info-systems",
    "application/x-inst-for-Scientific-info",
    "application/mods+xml",
    "application/rdf+xml",
    "application/x-bibtex",
    "text/x-bibtex",
    "application/marc",
    "application/vnd.citationstyles.style+xml",
];

pub const MIME_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<mime-info xmlns="http://www.freedesktop.org/standards/shared-mime-info">
  <mime-type type="application/x-endnote-refer">
    <comment>EndNote Refer</comment>
    <glob pattern="*.enw"/>
  </mime-type>
  <mime-type type="application/x-research-info-systems">
    <comment>Research Information Systems</comment>
    <glob pattern="*.ris"/>
  </mime-type>
  <mime-type type="text/x-research-info-systems">
    <comment>Research Information Systems</comment>
    <sub-class-of type="text/plain"/>
  </mime-type>
  <mime-type type="application/x-inst-for-Scientific-info">
    <comment>ISI / Web of Science</comment>
    <glob pattern="*.isi"/>
  </mime-type>
  <mime-type type="application/mods+xml">
    <comment>Metadata Object Description Schema</comment>
    <sub-class-of type="application/xml"/>
    <glob pattern="*.mods"/>
  </mime-type>
  <mime-type type="application/x-bibtex">
    <comment>BibTeX</comment>
    <glob pattern="*.bib"/>
    <glob pattern="*.bibtex"/>
  </mime-type>
  <mime-type type="application/marc">
    <comment>MARC</comment>
    <glob pattern="*.mrc"/>
    <glob pattern="*.marc"/>
  </mime-type>
  <mime-type type="application/vnd.citationstyles.style+xml">
    <comment>Citation Style Language style</comment>
    <sub-class-of type="application/xml"/>
    <glob pattern="*.csl"/>
  </mime-type>
</mime-info>
"#;

const LOCAL_SETTINGS: &str = r#"pref("general.config.obscure_value", 0); // only needed if you do not want to obscure the content with ROT-13
pref("general.config.filename", "mozilla.cfg");
"#;

const MOZILLA_CFG: &str = r#"lockPref("app.update.enabled", false);
lockPref("app.update.auto", false);
"#;

async fn append(path: &Path, make_prefix: impl FnOnce(u64) -> &'static str, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| anyhow!("Failed to open file for appending: {path:?}"))?;
    let len = file.metadata().await?.len();
    file.write_all(make_prefix(len).as_bytes()).await?;
    file.write_all(text.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Enable `mozilla.cfg` and lock the built-in updater, apt takes care of updates
pub async fn disable_auto_update(app_dir: &Path) -> Result<()> {
    append(
        &app_dir.join("defaults/pref/local-settings.js"),
        |len| if len != 0 { "\n" } else { "" },
        LOCAL_SETTINGS,
    )
    .await?;

    // mozilla.cfg has to start with a comment line
    append(
        &app_dir.join("mozilla.cfg"),
        |len| if len == 0 { "//\n" } else { "\n" },
        MOZILLA_CFG,
    )
    .await?;

    Ok(())
}

/// Extract the debian section from the vendor desktop entry
pub fn section(vendor: &Ini) -> String {
    vendor
        .get(DESKTOP_ENTRY, "Categories")
        .unwrap_or(DEFAULT_CATEGORIES)
        .trim_end_matches(';')
        .to_string()
}

pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Rewrite the vendor desktop entry so it points into `/usr/lib` and registers mime handlers
pub fn desktop_entry(mut vendor: Ini, deb: &DebMetadata, has_icon128: bool) -> Ini {
    let package = &deb.package;
    vendor.set(
        DESKTOP_ENTRY,
        "Exec",
        format!("/usr/lib/{package}/{} --url %u", deb.client),
    );
    vendor.set(DESKTOP_ENTRY, "Name", capitalize(package));

    let icon = if has_icon128 {
        format!("/usr/lib/{package}/icons/icon128.png")
    } else {
        format!("/usr/lib/{package}/chrome/icons/default/default256.png")
    };
    vendor.set(DESKTOP_ENTRY, "Icon", icon);
    vendor.set(DESKTOP_ENTRY, "MimeType", MIME_TYPES.join(";"));
    vendor.set(DESKTOP_ENTRY, "Description", deb.description.clone());
    vendor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> DebMetadata {
        DebMetadata {
            client: "zotero".to_string(),
            package: "zotero-beta".to_string(),
            version: "7.1.3".to_string(),
            arch: "amd64".to_string(),
            dependencies: String::new(),
            section: "Office".to_string(),
            description: "Zotero 7.1.3".to_string(),
        }
    }

    #[tokio::test]
    async fn test_disable_auto_update_fresh() -> Result<()> {
        let dir = tempfile::tempdir()?;
        disable_auto_update(dir.path()).await?;

        let ls = fs::read_to_string(dir.path().join("defaults/pref/local-settings.js")).await?;
        assert_eq!(ls, LOCAL_SETTINGS);
        let cfg = fs::read_to_string(dir.path().join("mozilla.cfg")).await?;
        assert_eq!(cfg, format!("//\n{MOZILLA_CFG}"));
        Ok(())
    }

    #[tokio::test]
    async fn test_disable_auto_update_existing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("defaults/pref")).await?;
        fs::write(dir.path().join("defaults/pref/local-settings.js"), "pref(\"a\", 1);\n").await?;
        fs::write(dir.path().join("mozilla.cfg"), "// vendor\n").await?;
        disable_auto_update(dir.path()).await?;

        let ls = fs::read_to_string(dir.path().join("defaults/pref/local-settings.js")).await?;
        assert_eq!(ls, format!("pref(\"a\", 1);\n\n{LOCAL_SETTINGS}"));
        let cfg = fs::read_to_string(dir.path().join("mozilla.cfg")).await?;
        assert_eq!(cfg, format!("// vendor\n\n{MOZILLA_CFG}"));
        Ok(())
    }

    #[test]
    fn test_section() -> Result<()> {
        let ini = Ini::parse("[Desktop Entry]\nCategories=Office;Education;\n")?;
        assert_eq!(section(&ini), "Office;Education");
        assert_eq!(section(&Ini::default()), DEFAULT_CATEGORIES);
        Ok(())
    }

    #[test]
    fn test_desktop_entry() -> Result<()> {
        let vendor = Ini::parse("[Desktop Entry]\nName=Zotero\nExec=zotero -url %U\nIcon=zotero\nType=Application\n")?;
        let entry = desktop_entry(vendor, &metadata(), false);
        assert_eq!(entry.get(DESKTOP_ENTRY, "Name"), Some("Zotero-beta"));
        assert_eq!(
            entry.get(DESKTOP_ENTRY, "Exec"),
            Some("/usr/lib/zotero-beta/zotero --url %u")
        );
        assert_eq!(
            entry.get(DESKTOP_ENTRY, "Icon"),
            Some("/usr/lib/zotero-beta/chrome/icons/default/default256.png")
        );
        assert_eq!(entry.get(DESKTOP_ENTRY, "Type"), Some("Application"));
        assert!(entry
            .get(DESKTOP_ENTRY, "MimeType")
            .unwrap()
            .starts_with("x-scheme-handler/zotero;application/x-endnote-refer;"));
        Ok(())
    }

    #[test]
    fn test_desktop_entry_icon128() {
        let entry = desktop_entry(Ini::default(), &metadata(), true);
        assert_eq!(
            entry.get(DESKTOP_ENTRY, "Icon"),
            Some("/usr/lib/zotero-beta/icons/icon128.png")
        );
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("jurism"), "Jurism");
        assert_eq!(capitalize(""), "");
    }
}
