//! Boot loader configuration rewrites on a copied medium tree.

use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;

pub const XMLBOOT_CONFIG: &str = "xmlboot.config";
const EXITHELP_CONFIG: &str = "exithelp.cfg";
const BOOT_CATALOG: &str = "boot.cat";

/// CD (`isolinux`) or USB (`syslinux`) flavour of the boot loader files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderKind {
    Isolinux,
    Syslinux,
}

impl LoaderKind {
    pub fn name(&self) -> &'static str {
        match self {
            LoaderKind::Isolinux => "isolinux",
            LoaderKind::Syslinux => "syslinux",
        }
    }

    pub fn config_file(&self) -> String {
        format!("{}.cfg", self.name())
    }

    pub fn binary_file(&self) -> String {
        format!("{}.bin", self.name())
    }
}

/// Force `selected="<selected>"` on the `<option id="<id>">` element.
///
/// The attribute is added when missing. Content without such an option is
/// returned unchanged.
pub fn set_option_selected(content: &str, id: &str, selected: bool) -> Result<String> {
    let tag = Regex::new(&format!(
        r#"<option\b[^>]*\bid\s*=\s*"{}"[^>]*>"#,
        regex::escape(id)
    ))?;
    let attr = Regex::new(r#"\bselected\s*=\s*"[^"]*""#)?;
    let value = format!(r#"selected="{}""#, selected);

    let updated = tag.replace_all(content, |caps: &regex::Captures| {
        let element = &caps[0];
        if attr.is_match(element) {
            attr.replace(element, value.as_str()).into_owned()
        } else {
            let close = if element.ends_with("/>") { 2 } else { 1 };
            let (head, tail) = element.split_at(element.len() - close);
            format!("{} {}{}", head.trim_end(), value, tail)
        }
    });
    Ok(updated.into_owned())
}

/// Select the persistence boot option (`persistent`) or the live-only one.
///
/// Returns `false` when the loader directory has no `xmlboot.config`.
pub fn set_boot_flags(loader_dir: &Path, persistent: bool) -> Result<bool> {
    let path = loader_dir.join(XMLBOOT_CONFIG);
    if !path.exists() {
        log::warn!(
            "No {} in {}, boot flags left unchanged",
            XMLBOOT_CONFIG,
            loader_dir.display()
        );
        return Ok(false);
    }
    let content =
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let updated = set_option_selected(&content, "persistence", persistent)?;
    let updated = set_option_selected(&updated, "live-only", !persistent)?;
    if updated != content {
        fs::write(&path, updated).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    log::info!(
        "Boot flags in {}: persistence={} live-only={}",
        path.display(),
        persistent,
        !persistent
    );
    Ok(true)
}

fn rename_if_present(from: &Path, to: &Path) -> Result<()> {
    if from.exists() {
        fs::rename(from, to).with_context(|| {
            format!("Failed to rename {} -> {}", from.display(), to.display())
        })?;
    }
    Ok(())
}

/// Convert the loader files below `root` from `from` to `to`.
///
/// Returns `false` without touching anything when `root` has no `from`
/// directory.
pub fn convert_loader(root: &Path, from: LoaderKind, to: LoaderKind) -> Result<bool> {
    let src_dir = root.join(from.name());
    if !src_dir.is_dir() {
        log::info!(
            "No {} directory in {}, loader conversion skipped",
            from.name(),
            root.display()
        );
        return Ok(false);
    }
    let dst_dir = root.join(to.name());
    rename_if_present(&src_dir, &dst_dir)?;
    rename_if_present(
        &dst_dir.join(from.config_file()),
        &dst_dir.join(to.config_file()),
    )?;
    rename_if_present(
        &dst_dir.join(from.binary_file()),
        &dst_dir.join(to.binary_file()),
    )?;

    for name in [to.config_file().as_str(), EXITHELP_CONFIG, XMLBOOT_CONFIG] {
        let path = dst_dir.join(name);
        if !path.exists() {
            continue;
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let updated = content.replace(from.name(), to.name());
        if updated != content {
            fs::write(&path, updated)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
    }

    // A stale El Torito catalog is useless on USB and regenerated for ISOs.
    let catalog = dst_dir.join(BOOT_CATALOG);
    if catalog.exists() {
        fs::remove_file(&catalog)
            .with_context(|| format!("Failed to remove {}", catalog.display()))?;
    }

    log::info!(
        "Converted {} -> {} in {}",
        from.name(),
        to.name(),
        root.display()
    );
    Ok(true)
}

pub fn isolinux_to_syslinux(root: &Path) -> Result<bool> {
    convert_loader(root, LoaderKind::Isolinux, LoaderKind::Syslinux)
}

pub fn syslinux_to_isolinux(root: &Path) -> Result<bool> {
    convert_loader(root, LoaderKind::Syslinux, LoaderKind::Isolinux)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const XMLBOOT: &str = r#"<xmlboot>
  <options>
    <option id="persistence" selected="false"/>
    <option id="live-only" selected="true" />
    <option id="splash"/>
  </options>
</xmlboot>
"#;

    #[test]
    fn set_option_selected_replaces_and_inserts() {
        let out = set_option_selected(XMLBOOT, "persistence", true).unwrap();
        assert!(out.contains(r#"<option id="persistence" selected="true"/>"#));

        let out = set_option_selected(&out, "splash", false).unwrap();
        assert!(out.contains(r#"<option id="splash" selected="false"/>"#));

        // Unknown ids leave the document alone.
        assert_eq!(set_option_selected(XMLBOOT, "nope", true).unwrap(), XMLBOOT);
    }

    #[test]
    fn boot_flags_for_persistent_copy() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(XMLBOOT_CONFIG), XMLBOOT).unwrap();
        assert!(set_boot_flags(dir.path(), true).unwrap());
        let out = fs::read_to_string(dir.path().join(XMLBOOT_CONFIG)).unwrap();
        assert!(out.contains(r#"id="persistence" selected="true""#));
        assert!(out.contains(r#"id="live-only" selected="false""#));
    }

    #[test]
    fn missing_xmlboot_is_not_an_error() {
        let dir = tempdir().unwrap();
        assert!(!set_boot_flags(dir.path(), true).unwrap());
    }

    #[test]
    fn isolinux_tree_becomes_syslinux() {
        let dir = tempdir().unwrap();
        let iso = dir.path().join("isolinux");
        fs::create_dir_all(&iso).unwrap();
        fs::write(iso.join("isolinux.cfg"), "include isolinux/menu.cfg\n").unwrap();
        fs::write(iso.join("isolinux.bin"), [0u8; 8]).unwrap();
        fs::write(iso.join("exithelp.cfg"), "config isolinux.cfg\n").unwrap();
        fs::write(iso.join("boot.cat"), [0u8; 8]).unwrap();

        assert!(isolinux_to_syslinux(dir.path()).unwrap());

        let sys = dir.path().join("syslinux");
        assert!(!iso.exists());
        assert!(sys.join("syslinux.bin").exists());
        assert!(!sys.join("boot.cat").exists());
        assert_eq!(
            fs::read_to_string(sys.join("syslinux.cfg")).unwrap(),
            "include syslinux/menu.cfg\n"
        );
        assert_eq!(
            fs::read_to_string(sys.join("exithelp.cfg")).unwrap(),
            "config syslinux.cfg\n"
        );

        // And back again for the ISO pipeline.
        assert!(syslinux_to_isolinux(dir.path()).unwrap());
        assert!(dir.path().join("isolinux/isolinux.cfg").exists());
    }

    #[test]
    fn conversion_without_loader_dir_is_skipped() {
        let dir = tempdir().unwrap();
        assert!(!isolinux_to_syslinux(dir.path()).unwrap());
    }
}
