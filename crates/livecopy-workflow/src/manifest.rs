//! `md5sum.txt` for a medium tree.

use anyhow::{Context, Result};
use md5::{Digest, Md5};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const MANIFEST_FILE: &str = "md5sum.txt";

const HEADER: &str = "This file contains the list of md5 checksums of all files on this medium.\n\
\n\
You can verify them automatically with the 'integrity-check' boot parameter,\n\
or, manually with: 'md5sum -c md5sum.txt'.\n\
\n";

/// Files that change when the image is mastered and so cannot be checked.
fn is_excluded(rel: &Path) -> bool {
    rel == Path::new("isolinux/isolinux.bin")
        || rel == Path::new(MANIFEST_FILE)
        || rel.file_name().is_some_and(|n| n == "stage2_eltorito")
}

fn md5_file(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Md5::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Checksum every regular file below `root` and write `root/md5sum.txt`.
///
/// Returns the number of listed files.
pub fn write_manifest(root: &Path) -> Result<usize> {
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} escapes {}", entry.path().display(), root.display()))?
            .to_path_buf();
        if !is_excluded(&rel) {
            files.push(rel);
        }
    }
    files.sort();

    let target = root.join(MANIFEST_FILE);
    let mut out = fs::File::create(&target)
        .with_context(|| format!("Failed to create {}", target.display()))?;
    out.write_all(HEADER.as_bytes())?;
    for rel in &files {
        let sum = md5_file(&root.join(rel))?;
        writeln!(out, "{}  ./{}", sum, rel.display())?;
    }
    out.sync_all()?;
    log::info!("Wrote {} ({} files)", target.display(), files.len());
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn manifest_lists_sorted_files_with_exclusions() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("isolinux")).unwrap();
        fs::create_dir_all(root.join("live")).unwrap();
        fs::create_dir_all(root.join("boot/grub")).unwrap();
        fs::write(root.join("live/vmlinuz"), b"").unwrap();
        fs::write(root.join("isolinux/isolinux.bin"), b"boot").unwrap();
        fs::write(root.join("isolinux/isolinux.cfg"), b"abc").unwrap();
        fs::write(root.join("boot/grub/stage2_eltorito"), b"x").unwrap();
        fs::write(root.join(MANIFEST_FILE), b"stale").unwrap();

        assert_eq!(write_manifest(root).unwrap(), 2);

        let content = fs::read_to_string(root.join(MANIFEST_FILE)).unwrap();
        let body = content.strip_prefix(HEADER).unwrap();
        assert_eq!(
            body,
            "900150983cd24fb0d6963f7d28e17f72  ./isolinux/isolinux.cfg\n\
             d41d8cd98f00b204e9800998ecf8427e  ./live/vmlinuz\n"
        );
    }
}
