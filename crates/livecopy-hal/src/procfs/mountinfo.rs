//! Parsing helpers for `/proc/self/mountinfo` (and similar mountinfo files).

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub mount_point: PathBuf,
    pub fstype: String,
    pub source: String,
}

pub fn parse_mountinfo(content: &str) -> Vec<MountInfo> {
    content
        .lines()
        .filter_map(|line| {
            // mountinfo format:
            //   <pre fields...> <mount point> <...> - <fstype> <source> <superopts>
            let (pre, post) = line.split_once(" - ")?;
            let pre_fields: Vec<&str> = pre.split_whitespace().collect();
            if pre_fields.len() < 5 {
                return None;
            }
            let mut post_fields = post.split_whitespace();
            let fstype = post_fields.next()?.to_string();
            let source = unescape_mount_path(post_fields.next()?);
            Some(MountInfo {
                mount_point: PathBuf::from(unescape_mount_path(pre_fields[4])),
                fstype,
                source,
            })
        })
        .collect()
}

pub fn is_mounted_from_info(path: &Path, entries: &[MountInfo]) -> bool {
    let target = normalize_path(path);
    entries
        .iter()
        .any(|entry| normalize_path(&entry.mount_point) == target)
}

/// Mount points whose source satisfies `owned`, deepest first so they can be
/// unmounted in order.
pub fn mounted_from(entries: &[MountInfo], owned: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
    let mut mounts: Vec<PathBuf> = entries
        .iter()
        .filter(|e| owned(Path::new(&e.source)))
        .map(|e| e.mount_point.clone())
        .collect();
    mounts.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    mounts.dedup();
    mounts
}

/// Source device of the mount that contains `path` (longest mount point prefix).
pub fn source_for_path<'a>(entries: &'a [MountInfo], path: &Path) -> Option<&'a str> {
    entries
        .iter()
        .filter(|e| path.starts_with(&e.mount_point))
        .max_by_key(|e| e.mount_point.components().count())
        .map(|e| e.source.as_str())
}

pub fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

fn normalize_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.len() > 1 && s.ends_with('/') {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "36 28 0:31 / / rw,relatime - overlay overlay rw\n\
                          37 28 8:17 / /media/usb rw,relatime - vfat /dev/sdb1 rw\n\
                          38 37 8:18 / /media/usb/nested rw,relatime - ext4 /dev/sdb2 rw\n\
                          39 28 8:33 / /media/other rw,relatime - ext4 /dev/sdc1 rw\n";

    #[test]
    fn parse_mountinfo_extracts_fields() {
        let entries = parse_mountinfo(SAMPLE);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].mount_point, PathBuf::from("/media/usb"));
        assert_eq!(entries[1].fstype, "vfat");
        assert_eq!(entries[1].source, "/dev/sdb1");
    }

    #[test]
    fn is_mounted_from_info_matches_paths() {
        let entries = parse_mountinfo(SAMPLE);
        assert!(is_mounted_from_info(Path::new("/media/usb/"), &entries));
        assert!(!is_mounted_from_info(Path::new("/mnt"), &entries));
    }

    #[test]
    fn mountinfo_unescapes_paths() {
        let sample = "36 28 0:31 / /mnt/data\\040disk rw,relatime - ext4 /dev/sda3 rw\n";
        let entries = parse_mountinfo(sample);
        assert_eq!(entries[0].mount_point, PathBuf::from("/mnt/data disk"));
    }

    #[test]
    fn mounted_from_returns_deepest_first() {
        let entries = parse_mountinfo(SAMPLE);
        let mounts = mounted_from(&entries, |src| src.to_string_lossy().starts_with("/dev/sdb"));
        assert_eq!(
            mounts,
            vec![
                PathBuf::from("/media/usb/nested"),
                PathBuf::from("/media/usb")
            ]
        );
    }

    #[test]
    fn source_for_path_picks_longest_prefix() {
        let entries = parse_mountinfo(SAMPLE);
        assert_eq!(
            source_for_path(&entries, Path::new("/media/usb/nested/swapfile")),
            Some("/dev/sdb2")
        );
        assert_eq!(source_for_path(&entries, Path::new("/swapfile")), Some("overlay"));
    }
}
