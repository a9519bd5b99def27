//! Parsing helpers for `/proc/swaps`.

use super::mountinfo::unescape_mount_path;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapEntry {
    pub path: PathBuf,
    /// `partition` or `file`.
    pub kind: String,
    pub size_kb: u64,
    pub used_kb: u64,
}

impl SwapEntry {
    pub fn is_file(&self) -> bool {
        self.kind == "file"
    }
}

/// Parse the active swap table. The header line and malformed lines are skipped.
pub fn parse_swaps(content: &str) -> Vec<SwapEntry> {
    content
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 || fields[0] == "Filename" {
                return None;
            }
            Some(SwapEntry {
                path: PathBuf::from(unescape_mount_path(fields[0])),
                kind: fields[1].to_string(),
                size_kb: fields[2].parse().ok()?,
                used_kb: fields[3].parse().ok()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_swaps_reads_partitions_and_files() {
        let sample = "Filename\t\t\t\tType\t\tSize\t\tUsed\t\tPriority\n\
                      /dev/sdb2                               partition\t2097148\t\t1024\t\t-2\n\
                      /media/data/swap\\040file                file\t\t524284\t\t0\t\t-3\n";
        let entries = parse_swaps(sample);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, PathBuf::from("/dev/sdb2"));
        assert_eq!(entries[0].size_kb, 2097148);
        assert_eq!(entries[0].used_kb, 1024);
        assert!(!entries[0].is_file());
        assert_eq!(entries[1].path, PathBuf::from("/media/data/swap file"));
        assert!(entries[1].is_file());
    }

    #[test]
    fn parse_swaps_without_entries_is_empty() {
        assert!(parse_swaps("Filename Type Size Used Priority\n").is_empty());
    }
}
