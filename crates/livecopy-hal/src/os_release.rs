//! Parsing helpers for `/etc/os-release`.

use anyhow::Result;

fn parse_os_id_fallback(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        if let Some(value) = line.strip_prefix("NAME=") {
            return Some(value.trim().trim_matches('"').to_lowercase());
        }
        None
    })
}

/// Parses `os-release` content and returns `(id, id_like)`.
///
/// Both are lowercased. `id` falls back to `NAME` and then to `"unknown"`.
pub fn parse_os_release(content: &str) -> Result<(String, Vec<String>)> {
    let mut id: Option<String> = None;
    let mut id_like: Vec<String> = Vec::new();

    for line in content.lines() {
        if let Some(value) = line.strip_prefix("ID=") {
            id = Some(value.trim().trim_matches('"').to_lowercase());
        } else if let Some(value) = line.strip_prefix("ID_LIKE=") {
            id_like = value
                .trim()
                .trim_matches('"')
                .split_whitespace()
                .map(str::to_lowercase)
                .collect();
        }
    }

    let id = id
        .or_else(|| parse_os_id_fallback(content))
        .unwrap_or_else(|| "unknown".to_string());
    Ok((id, id_like))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_os_id_handles_name() {
        let release = "NAME=\"Lernstick\"\n";
        let (id, like) = parse_os_release(release).unwrap();
        assert_eq!(id, "lernstick");
        assert!(like.is_empty());
    }

    #[test]
    fn parse_os_release_extracts_id_like() {
        let release = "PRETTY_NAME=\"Debian Live\"\nID=debian\nID_LIKE=\"ubuntu debian\"\n";
        let (id, like) = parse_os_release(release).unwrap();
        assert_eq!(id, "debian");
        assert_eq!(like, vec!["ubuntu".to_string(), "debian".to_string()]);
    }
}
