//! Parsing helpers for `/proc/meminfo`.

/// Value of a `Key:   1234 kB` line, in KiB.
pub fn parse_meminfo_kb(content: &str, key: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let value = line.strip_prefix(key)?.strip_prefix(':')?;
        value
            .split_whitespace()
            .next()
            .and_then(|num| num.parse().ok())
    })
}

/// Extracts the most relevant free-memory value from `/proc/meminfo`.
///
/// Returns the value in KiB.
pub fn parse_mem_available_kb(content: &str) -> Option<u64> {
    // Preferred on modern kernels; counts reclaimable page cache as free.
    parse_meminfo_kb(content, "MemAvailable").or_else(|| parse_meminfo_kb(content, "MemFree"))
}

/// Free swap in KiB (0 when the kernel has no swap support compiled in).
pub fn parse_swap_free_kb(content: &str) -> u64 {
    parse_meminfo_kb(content, "SwapFree").unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "MemTotal:        2048000 kB\n\
                          MemFree:          150000 kB\n\
                          MemAvailable:     400000 kB\n\
                          SwapTotal:       1048572 kB\n\
                          SwapFree:         900000 kB\n";

    #[test]
    fn parse_mem_available_prefers_available() {
        assert_eq!(parse_mem_available_kb(SAMPLE), Some(400000));
    }

    #[test]
    fn parse_mem_available_uses_free_when_available_missing() {
        let data = "MemTotal: 16384000 kB\nMemFree: 8000 kB\n";
        assert_eq!(parse_mem_available_kb(data), Some(8000));
    }

    #[test]
    fn swap_free_defaults_to_zero() {
        assert_eq!(parse_swap_free_kb(SAMPLE), 900000);
        assert_eq!(parse_swap_free_kb("MemFree: 1 kB\n"), 0);
    }

    #[test]
    fn key_must_match_whole_field_name() {
        assert_eq!(parse_meminfo_kb(SAMPLE, "Swap"), None);
    }
}
