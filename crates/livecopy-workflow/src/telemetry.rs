//! Progress extraction from the text output of external tools.

use std::fmt;

/// Which tool output a progress value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStream {
    /// Native copy engine (byte counts, no parsing needed).
    Copy,
    /// `rsync --progress` per-file lines.
    Rsync,
    /// `mksquashfs` progress bar.
    Compress,
    /// `genisoimage`/`xorriso` percent lines.
    MasterIso,
}

impl fmt::Display for ProgressStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProgressStream::Copy => "copy",
            ProgressStream::Rsync => "rsync",
            ProgressStream::Compress => "compress",
            ProgressStream::MasterIso => "master-iso",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stream: ProgressStream,
    /// Always within 0..=100.
    pub percent: u8,
    pub status: Option<String>,
}

impl ProgressEvent {
    pub fn new(stream: ProgressStream, percent: u8) -> Self {
        Self {
            stream,
            percent: percent.min(100),
            status: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

fn ratio_percent(done: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let pct = (done.min(total) as u128 * 100) / total as u128;
    Some(pct as u8)
}

/// `X/Y` as a pair of integers.
fn parse_fraction(text: &str) -> Option<(u64, u64)> {
    let (left, right) = text.split_once('/')?;
    Some((left.trim().parse().ok()?, right.trim().parse().ok()?))
}

/// `(remaining, total)` from `... (xfr#5, to-check=75/100)`.
///
/// Newer rsync prints `to-chk=`, older ones `to-check=`.
fn parse_rsync_to_check(line: &str) -> Option<(u64, u64)> {
    let start = ["to-check=", "to-chk="]
        .iter()
        .find_map(|key| line.find(key).map(|idx| idx + key.len()))?;
    let rest = &line[start..];
    let end = rest.find(')')?;
    parse_fraction(&rest[..end])
}

/// `(done, total)` from a `mksquashfs` bar: `[====/    ] 43333/230033  18%`.
fn parse_squashfs_bar(line: &str) -> Option<(u64, u64)> {
    let line = line.trim_start();
    if !line.starts_with('[') {
        return None;
    }
    let after_bar = &line[line.find(']')? + 1..];
    parse_fraction(after_bar.split_whitespace().next()?)
}

/// Whole percent from ` 89.33% done, estimate finish ...`.
fn parse_iso_percent(line: &str) -> Option<u8> {
    let idx = line.find("% done")?;
    let start = line[..idx]
        .rfind(char::is_whitespace)
        .map(|i| i + 1)
        .unwrap_or(0);
    let number = &line[start..idx];
    let whole = number.split('.').next()?;
    let whole: u64 = whole.parse().ok()?;
    Some(whole.min(100) as u8)
}

/// Converts lines of one tool run into [`ProgressEvent`]s.
///
/// Create one parser per run and stream; the rsync high-water mark lives in
/// the parser and starts over with it.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    stream: ProgressStream,
    high_water: Option<u8>,
}

impl ProgressParser {
    pub fn new(stream: ProgressStream) -> Self {
        Self {
            stream,
            high_water: None,
        }
    }

    pub fn stream(&self) -> ProgressStream {
        self.stream
    }

    /// Parse one output line. Returns `None` for unparseable lines and for
    /// rsync values below the last one published.
    pub fn parse_line(&mut self, line: &str) -> Option<ProgressEvent> {
        let percent = match self.stream {
            ProgressStream::Rsync => {
                let (remaining, total) = parse_rsync_to_check(line)?;
                let pct = ratio_percent(total.saturating_sub(remaining), total)?;
                if self.high_water.is_some_and(|hw| pct < hw) {
                    return None;
                }
                self.high_water = Some(pct);
                pct
            }
            ProgressStream::Compress => {
                let (done, total) = parse_squashfs_bar(line)?;
                ratio_percent(done, total)?
            }
            ProgressStream::MasterIso => parse_iso_percent(line)?,
            // The copy engine reports byte counts directly.
            ProgressStream::Copy => return None,
        };
        Some(ProgressEvent::new(self.stream, percent))
    }
}
