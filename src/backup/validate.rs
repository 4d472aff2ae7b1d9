use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::errors::BackupError;

/// Statements whose presence marks a dump as plausibly real.
const MARKERS: [&[u8]; 2] = [b"CREATE", b"INSERT"];
const CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Empty,
    Valid,
    ContentInvalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReport {
    pub size_bytes: u64,
    pub verdict: Verdict,
}

impl ArtifactReport {
    pub fn size_text(&self) -> String {
        format_size(self.size_bytes)
    }
}

/// Stat the artifact and, when `verify_content` is set, scan it for markers.
///
/// A stat failure is reported as an empty artifact: there is nothing usable
/// to store either way.
pub async fn inspect(path: &Path, verify_content: bool) -> Result<ArtifactReport, BackupError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        BackupError::EmptyArtifact(format!(
            "pg_dump produced no readable file at {}: {}",
            path.display(),
            e
        ))
    })?;

    let size_bytes = metadata.len();
    if size_bytes == 0 {
        return Ok(ArtifactReport {
            size_bytes,
            verdict: Verdict::Empty,
        });
    }
    if !verify_content {
        return Ok(ArtifactReport {
            size_bytes,
            verdict: Verdict::Valid,
        });
    }

    let owned: PathBuf = path.to_path_buf();
    let found = tokio::task::spawn_blocking(move || scan_file(&owned))
        .await
        .map_err(|e| BackupError::Internal(format!("content scan task failed: {}", e)))?
        .map_err(|e| {
            BackupError::ContentInvalid(format!("could not read {}: {}", path.display(), e))
        })?;

    Ok(ArtifactReport {
        size_bytes,
        verdict: if found {
            Verdict::Valid
        } else {
            Verdict::ContentInvalid
        },
    })
}

fn scan_file(path: &Path) -> io::Result<bool> {
    let file = BufReader::new(File::open(path)?);
    let is_gzip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if is_gzip {
        contains_marker(GzDecoder::new(file))
    } else {
        contains_marker(file)
    }
}

/// Stream `reader` looking for any marker, carrying a short tail between
/// chunks so a marker split across a boundary is still found.
pub fn contains_marker<R: Read>(mut reader: R) -> io::Result<bool> {
    let keep = MARKERS.iter().map(|m| m.len()).max().unwrap_or(0).saturating_sub(1);
    let mut window: Vec<u8> = Vec::with_capacity(CHUNK + keep);
    let mut chunk = vec![0u8; CHUNK];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(false);
        }
        window.extend_from_slice(&chunk[..n]);
        if MARKERS
            .iter()
            .any(|marker| window.windows(marker.len()).any(|w| w == *marker))
        {
            return Ok(true);
        }
        let tail_start = window.len().saturating_sub(keep);
        window.drain(..tail_start);
    }
}

/// Human-readable size with 1024-based units and one decimal place.
pub fn format_size(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    const PREFIXES: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp < PREFIXES.len() - 1 {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}B", bytes as f64 / div as f64, PREFIXES[exp])
}
