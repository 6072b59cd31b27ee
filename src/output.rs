//! Persisting capture results
//!
//! A single buffer is written as `<stem>.<ext>`. Several buffers become
//! `<stem>.part-001.<ext>`, `<stem>.part-002.<ext>`, ... in capture order.

use crate::request::ImageFormat;
use crate::Result;
use log::info;
use std::path::{Path, PathBuf};

/// Path of buffer `index` (0-based) out of `total` written for `base`.
///
/// `base`'s own extension, if any, is replaced by `ext`.
pub fn part_path(base: &Path, index: usize, total: usize, ext: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture".to_string());
    let name = if total <= 1 {
        format!("{}.{}", stem, ext)
    } else {
        let width = total.to_string().len().max(3);
        format!("{}.part-{:0width$}.{}", stem, index + 1, ext, width = width)
    };
    base.with_file_name(name)
}

/// Write `buffers` next to `base`, returning the written paths in order.
pub fn write_parts(base: &Path, format: ImageFormat, buffers: &[Vec<u8>]) -> Result<Vec<PathBuf>> {
    if let Some(dir) = base.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let mut written = Vec::with_capacity(buffers.len());
    for (i, data) in buffers.iter().enumerate() {
        let path = part_path(base, i, buffers.len(), format.extension());
        std::fs::write(&path, data)?;
        match png_dimensions(data) {
            Some((w, h)) => info!("Wrote {} ({}x{})", path.display(), w, h),
            None => info!("Wrote {} ({} bytes)", path.display(), data.len()),
        }
        written.push(path);
    }
    Ok(written)
}

/// Width and height from a PNG's IHDR chunk
pub fn png_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 24 || &data[0..8] != b"\x89PNG\r\n\x1a\n" || &data[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(data[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(data[20..24].try_into().ok()?);
    Some((width, height))
}
