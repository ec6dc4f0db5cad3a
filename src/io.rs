//! Dense vector binary (fbin) file I/O.
//!
//! Layout: an 8-byte header of two little-endian `u32` values (point count,
//! dimension) followed by row-major `f32` data. The reader validates the file
//! size against the header before touching the payload, so truncated or
//! mislabeled files fail fast with a [`IndexError::Format`] instead of
//! producing garbage vectors.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{IndexError, Result};

/// Magic bytes appended before the CRC32 footer of checksummed snapshots.
const SNAPSHOT_CRC_MAGIC: &[u8; 4] = b"PXC1";

/// Write a payload with a `[magic][CRC32 BE]` footer, atomically.
///
/// Writes to a temp file and renames into place so a crash never leaves a
/// torn snapshot.
pub fn write_checksummed(path: &Path, payload: &[u8]) -> Result<()> {
    let crc = crc32fast::hash(payload);
    let mut output = Vec::with_capacity(payload.len() + 8);
    output.extend_from_slice(payload);
    output.extend_from_slice(SNAPSHOT_CRC_MAGIC);
    output.extend_from_slice(&crc.to_be_bytes());

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &output)?;
    fs::rename(&tmp, path)?;
    debug!(
        path = %path.display(),
        bytes = payload.len(),
        crc = format_args!("{crc:#010x}"),
        "wrote checksummed snapshot"
    );
    Ok(())
}

/// Read a checksummed payload, verifying the footer written by
/// [`write_checksummed`].
pub fn read_checksummed(path: &Path) -> Result<Vec<u8>> {
    let mut raw = fs::read(path)?;
    if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != SNAPSHOT_CRC_MAGIC {
        return Err(IndexError::Format(format!(
            "{}: missing snapshot CRC footer",
            path.display()
        )));
    }
    let stored_crc = u32::from_be_bytes([
        raw[raw.len() - 4],
        raw[raw.len() - 3],
        raw[raw.len() - 2],
        raw[raw.len() - 1],
    ]);
    raw.truncate(raw.len() - 8);
    let computed_crc = crc32fast::hash(&raw);
    if computed_crc != stored_crc {
        return Err(IndexError::Format(format!(
            "{}: snapshot CRC32 mismatch: expected {:#010x}, got {:#010x}",
            path.display(),
            stored_crc,
            computed_crc
        )));
    }
    Ok(raw)
}

/// Header of an fbin file: `(num_points, dim)`.
pub fn read_header(path: &Path) -> Result<(usize, usize)> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    read_header_from(&mut reader)
}

fn read_header_from<R: Read>(reader: &mut R) -> Result<(usize, usize)> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    let npts = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let dim = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    Ok((npts, dim))
}

/// Read every vector from an fbin file.
///
/// Returns the flat row-major data together with `(num_points, dim)`.
pub fn read_vectors(path: &Path) -> Result<(Vec<f32>, usize, usize)> {
    let (npts, dim) = read_header(path)?;
    read_vectors_partial(path, 0, npts).map(|data| (data, npts, dim))
}

/// Read `count` vectors starting at row `offset` from an fbin file.
///
/// The full file size is validated against the header even when only a
/// prefix is requested.
pub fn read_vectors_partial(path: &Path, offset: usize, count: usize) -> Result<Vec<f32>> {
    let file = File::open(path)?;
    let actual_size = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let (npts, dim) = read_header_from(&mut reader)?;

    if npts == 0 || dim == 0 {
        return Err(IndexError::Format(format!(
            "{}: empty fbin file ({} points, dim {})",
            path.display(),
            npts,
            dim
        )));
    }
    let expected_size = 8 + (npts as u64) * (dim as u64) * 4;
    if actual_size != expected_size {
        return Err(IndexError::Format(format!(
            "{}: size {} does not match header ({} points, dim {}, expected {})",
            path.display(),
            actual_size,
            npts,
            dim,
            expected_size
        )));
    }
    if offset + count > npts {
        return Err(IndexError::Format(format!(
            "{}: requested rows {}..{} beyond {} points",
            path.display(),
            offset,
            offset + count,
            npts
        )));
    }

    // Skip to the first requested row.
    let skip = (offset as u64) * (dim as u64) * 4;
    std::io::copy(&mut reader.by_ref().take(skip), &mut std::io::sink())?;

    let mut data = vec![0.0f32; count * dim];
    let mut row = vec![0u8; dim * 4];
    for r in 0..count {
        reader.read_exact(&mut row)?;
        for (d, chunk) in row.chunks_exact(4).enumerate() {
            data[r * dim + d] = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }

    debug!(
        path = %path.display(),
        rows = count,
        dim,
        "read fbin vectors"
    );
    Ok(data)
}

/// Write row-major vectors to an fbin file, overwriting any existing file.
pub fn write_vectors(path: &Path, data: &[f32], npts: usize, dim: usize) -> Result<()> {
    if data.len() != npts * dim {
        return Err(IndexError::Format(format!(
            "data length {} does not match {} points of dim {}",
            data.len(),
            npts,
            dim
        )));
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&(npts as u32).to_le_bytes())?;
    writer.write_all(&(dim as u32).to_le_bytes())?;
    for v in data {
        writer.write_all(&v.to_le_bytes())?;
    }
    writer.flush()?;
    debug!(path = %path.display(), rows = npts, dim, "wrote fbin vectors");
    Ok(())
}
