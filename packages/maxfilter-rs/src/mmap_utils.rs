use crate::error::{MaxfilterError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const F64_BYTES: usize = std::mem::size_of::<f64>();

/// Open a file and map it into memory (read-only)
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path).map_err(MaxfilterError::IoError)?;
    let mmap = unsafe { Mmap::map(&file).map_err(MaxfilterError::IoError)? };
    Ok(mmap)
}

/// Write a channel-major matrix as little-endian float64.
pub fn write_f64_matrix(path: &Path, data: &[Vec<f64>]) -> Result<()> {
    let file = File::create(path).map_err(|e| MaxfilterError::write(path, e))?;
    let mut out = BufWriter::new(file);
    for channel in data {
        for value in channel {
            out.write_all(&value.to_le_bytes())
                .map_err(|e| MaxfilterError::write(path, e))?;
        }
    }
    out.flush().map_err(|e| MaxfilterError::write(path, e))?;
    Ok(())
}

/// Read a channel-major little-endian float64 matrix of known shape.
pub fn read_f64_matrix(path: &Path, n_channels: usize, n_samples: usize) -> Result<Vec<Vec<f64>>> {
    let mmap = mmap_file(path)?;
    let expected = n_channels * n_samples * F64_BYTES;
    if mmap.len() != expected {
        return Err(MaxfilterError::Engine(format!(
            "{} holds {} bytes, expected {} for {} x {} samples",
            path.display(),
            mmap.len(),
            expected,
            n_channels,
            n_samples
        )));
    }
    if n_samples == 0 {
        return Ok(vec![Vec::new(); n_channels]);
    }

    let data = mmap
        .chunks_exact(n_samples * F64_BYTES)
        .map(|row| {
            row.chunks_exact(F64_BYTES)
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect()
        })
        .collect();
    Ok(data)
}
