// File selection: the single validation gate and chunk partitioning.

use bytes::Bytes;
use std::ops::Range;
use std::path::Path;

use crate::error::ValidationError;

/// Extension accepted by the upload form (compared case-insensitively).
pub const IFC_EXTENSION: &str = ".ifc";

/// A file the user picked, held in memory for one upload attempt.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    name: String,
    data: Bytes,
}

impl SelectedFile {
    /// Build a candidate from an in-memory blob, running the validation gate.
    pub fn from_bytes(
        name: impl Into<String>,
        data: impl Into<Bytes>,
        max_size: u64,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        let data = data.into();
        validate(&name, data.len() as u64, max_size)?;
        Ok(Self { name, data })
    }

    /// Read a file from disk. Name and size are checked against the
    /// metadata before any bytes are loaded.
    pub fn open(path: &Path, max_size: u64) -> Result<Self, ValidationError> {
        let unreadable = |source| ValidationError::Unreadable {
            path: path.display().to_string(),
            source,
        };
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let size = std::fs::metadata(path).map_err(unreadable)?.len();
        validate(&name, size, max_size)?;

        let data = std::fs::read(path).map_err(unreadable)?;
        // the file may have changed between stat and read
        validate(&name, data.len() as u64, max_size)?;
        Ok(Self {
            name,
            data: Bytes::from(data),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn data(&self) -> Bytes {
        self.data.clone()
    }

    /// Re-run the validation gate, e.g. at submission time with a limit that
    /// may have changed since selection.
    pub fn revalidate(&self, max_size: u64) -> Result<(), ValidationError> {
        validate(&self.name, self.size(), max_size)
    }

    /// Bytes of chunk `index` for the given chunk size. Cheap: shares the
    /// underlying buffer.
    pub fn chunk(&self, index: u64, chunk_size: u64) -> Bytes {
        let range = chunk_range(index, chunk_size, self.size());
        self.data.slice(range.start as usize..range.end as usize)
    }
}

/// The one validation gate used on selection and on submission.
pub fn validate(name: &str, size: u64, max_size: u64) -> Result<(), ValidationError> {
    if !has_ifc_extension(name) {
        return Err(ValidationError::NotIfc {
            name: name.to_string(),
        });
    }
    if size > max_size {
        return Err(ValidationError::TooLarge {
            size,
            max: max_size,
        });
    }
    Ok(())
}

pub fn has_ifc_extension(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(IFC_EXTENSION)
}

/// Byte range `[index * chunk_size, min((index + 1) * chunk_size, file_size))`.
///
/// Indices past the end of the file yield an empty range at `file_size`, so
/// a server that asks for more chunks than the file needs still gets one
/// request per index.
pub fn chunk_range(index: u64, chunk_size: u64, file_size: u64) -> Range<u64> {
    let start = index.saturating_mul(chunk_size).min(file_size);
    let end = start.saturating_add(chunk_size).min(file_size);
    start..end
}
