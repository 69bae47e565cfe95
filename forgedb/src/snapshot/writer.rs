use super::format::{encode_file, CompiledTable};
use crate::error::{ForgeDbError, Result};
use std::io::Write;
use std::path::Path;

/// Write a full snapshot. Atomic from the reader's side: bytes go to a
/// temporary file in the target directory, then rename into place, so a
/// concurrent reader never observes a torn file.
pub fn write_snapshot(path: &Path, tables: &[CompiledTable]) -> Result<()> {
    let bytes = encode_file(None, tables);
    write_atomic(path, &bytes)?;
    log::info!(
        "wrote snapshot {} ({} tables, {} bytes)",
        path.display(),
        tables.len(),
        bytes.len()
    );
    Ok(())
}

pub(crate) fn write_live_file(path: &Path, generation: u64, tables: &[CompiledTable]) -> Result<()> {
    let bytes = encode_file(Some(generation), tables);
    write_atomic(path, &bytes)?;
    log::info!(
        "wrote live delta {} (generation {generation}, {} tables)",
        path.display(),
        tables.len()
    );
    Ok(())
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| ForgeDbError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fdb");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        // No leftover temp files.
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_write_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build/nested/out.fdb");
        write_atomic(&path, b"data").unwrap();
        assert!(path.exists());
    }
}
