use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes `value` as gzip-compressed JSON.
///
/// The snapshot is written next to `path` and renamed over it, so a crash
/// mid-write leaves the previous snapshot intact.
pub fn save_snapshot<T: Serialize>(value: &T, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut writer = BufWriter::new(encoder);

        serde_json::to_writer(&mut writer, value)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        let encoder = writer.into_inner().map_err(|e| e.into_error())?;
        encoder.finish()?.flush()?;
    }
    fs::rename(&tmp, path)
}

/// Reads a snapshot written by [`save_snapshot`].
pub fn load_snapshot<T: DeserializeOwned>(path: &Path) -> std::io::Result<T> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let reader = BufReader::new(decoder);

    serde_json::from_reader(reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Stores the original upload bytes under `root/uploads/<owner>/<file_id>.<ext>`.
pub fn store_upload(
    root: &Path,
    owner: &str,
    file_id: &str,
    extension: &str,
    bytes: &[u8],
) -> std::io::Result<PathBuf> {
    let dir = root.join("uploads").join(owner);
    fs::create_dir_all(&dir)?;

    let path = dir.join(format!("{}.{}", file_id, extension));
    fs::write(&path, bytes)?;
    Ok(path)
}

/// Deletes stored upload bytes; a file that is already gone is not an error.
pub fn remove_upload(path: impl AsRef<Path>) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.json.gz");

        let mut value = BTreeMap::new();
        value.insert("alice".to_string(), vec![1, 2, 3]);
        save_snapshot(&value, &path).unwrap();

        let loaded: BTreeMap<String, Vec<i32>> = load_snapshot(&path).unwrap();
        assert_eq!(loaded, value);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn uploads_are_stored_per_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_upload(dir.path(), "alice", "f1", "xlsx", b"bytes").unwrap();

        assert!(path.ends_with("uploads/alice/f1.xlsx"));
        assert_eq!(fs::read(&path).unwrap(), b"bytes");

        remove_upload(&path).unwrap();
        assert!(!path.exists());
        remove_upload(&path).unwrap();
    }
}
