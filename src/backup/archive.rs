//! Zip codec for world directories.
//!
//! Entries are stored relative to the archived directory, so an archive of
//! `server/world` contains `level.dat`, `region/r.0.0.mca`, and so on. The
//! backup origin is kept in the archive comment, which keeps the file name
//! convention untouched.

use std::fs::{self, File};
use std::io::{self, BufReader, Seek, Write};
use std::path::Path;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::types::Origin;

const ORIGIN_COMMENT_PREFIX: &str = "warden:origin=";

fn zip_err(e: ZipError) -> io::Error {
    match e {
        ZipError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

/// Writes every file and directory under `source` into a zip on `writer`.
///
/// Symlinks and special files are skipped. Returns the finished writer.
pub(crate) fn write_archive<W: Write + Seek>(
    writer: W,
    source: &Path,
    origin: Origin,
) -> io::Result<W> {
    let mut zip = ZipWriter::new(writer);
    zip.set_comment(format!("{ORIGIN_COMMENT_PREFIX}{origin}"));

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    add_dir(&mut zip, source, source, options)?;
    zip.finish().map_err(zip_err)
}

fn add_dir<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    root: &Path,
    dir: &Path,
    options: SimpleFileOptions,
) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(fs::DirEntry::file_name);

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type()?;
        let name = entry_name(root, &path)?;

        if file_type.is_dir() {
            zip.add_directory(name, options).map_err(zip_err)?;
            add_dir(zip, root, &path, options)?;
        } else if file_type.is_file() {
            let options = with_permissions(options, &entry)?;
            zip.start_file(name, options).map_err(zip_err)?;
            let mut file = File::open(&path)?;
            io::copy(&mut file, zip)?;
        } else {
            tracing::debug!(path = %path.display(), "Skipping non-regular file");
        }
    }
    Ok(())
}

#[cfg(unix)]
fn with_permissions(options: SimpleFileOptions, entry: &fs::DirEntry) -> io::Result<SimpleFileOptions> {
    use std::os::unix::fs::PermissionsExt;
    Ok(options.unix_permissions(entry.metadata()?.permissions().mode()))
}

#[cfg(not(unix))]
fn with_permissions(options: SimpleFileOptions, _entry: &fs::DirEntry) -> io::Result<SimpleFileOptions> {
    Ok(options)
}

/// Forward-slash relative name of `path` under `root`.
fn entry_name(root: &Path, path: &Path) -> io::Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component.as_os_str().to_str().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("non UTF-8 file name: {}", path.display()),
            )
        })?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

/// Reads the origin stored in the archive comment.
///
/// Archives without a recognisable comment count as manual.
pub(crate) fn read_origin(path: &Path) -> io::Result<Origin> {
    let archive = ZipArchive::new(BufReader::new(File::open(path)?)).map_err(zip_err)?;
    let comment = String::from_utf8_lossy(archive.comment());
    Ok(comment
        .strip_prefix(ORIGIN_COMMENT_PREFIX)
        .and_then(|origin| origin.parse().ok())
        .unwrap_or(Origin::Manual))
}

/// Extracts `archive` into `dest`, which must already exist.
///
/// Entries whose path would escape `dest` abort the extraction. Returns the
/// number of entries written.
pub(crate) fn extract_archive(archive: &Path, dest: &Path) -> io::Result<usize> {
    let mut zip = ZipArchive::new(BufReader::new(File::open(archive)?)).map_err(zip_err)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(zip_err)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsafe entry path: {}", entry.name()),
            ));
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out_file = File::create(&out_path)?;
        io::copy(&mut entry, &mut out_file)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode))?;
            }
        }
    }

    Ok(zip.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build_tree(root: &Path) {
        fs::create_dir_all(root.join("region")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("level.dat"), b"level").unwrap();
        fs::write(root.join("region").join("r.0.0.mca"), vec![7u8; 4096]).unwrap();
    }

    #[test]
    fn test_archive_preserves_relative_tree() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        build_tree(src.path());

        let archive_path = out.path().join("a.zip");
        write_archive(File::create(&archive_path).unwrap(), src.path(), Origin::Auto).unwrap();

        let dest = out.path().join("restored");
        fs::create_dir(&dest).unwrap();
        extract_archive(&archive_path, &dest).unwrap();

        assert_eq!(fs::read(dest.join("level.dat")).unwrap(), b"level");
        assert_eq!(
            fs::read(dest.join("region").join("r.0.0.mca")).unwrap(),
            vec![7u8; 4096]
        );
        assert!(dest.join("empty").is_dir());
    }

    #[test]
    fn test_origin_round_trip_through_comment() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        build_tree(src.path());

        let auto = out.path().join("auto.zip");
        let manual = out.path().join("manual.zip");
        write_archive(File::create(&auto).unwrap(), src.path(), Origin::Auto).unwrap();
        write_archive(File::create(&manual).unwrap(), src.path(), Origin::Manual).unwrap();

        assert_eq!(read_origin(&auto).unwrap(), Origin::Auto);
        assert_eq!(read_origin(&manual).unwrap(), Origin::Manual);
    }

    #[test]
    fn test_archive_without_comment_is_manual() {
        let out = tempfile::tempdir().unwrap();
        let path = out.path().join("plain.zip");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("a.txt", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"a").unwrap();
        zip.finish().unwrap();

        assert_eq!(read_origin(&path).unwrap(), Origin::Manual);
    }

    #[test]
    fn test_rejects_path_traversal() {
        let out = tempfile::tempdir().unwrap();
        let path = out.path().join("evil.zip");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("../escape.txt", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"x").unwrap();
        zip.finish().unwrap();

        let dest = out.path().join("dest");
        fs::create_dir(&dest).unwrap();
        let err = extract_archive(&path, &dest).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(!out.path().join("escape.txt").exists());
    }

    #[test]
    fn test_garbage_is_not_an_archive() {
        let out = tempfile::tempdir().unwrap();
        let path = out.path().join("broken.zip");
        fs::write(&path, b"definitely not a zip").unwrap();

        let dest = out.path().join("dest");
        fs::create_dir(&dest).unwrap();
        assert!(extract_archive(&path, &dest).is_err());
        assert!(read_origin(&path).is_err());
    }

    #[test]
    fn test_writes_to_in_memory_buffer() {
        let src = tempfile::tempdir().unwrap();
        build_tree(src.path());
        let cursor = write_archive(Cursor::new(Vec::new()), src.path(), Origin::Manual).unwrap();
        assert!(!cursor.into_inner().is_empty());
    }
}
