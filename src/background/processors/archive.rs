use crate::common::errors::ProcessingError;
use std::{
    fs::File,
    io::{self, Cursor},
    path::{Path, PathBuf},
};
use zip::{CompressionMethod, ZipWriter, result::ZipError, write::SimpleFileOptions};

/// Packs `paths` into an in-memory zip, one deflated entry per file named by its base name.
///
/// Entries keep the order of `paths`. Any unreadable file fails the whole archive.
pub fn archive(paths: &[PathBuf]) -> Result<Vec<u8>, ProcessingError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in paths {
        let entry_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| archive_error(path, io::Error::other("path has no file name")))?;

        let mut file = File::open(path).map_err(|err| archive_error(path, err))?;
        writer
            .start_file(entry_name, options)
            .map_err(|err| archive_error(path, zip_to_io(err)))?;
        io::copy(&mut file, &mut writer).map_err(|err| archive_error(path, err))?;
    }

    let cursor = writer
        .finish()
        .map_err(|err| archive_error(Path::new(""), zip_to_io(err)))?;
    Ok(cursor.into_inner())
}

fn archive_error(path: &Path, source: io::Error) -> ProcessingError {
    ProcessingError::Archive {
        path: path.to_path_buf(),
        source,
    }
}

fn zip_to_io(err: ZipError) -> io::Error {
    match err {
        ZipError::Io(err) => err,
        other => io::Error::other(other),
    }
}
