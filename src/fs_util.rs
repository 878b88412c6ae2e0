use std::fs;
use std::io::{self, Read};
use std::path::Path;

use zip::ZipArchive;

use crate::error::FetchError;

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

pub fn is_zip_archive(path: &Path) -> Result<bool, FetchError> {
    let mut file = fs::File::open(path)
        .map_err(|err| FetchError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == ZIP_MAGIC),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(FetchError::Filesystem(format!(
            "read {}: {err}",
            path.display()
        ))),
    }
}

pub fn unpack_archive(zip_path: &Path, target_dir: &Path) -> Result<(), FetchError> {
    let extraction = |message: String| FetchError::Extraction {
        path: zip_path.to_path_buf(),
        message,
    };

    let file = fs::File::open(zip_path).map_err(|err| extraction(err.to_string()))?;
    let mut archive = ZipArchive::new(file).map_err(|err| extraction(err.to_string()))?;

    fs::create_dir_all(target_dir).map_err(|err| extraction(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| extraction(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(extraction("zip entry path traversal detected".to_string()));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path).map_err(|err| extraction(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| extraction(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| extraction(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| extraction(err.to_string()))?;
    }
    Ok(())
}
