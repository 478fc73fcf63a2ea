use std::fs;
use std::io;
use std::path::Path;

use zip::ZipArchive;

use crate::error::KiraError;

/// Unpacks `zip_path` under `target_dir`, rejecting entries that escape it.
pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), KiraError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| KiraError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| KiraError::TaxonomyDatabase(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| KiraError::TaxonomyDatabase(err.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(KiraError::TaxonomyDatabase(
                "zip entry path traversal detected".to_string(),
            ));
        };
        let entry_path = target_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    #[test]
    fn extracts_dump_members() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("taxdmp.zip");
        {
            let file = fs::File::create(&zip_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            writer
                .start_file("nodes.dmp", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"1\t|\t1\t|\tno rank\t|\n").unwrap();
            writer.finish().unwrap();
        }

        let target = temp.path().join("out");
        extract_zip(&zip_path, &target).unwrap();
        let content = fs::read_to_string(target.join("nodes.dmp")).unwrap();
        assert!(content.starts_with("1\t|\t1"));
    }
}
