//! Module archive packaging and inspection.

use crate::{Error, Result};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Zip a directory tree into an in-memory archive with paths relative to
/// `dir`. The `.git` directory is not part of the artifact.
pub fn zip_directory(dir: &Path) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| Error::Package(e.to_string()))?;
        let path = entry.path();
        let relative = path
            .strip_prefix(dir)
            .map_err(|e| Error::Package(e.to_string()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let name = relative.to_string_lossy().replace('\\', "/");
        if name == ".git" || name.starts_with(".git/") {
            continue;
        }

        if entry.file_type().is_dir() {
            writer
                .add_directory(format!("{name}/"), options)
                .map_err(|e| Error::Package(e.to_string()))?;
        } else if entry.file_type().is_file() {
            writer
                .start_file(name, options)
                .map_err(|e| Error::Package(e.to_string()))?;
            let content = std::fs::read(path)?;
            writer.write_all(&content)?;
        }
    }

    let cursor = writer
        .finish()
        .map_err(|e| Error::Package(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Find `readme.md` (any case) at the archive root or one level deep.
pub fn extract_readme(data: &[u8]) -> Option<String> {
    let mut archive = ZipArchive::new(Cursor::new(data)).ok()?;
    for index in 0..archive.len() {
        let mut file = archive.by_index(index).ok()?;
        let name = file.name().to_lowercase();
        let parts: Vec<&str> = name.split('/').collect();
        let base = parts.last().copied().unwrap_or_default();
        if base == "readme.md" && parts.len() <= 2 {
            let mut content = String::new();
            file.read_to_string(&mut content).ok()?;
            return Some(content);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.tf"), "resource \"null_resource\" \"x\" {}")
            .unwrap();
        std::fs::write(dir.path().join("README.md"), "# vpc module").unwrap();
        std::fs::create_dir_all(dir.path().join("modules/subnet")).unwrap();
        std::fs::write(dir.path().join("modules/subnet/main.tf"), "# subnet").unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        dir
    }

    #[test]
    fn test_zip_directory_excludes_git() {
        let dir = fixture_tree();
        let data = zip_directory(dir.path()).unwrap();

        let mut archive = ZipArchive::new(Cursor::new(data.as_slice())).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();

        assert!(names.contains(&"main.tf".to_string()));
        assert!(names.contains(&"modules/subnet/main.tf".to_string()));
        assert!(!names.iter().any(|n| n.starts_with(".git")));
    }

    #[test]
    fn test_extract_readme_at_root() {
        let dir = fixture_tree();
        let data = zip_directory(dir.path()).unwrap();
        let readme = extract_readme(&data).unwrap();
        assert_eq!(readme, "# vpc module");
    }

    #[test]
    fn test_extract_readme_one_level_deep() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("vpc-1.2.3")).unwrap();
        std::fs::write(dir.path().join("vpc-1.2.3/readme.md"), "nested").unwrap();
        let data = zip_directory(dir.path()).unwrap();
        assert_eq!(extract_readme(&data).unwrap(), "nested");
    }

    #[test]
    fn test_extract_readme_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.tf"), "{}").unwrap();
        let data = zip_directory(dir.path()).unwrap();
        assert!(extract_readme(&data).is_none());
    }
}
