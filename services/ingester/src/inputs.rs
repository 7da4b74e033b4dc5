//! Discovery of PI-XML input files.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Whether `path` names a PI-XML document, plain or gzip-compressed.
pub fn is_pixml(path: &Path) -> bool {
    let name = match path.file_name() {
        Some(name) => name.to_string_lossy().to_ascii_lowercase(),
        None => return false,
    };
    name.ends_with(".xml") || name.ends_with(".xml.gz")
}

/// Expand files and directories into a sorted, de-duplicated file list.
///
/// Files named explicitly are kept whatever their extension; directories
/// are walked recursively for PI-XML documents.
pub fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input).follow_links(true) {
                let entry = entry
                    .with_context(|| format!("Failed to walk input directory {}", input.display()))?;
                if entry.file_type().is_file() && is_pixml(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            anyhow::bail!("Input not found: {}", input.display());
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_is_pixml() {
        assert!(is_pixml(Path::new("/data/DRRC2.xml")));
        assert!(is_pixml(Path::new("drrc2.XML.gz")));
        assert!(!is_pixml(Path::new("drrc2.csv")));
        assert!(!is_pixml(Path::new("drrc2.gz")));
    }

    #[test]
    fn test_collect_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("2017").join("08");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("b.xml"), "<TimeSeries/>").unwrap();
        fs::write(nested.join("a.xml.gz"), "").unwrap();
        fs::write(nested.join("notes.txt"), "").unwrap();

        let explicit = dir.path().join("listing.dat");
        fs::write(&explicit, "").unwrap();

        let files = collect_inputs(&[dir.path().to_path_buf(), explicit.clone()]).unwrap();

        assert_eq!(files.len(), 3);
        assert!(files.contains(&nested.join("a.xml.gz")));
        assert!(files.contains(&dir.path().join("b.xml")));
        assert!(files.contains(&explicit));
        assert!(files.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_inputs(&[dir.path().join("absent.xml")]).is_err());
    }
}
