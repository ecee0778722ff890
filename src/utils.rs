use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::mapping::BodyPart;
use crate::pipeline::FractureLabel;

pub fn get_all_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if dir.is_dir() {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn sub_dirs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn is_valid_image(file_path: &Path) -> bool {
    let valid_exts = ["jpg", "png", "jpeg"];

    // Check that the extension is valid.
    let ext_valid = match file_path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => valid_exts.contains(&ext.to_lowercase().as_str()),
        None => false,
    };

    // Check that the file size is not zero.
    let size_valid = match fs::metadata(file_path) {
        Ok(metadata) => metadata.len() != 0,
        Err(_) => false,
    };

    ext_valid && size_valid
}

/// One labelled radiograph of an evaluation set.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetEntry {
    pub body_part: BodyPart,
    pub label: FractureLabel,
    pub image_path: PathBuf,
}

fn parse_label(name: &str) -> Option<FractureLabel> {
    match name.to_ascii_lowercase().as_str() {
        "fractured" => Some(FractureLabel::Fractured),
        "normal" => Some(FractureLabel::Normal),
        _ => None,
    }
}

/// Walks `<root>/<Part>/<fractured|normal>/<image>`. Directories that do not
/// name a known part or label are skipped.
pub fn load_dataset(root: &Path) -> io::Result<Vec<DatasetEntry>> {
    let mut dataset = Vec::new();
    for part_dir in sub_dirs(root)? {
        let part_name = part_dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let Ok(body_part) = part_name.parse::<BodyPart>() else {
            warn!(dir = %part_dir.display(), "not a body part directory, skipping");
            continue;
        };
        for label_dir in sub_dirs(&part_dir)? {
            let label_name = label_dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let Some(label) = parse_label(&label_name) else {
                warn!(dir = %label_dir.display(), "not a label directory, skipping");
                continue;
            };
            for image_path in get_all_files(&label_dir)? {
                if is_valid_image(&image_path) {
                    dataset.push(DatasetEntry {
                        body_part,
                        label,
                        image_path,
                    });
                }
            }
        }
    }
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_part_and_label_dirs() {
        let root = tempfile::tempdir().unwrap();
        let frac = root.path().join("Hand").join("fractured");
        let normal = root.path().join("Elbow").join("normal");
        let junk = root.path().join("notes");
        for dir in [&frac, &normal, &junk] {
            fs::create_dir_all(dir).unwrap();
        }
        fs::write(frac.join("a.png"), b"x").unwrap();
        fs::write(frac.join("empty.png"), b"").unwrap();
        fs::write(frac.join("readme.txt"), b"x").unwrap();
        fs::write(normal.join("b.JPG"), b"x").unwrap();

        let dataset = load_dataset(root.path()).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset[0].body_part, BodyPart::Elbow);
        assert_eq!(dataset[0].label, FractureLabel::Normal);
        assert_eq!(dataset[1].body_part, BodyPart::Hand);
        assert_eq!(dataset[1].label, FractureLabel::Fractured);
    }
}
