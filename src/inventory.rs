use crate::error::{VideoError, VideoResult};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv"];

/// Category name -> ordered asset paths. Every stored category is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetCatalog {
    categories: BTreeMap<String, Vec<PathBuf>>,
}

impl AssetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a category. Empty asset lists are dropped so the non-empty invariant holds.
    pub fn insert(&mut self, category: impl Into<String>, assets: Vec<PathBuf>) {
        if assets.is_empty() {
            return;
        }
        self.categories.insert(category.into(), assets);
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    pub fn get(&self, category: &str) -> Option<&[PathBuf]> {
        self.categories.get(category).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[PathBuf])> {
        self.categories
            .iter()
            .map(|(name, assets)| (name.as_str(), assets.as_slice()))
    }

    /// Number of distinct asset paths across all categories.
    pub fn distinct_assets(&self) -> usize {
        self.categories
            .values()
            .flatten()
            .collect::<HashSet<_>>()
            .len()
    }
}

impl<S: Into<String>> FromIterator<(S, Vec<PathBuf>)> for AssetCatalog {
    fn from_iter<I: IntoIterator<Item = (S, Vec<PathBuf>)>>(iter: I) -> Self {
        let mut catalog = AssetCatalog::new();
        for (name, assets) in iter {
            catalog.insert(name, assets);
        }
        catalog
    }
}

pub fn has_video_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Builds the catalog from `root`: one category per immediate subdirectory,
/// holding that directory's video files. Nothing below one level is read.
pub fn scan_catalog(root: &Path) -> VideoResult<AssetCatalog> {
    if !root.is_dir() {
        return Err(VideoError::NotFound {
            what: "video library",
            path: root.to_path_buf(),
        });
    }

    let mut found: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(2)
        .follow_links(true)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|err| {
            err.into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"))
        })?;

        match entry.depth() {
            1 if entry.file_type().is_dir() => {
                let name = entry.file_name().to_string_lossy().into_owned();
                found.entry(name).or_default();
            }
            2 if entry.file_type().is_file() && has_video_extension(entry.path()) => {
                let Some(category) = entry
                    .path()
                    .parent()
                    .and_then(Path::file_name)
                    .map(|n| n.to_string_lossy().into_owned())
                else {
                    continue;
                };
                found.entry(category).or_default().push(entry.into_path());
            }
            _ => {}
        }
    }

    Ok(found.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn categories_come_from_subdirectories() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("parkour/a.mp4"));
        touch(&root.join("parkour/b.MOV"));
        touch(&root.join("parkour/notes.txt"));
        touch(&root.join("minecraft/c.mkv"));
        touch(&root.join("minecraft/d.Avi"));
        touch(&root.join("minecraft/e.webm"));

        let catalog = scan_catalog(root).unwrap();
        assert_eq!(catalog.category_count(), 2);

        let parkour = catalog.get("parkour").unwrap();
        assert_eq!(parkour.len(), 2);
        assert!(parkour[0].ends_with("parkour/a.mp4"));
        assert!(parkour[1].ends_with("parkour/b.MOV"));
        assert_eq!(catalog.get("minecraft").unwrap().len(), 2);
        assert_eq!(catalog.distinct_assets(), 4);
    }

    #[test]
    fn empty_categories_and_loose_files_are_left_out() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("loose.mp4"));
        touch(&root.join("only_text/readme.txt"));
        fs::create_dir_all(root.join("empty")).unwrap();
        touch(&root.join("cars/deep/nested.mp4"));
        touch(&root.join("cars/top.mp4"));

        let catalog = scan_catalog(root).unwrap();
        assert_eq!(catalog.category_count(), 1);
        assert_eq!(catalog.get("cars").unwrap().len(), 1);
        assert!(catalog.get("only_text").is_none());
        assert!(catalog.get("empty").is_none());
    }

    #[test]
    fn root_without_assets_yields_empty_catalog() {
        let dir = TempDir::new().unwrap();
        let catalog = scan_catalog(dir.path()).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn missing_root_is_not_found() {
        let err = scan_catalog(Path::new("/definitely/missing/Videos")).unwrap_err();
        assert!(matches!(err, VideoError::NotFound { what: "video library", .. }));
    }

    #[test]
    fn insert_ignores_empty_lists() {
        let catalog: AssetCatalog = vec![
            ("a", vec![PathBuf::from("a/1.mp4")]),
            ("b", Vec::new()),
        ]
        .into_iter()
        .collect();
        assert_eq!(catalog.category_count(), 1);
    }
}
