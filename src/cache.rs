//! Filesystem index over previously downloaded documents.
//!
//! There is no sidecar database: the download hierarchy itself is the index. Lookups
//! decompose matched paths back into the identifying fields that produced them, so
//! `build_download_path` followed by a cache lookup round-trips the document id.

use std::path::{Path, PathBuf};

use crate::paths::find_document_in_hierarchy;

/// A document reconstructed from its location in the download hierarchy.
///
/// Files stored outside the canonical layout (flat files dropped next to the root)
/// still resolve, but only the `doc_id` can be recovered for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDocument {
    pub doc_id: String,
    pub sec_code: Option<String>,
    pub company_name: Option<String>,
    pub doc_type_code: Option<String>,
    /// Period folder in `YYYYMM` form.
    pub period: Option<String>,
    pub file_path: PathBuf,
}

impl CachedDocument {
    /// Parses a PDF path under `base_dir` back into its identifying fields.
    ///
    /// Expects the `<sec>_<name>/<type>_<type_name>/<YYYYMM>/<doc_id>.pdf` shape;
    /// shallower layouts yield a record with only `doc_id` and `file_path` set.
    pub fn from_path(base_dir: &Path, path: &Path) -> Self {
        let doc_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let relative: Vec<String> = path
            .strip_prefix(base_dir)
            .map(|p| {
                p.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();

        // Expected: [company_folder, doc_type_folder, period_folder, file]
        let (mut sec_code, mut company_name, mut doc_type_code, mut period) =
            (None, None, None, None);
        if relative.len() == 4 {
            if let Some((code, name)) = relative[0].split_once('_') {
                sec_code = Some(code.to_string());
                company_name = Some(name.to_string());
            }
            if let Some((code, _)) = relative[1].split_once('_') {
                doc_type_code = Some(code.to_string());
            }
            period = Some(relative[2].clone());
        }

        CachedDocument {
            doc_id,
            sec_code,
            company_name,
            doc_type_code,
            period,
            file_path: path.to_path_buf(),
        }
    }
}

/// Summary statistics over the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total_documents: usize,
    /// Unique securities-code prefixes among cached documents.
    pub total_companies: usize,
}

/// Service for locating previously downloaded documents on disk.
///
/// # Example
///
/// ```no_run
/// # use std::path::PathBuf;
/// use kaijikit::LocalCache;
///
/// let cache = LocalCache::new(PathBuf::from("downloads"));
/// if let Some(doc) = cache.find_by_doc_id("S100ABCD") {
///     println!("cached at {}", doc.file_path.display());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct LocalCache {
    download_dir: PathBuf,
}

impl LocalCache {
    pub fn new(download_dir: PathBuf) -> Self {
        Self { download_dir }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Finds a cached document by id anywhere under the download root.
    pub fn find_by_doc_id(&self, doc_id: &str) -> Option<CachedDocument> {
        let path = find_document_in_hierarchy(&self.download_dir, doc_id)?;
        tracing::debug!(doc_id, path = %path.display(), "cache hit");
        Some(CachedDocument::from_path(&self.download_dir, &path))
    }

    /// Finds cached documents matching the hierarchy-level filters.
    ///
    /// Each filter narrows one directory level: `sec_code` the company folder prefix,
    /// `doc_type_code` the type folder prefix, `period` the exact `YYYYMM` folder.
    /// Omitted filters match every folder at that level.
    pub fn find_by_filter(
        &self,
        sec_code: Option<&str>,
        doc_type_code: Option<&str>,
        period: Option<&str>,
    ) -> Vec<CachedDocument> {
        let mut results = Vec::new();

        for company_dir in list_dirs(&self.download_dir) {
            if let Some(code) = sec_code {
                if !dir_name(&company_dir).starts_with(&format!("{code}_")) {
                    continue;
                }
            }
            for type_dir in list_dirs(&company_dir) {
                if let Some(code) = doc_type_code {
                    if !dir_name(&type_dir).starts_with(&format!("{code}_")) {
                        continue;
                    }
                }
                for period_dir in list_dirs(&type_dir) {
                    if let Some(p) = period {
                        if dir_name(&period_dir) != p {
                            continue;
                        }
                    }
                    for pdf in list_pdfs(&period_dir) {
                        results.push(CachedDocument::from_path(&self.download_dir, &pdf));
                    }
                }
            }
        }

        tracing::debug!(count = results.len(), "cache filter scan");
        results
    }

    /// Lists every cached PDF under the download root, recursively.
    pub fn list_all(&self) -> Vec<CachedDocument> {
        let mut results = Vec::new();
        let mut stack = vec![self.download_dir.clone()];

        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().is_some_and(|e| e == "pdf") {
                    results.push(CachedDocument::from_path(&self.download_dir, &path));
                }
            }
        }

        results
    }

    pub fn stats(&self) -> CacheStats {
        let all = self.list_all();
        let companies: std::collections::HashSet<&str> = all
            .iter()
            .filter_map(|d| d.sec_code.as_deref())
            .collect();
        CacheStats {
            total_documents: all.len(),
            total_companies: companies.len(),
        }
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn list_dirs(path: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(path) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

fn list_pdfs(path: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(path) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "pdf"))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::build_download_path;

    fn seed(dir: &Path, sec: &str, name: &str, doc_type: &str, period: &str, doc_id: &str) {
        let path = build_download_path(
            dir,
            Some(sec),
            Some(name),
            Some(doc_type),
            Some(period),
            doc_id,
        );
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"%PDF-1.4").unwrap();
    }

    #[test]
    fn find_by_doc_id_round_trips_fields() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), "72030", "トヨタ自動車", "120", "2025-03-31", "S100ABCD");

        let cache = LocalCache::new(dir.path().to_path_buf());
        let doc = cache.find_by_doc_id("S100ABCD").unwrap();
        assert_eq!(doc.doc_id, "S100ABCD");
        assert_eq!(doc.sec_code.as_deref(), Some("72030"));
        assert_eq!(doc.company_name.as_deref(), Some("トヨタ自動車"));
        assert_eq!(doc.doc_type_code.as_deref(), Some("120"));
        assert_eq!(doc.period.as_deref(), Some("202503"));
    }

    #[test]
    fn flat_layout_yields_only_doc_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("S100FLAT.pdf"), b"%PDF-1.4").unwrap();

        let cache = LocalCache::new(dir.path().to_path_buf());
        let doc = cache.find_by_doc_id("S100FLAT").unwrap();
        assert_eq!(doc.doc_id, "S100FLAT");
        assert!(doc.sec_code.is_none());
        assert!(doc.period.is_none());
    }

    #[test]
    fn filter_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path(), "72030", "トヨタ自動車", "120", "2025-03-31", "S100AAAA");
        seed(dir.path(), "72030", "トヨタ自動車", "140", "2024-12-31", "S100BBBB");
        seed(dir.path(), "67580", "ソニーグループ", "120", "2025-03-31", "S100CCCC");

        let cache = LocalCache::new(dir.path().to_path_buf());

        let toyota = cache.find_by_filter(Some("72030"), None, None);
        assert_eq!(toyota.len(), 2);

        let annual = cache.find_by_filter(None, Some("120"), None);
        assert_eq!(annual.len(), 2);

        let period = cache.find_by_filter(Some("72030"), Some("140"), Some("202412"));
        assert_eq!(period.len(), 1);
        assert_eq!(period[0].doc_id, "S100BBBB");

        let stats = cache.stats();
        assert_eq!(stats.total_documents, 3);
        assert_eq!(stats.total_companies, 2);
    }
}
