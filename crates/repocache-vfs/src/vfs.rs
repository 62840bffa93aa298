//! The in-memory virtual filesystem: a tree for navigation, an O(1)
//! file index for existence/stat checks, and an LRU content cache with
//! lazy loading from the cached repository's content dump.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use repocache_index::ContentIndex;
use repocache_manifest::{FileLocation, RepositoryContext};

use crate::config::VfsConfig;
use crate::error::{Result, VfsError};
use crate::languages::{detect_language, is_binary};
use crate::tree::TreeNode;

#[derive(Debug, Clone)]
pub struct VirtualFile {
    pub path: String,
    pub location: FileLocation,
    pub language: Option<&'static str>,
    pub is_binary: bool,
}

#[derive(Debug, Clone)]
pub struct FileStat {
    pub path: String,
    pub size: usize,
    pub is_directory: bool,
    pub language: Option<&'static str>,
    pub is_binary: bool,
}

pub struct Vfs {
    repo: Arc<RepositoryContext>,
    tree: RwLock<TreeNode>,
    file_index: DashMap<String, VirtualFile>,
    content_index: Option<ContentIndex>,
    content_text: Option<String>,
    content_cache: Mutex<LruCache<String, Arc<Vec<u8>>>>,
    cache_bytes: AtomicUsize,
    config: VfsConfig,
}

impl Vfs {
    pub fn new(repo: Arc<RepositoryContext>, config: VfsConfig) -> Self {
        let mut tree = TreeNode::new_root();
        let file_index = DashMap::new();

        for (path, location) in &repo.file_index {
            tree.insert_file(path);
            file_index.insert(
                path.clone(),
                VirtualFile {
                    path: path.clone(),
                    location: location.clone(),
                    language: detect_language(path),
                    is_binary: is_binary(path),
                },
            );
        }

        let content_text = String::from_utf8(repo.content_blob.clone()).ok();
        let content_index = content_text.as_deref().map(ContentIndex::build);

        let cap = std::num::NonZeroUsize::new(config.max_entries.max(1)).unwrap();

        Self {
            repo,
            tree: RwLock::new(tree),
            file_index,
            content_index,
            content_text,
            content_cache: Mutex::new(LruCache::new(cap)),
            cache_bytes: AtomicUsize::new(0),
            config,
        }
    }

    fn normalize(path: &str) -> String {
        path.strip_prefix("./").unwrap_or(path).to_string()
    }

    /// `Exists`/`Stat` are O(1): backed by the file index / tree lookup,
    /// never a linear scan.
    pub fn exists(&self, path: &str) -> bool {
        let path = Self::normalize(path);
        self.file_index.contains_key(&path) || self.tree.read().is_directory(&path)
    }

    pub fn is_directory(&self, path: &str) -> bool {
        self.tree.read().is_directory(&Self::normalize(path))
    }

    pub fn list(&self, dir: &str) -> Result<Vec<String>> {
        self.tree
            .read()
            .list(&Self::normalize(dir))
            .ok_or_else(|| VfsError::NotADirectory(dir.to_string()))
    }

    pub fn stat(&self, path: &str) -> Option<FileStat> {
        let path = Self::normalize(path);
        if let Some(file) = self.file_index.get(&path) {
            return Some(FileStat {
                path: file.path.clone(),
                size: file.location.size,
                is_directory: false,
                language: file.language,
                is_binary: file.is_binary,
            });
        }
        if self.tree.read().is_directory(&path) {
            return Some(FileStat {
                path,
                size: 0,
                is_directory: true,
                language: None,
                is_binary: false,
            });
        }
        None
    }

    fn record_insert(&self, path: &str, bytes: Arc<Vec<u8>>) {
        self.cache_bytes.fetch_add(bytes.len(), Ordering::SeqCst);
        let mut cache = self.content_cache.lock();
        if let Some(evicted) = cache.put(path.to_string(), bytes) {
            self.cache_bytes.fetch_sub(evicted.len(), Ordering::SeqCst);
        }
        while self.cache_bytes.load(Ordering::SeqCst) > self.config.max_memory_bytes {
            match cache.pop_lru() {
                Some((_, evicted)) => {
                    self.cache_bytes.fetch_sub(evicted.len(), Ordering::SeqCst);
                }
                None => break,
            }
        }
    }

    fn load_via_indexer(&self, path: &str) -> Option<Vec<u8>> {
        let index = self.content_index.as_ref()?;
        let text = self.content_text.as_deref()?;
        repocache_index::get_content(text, index, path)
            .ok()
            .map(|s| s.into_bytes())
    }

    fn load_via_file_location(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let Some(file) = self.file_index.get(path) else {
            return Ok(None);
        };
        match file.location.extract(&self.repo.content_blob) {
            Ok(bytes) => Ok(Some(bytes.to_vec())),
            Err(e) => {
                tracing::warn!(path, error = %e, "file location failed checksum verification");
                Ok(None)
            }
        }
    }

    /// `Open(path) -> content | None`: LRU, then the content indexer
    /// (skipped for binary files), then a checksum-verified byte-offset
    /// extraction as the last resort.
    pub fn open(&self, path: &str) -> Result<Option<Arc<Vec<u8>>>> {
        let path = Self::normalize(path);

        if let Some(cached) = self.content_cache.lock().get(&path).cloned() {
            return Ok(Some(cached));
        }

        let is_binary_file = self
            .file_index
            .get(&path)
            .map(|f| f.is_binary)
            .unwrap_or(false);

        let bytes = if is_binary_file {
            self.load_via_file_location(&path)?
        } else {
            match self.load_via_indexer(&path) {
                Some(bytes) => Some(bytes),
                None => self.load_via_file_location(&path)?,
            }
        };

        match bytes {
            Some(bytes) => {
                let arc = Arc::new(bytes);
                self.record_insert(&path, arc.clone());
                Ok(Some(arc))
            }
            None => Ok(None),
        }
    }

    pub fn find_by_extension(&self, ext: &str) -> Vec<String> {
        let ext = ext.trim_start_matches('.');
        self.file_index
            .iter()
            .filter(|entry| entry.key().rsplit('.').next() == Some(ext))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn find_by_language(&self, lang: &str) -> Vec<String> {
        self.file_index
            .iter()
            .filter(|entry| entry.language == Some(lang))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn repo(&self) -> &RepositoryContext {
        &self.repo
    }

    pub fn file_locations(&self) -> BTreeMap<String, FileLocation> {
        self.file_index
            .iter()
            .map(|entry| (entry.key().clone(), entry.location.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repocache_manifest::RepositoryContext;
    use std::collections::BTreeMap;

    fn sample_repo() -> Arc<RepositoryContext> {
        let boundary = "=".repeat(repocache_index::BOUNDARY_LEN);
        let content = format!(
            "{b}\nFILE: src/main.rs\n{b}\nfn main() {{}}\n",
            b = boundary
        );
        let content_bytes = content.into_bytes();
        let body_start = content_bytes.len() - "fn main() {}\n".len();
        let body_end = content_bytes.len();
        let location = FileLocation::new(body_start, body_end, &content_bytes[body_start..body_end]);

        let mut file_index = BTreeMap::new();
        file_index.insert("src/main.rs".to_string(), location);

        Arc::new(
            RepositoryContext::new(
                "https://github.com/acme/widgets".into(),
                "acme/widgets".into(),
                "main".into(),
                "a tiny crate".into(),
                content_bytes,
                "src/main.rs".into(),
                BTreeMap::new(),
                file_index,
                13,
            )
            .unwrap(),
        )
    }

    #[test]
    fn exists_and_stat_are_available_without_opening() {
        let vfs = Vfs::new(sample_repo(), VfsConfig::default());
        assert!(vfs.exists("src/main.rs"));
        assert!(vfs.exists("src"));
        assert!(!vfs.exists("src/missing.rs"));

        let stat = vfs.stat("src/main.rs").unwrap();
        assert_eq!(stat.language, Some("rust"));
        assert!(!stat.is_directory);
    }

    #[test]
    fn open_populates_cache_on_first_read() {
        let vfs = Vfs::new(sample_repo(), VfsConfig::default());
        let content = vfs.open("src/main.rs").unwrap().unwrap();
        assert_eq!(&**content, b"fn main() {}\n");

        // Second open should be served from cache with identical content.
        let again = vfs.open("src/main.rs").unwrap().unwrap();
        assert_eq!(content, again);
    }

    #[test]
    fn open_missing_path_is_none() {
        let vfs = Vfs::new(sample_repo(), VfsConfig::default());
        assert!(vfs.open("nonexistent.rs").unwrap().is_none());
    }

    #[test]
    fn find_by_extension_and_language() {
        let vfs = Vfs::new(sample_repo(), VfsConfig::default());
        assert_eq!(vfs.find_by_extension("rs"), vec!["src/main.rs".to_string()]);
        assert_eq!(vfs.find_by_language("rust"), vec!["src/main.rs".to_string()]);
        assert!(vfs.find_by_language("python").is_empty());
    }

    #[test]
    fn cache_evicts_past_entry_cap() {
        let config = VfsConfig { max_entries: 1, max_memory_bytes: 100 * 1024 * 1024 };
        let vfs = Vfs::new(sample_repo(), config);
        vfs.open("src/main.rs").unwrap();
        // Cache holds at most 1 entry; re-opening the same path still works.
        assert!(vfs.open("src/main.rs").unwrap().is_some());
    }
}
