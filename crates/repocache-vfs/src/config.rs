/// Twin caps on the VFS content cache: eviction runs until both pass.
#[derive(Debug, Clone, Copy)]
pub struct VfsConfig {
    pub max_entries: usize,
    pub max_memory_bytes: usize,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            max_entries: 200,
            max_memory_bytes: 100 * 1024 * 1024,
        }
    }
}
