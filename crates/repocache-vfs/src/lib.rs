pub mod config;
pub mod error;
pub mod git_sim;
pub mod languages;
pub mod tree;
pub mod vfs;

pub use config::VfsConfig;
pub use error::{Result, VfsError};
pub use git_sim::{FileState, GitSimulator, GitStatus, RepoInfo};
pub use languages::{detect_language, is_binary};
pub use tree::TreeNode;
pub use vfs::{FileStat, Vfs, VirtualFile};
