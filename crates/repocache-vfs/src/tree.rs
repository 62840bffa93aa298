//! Nested directory tree used for `List` and directory detection.
//! `Exists`/`Stat` performance is carried by `Vfs::file_index` instead —
//! this tree only needs to answer "what's under this directory".

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub enum TreeNode {
    File,
    Directory(BTreeMap<String, TreeNode>),
}

impl TreeNode {
    pub fn new_root() -> Self {
        TreeNode::Directory(BTreeMap::new())
    }

    pub fn insert_file(&mut self, path: &str) {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let Some((file_name, dir_parts)) = parts.split_last() else {
            return;
        };

        let mut node = self;
        for part in dir_parts {
            node = match node {
                TreeNode::Directory(children) => children
                    .entry(part.to_string())
                    .or_insert_with(|| TreeNode::Directory(BTreeMap::new())),
                TreeNode::File => return,
            };
        }
        if let TreeNode::Directory(children) = node {
            children.insert(file_name.to_string(), TreeNode::File);
        }
    }

    fn navigate(&self, path: &str) -> Option<&TreeNode> {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let mut node = self;
        for part in parts {
            match node {
                TreeNode::Directory(children) => node = children.get(part)?,
                TreeNode::File => return None,
            }
        }
        Some(node)
    }

    pub fn is_directory(&self, path: &str) -> bool {
        if path.is_empty() || path == "/" {
            return true;
        }
        matches!(self.navigate(path), Some(TreeNode::Directory(_)))
    }

    /// Sorted names of the immediate children of `dir`.
    pub fn list(&self, dir: &str) -> Option<Vec<String>> {
        let node = if dir.is_empty() || dir == "/" {
            self
        } else {
            self.navigate(dir)?
        };
        match node {
            TreeNode::Directory(children) => Some(children.keys().cloned().collect()),
            TreeNode::File => None,
        }
    }
}
