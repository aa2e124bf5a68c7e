//! Deterministic in-memory [`HostFilesystem`] for tests.
//!
//! Stores every node under its full path string in a `BTreeMap`, so listings
//! come out sorted without extra work. Semantics mirror [`DiskFilesystem`]:
//! single-level `create_dir`/`create_empty_file` require an existing parent,
//! `delete_file` treats a missing path as success.

use std::collections::BTreeMap;
use std::io;

use crate::{split_parent, FsEntry, HostFilesystem};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Debug, Default, Clone)]
pub struct MemFilesystem {
    nodes: BTreeMap<String, Node>,
}

fn norm(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

impl MemFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for test setup: creates the directory and all parents.
    pub fn mkdir_all(&mut self, path: &str) {
        let path = norm(path);
        let mut prefix = String::new();
        for part in path.split('/').filter(|part| !part.is_empty()) {
            prefix.push('/');
            prefix.push_str(part);
            self.nodes.entry(prefix.clone()).or_insert(Node::Dir);
        }
    }

    fn parent_exists(&self, path: &str) -> bool {
        let (parent, _) = split_parent(path);
        parent.is_empty() || parent == "/" || matches!(self.nodes.get(parent), Some(Node::Dir))
    }

    fn direct_children(&self, dir: &str) -> Vec<String> {
        let prefix = if dir == "/" {
            "/".to_owned()
        } else {
            format!("{dir}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| !key[prefix.len()..].contains('/'))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn scan_entry(&self, path: &str, recursive: bool) -> (Vec<FsEntry>, u64) {
        let mut children = Vec::new();
        let mut count = 0u64;
        for child_path in self.direct_children(path) {
            let name = split_parent(&child_path).1.to_owned();
            count += 1;
            match &self.nodes[&child_path] {
                Node::Dir => {
                    let (sub_children, sub_count) = if recursive {
                        self.scan_entry(&child_path, true)
                    } else {
                        (Vec::new(), 0)
                    };
                    count += sub_count;
                    children.push(FsEntry {
                        name,
                        physical_path: child_path,
                        is_directory: true,
                        size: sub_count,
                        children: sub_children,
                    });
                }
                Node::File(data) => {
                    children.push(FsEntry {
                        name,
                        physical_path: child_path.clone(),
                        is_directory: false,
                        size: data.len() as u64,
                        children: Vec::new(),
                    });
                }
            }
        }
        (children, count)
    }
}

impl HostFilesystem for MemFilesystem {
    fn exists(&self, path: &str) -> bool {
        let path = norm(path);
        path == "/" || self.nodes.contains_key(path)
    }

    fn is_directory(&self, path: &str) -> bool {
        let path = norm(path);
        path == "/" || matches!(self.nodes.get(path), Some(Node::Dir))
    }

    fn scan_directory_tree(&self, path: &str, recursive: bool) -> FsEntry {
        let path = norm(path);
        let is_directory = self.is_directory(path);
        let (children, count) = if is_directory {
            self.scan_entry(path, recursive)
        } else {
            (Vec::new(), 0)
        };
        FsEntry {
            name: split_parent(path).1.to_owned(),
            physical_path: path.to_owned(),
            is_directory,
            size: count,
            children,
        }
    }

    fn create_dir(&mut self, path: &str) -> bool {
        let path = norm(path).to_owned();
        if self.nodes.contains_key(&path) || !self.parent_exists(&path) {
            return false;
        }
        self.nodes.insert(path, Node::Dir);
        true
    }

    fn create_full_path(&mut self, path: &str) -> bool {
        let (parent, _leaf) = split_parent(path);
        if !parent.is_empty() && parent != "/" {
            if matches!(self.nodes.get(parent), Some(Node::File(_))) {
                return false;
            }
            self.mkdir_all(parent);
        }
        true
    }

    fn create_empty_file(&mut self, path: &str) -> bool {
        let path = norm(path).to_owned();
        if self.is_directory(&path) || !self.parent_exists(&path) {
            return false;
        }
        self.nodes.insert(path, Node::File(Vec::new()));
        true
    }

    fn delete_file(&mut self, path: &str) -> bool {
        let path = norm(path);
        match self.nodes.get(path) {
            None => true,
            Some(Node::Dir) => false,
            Some(Node::File(_)) => {
                self.nodes.remove(path);
                true
            }
        }
    }

    fn delete_dir_recursively(&mut self, path: &str) -> bool {
        let path = norm(path);
        if !self.is_directory(path) || path == "/" {
            return false;
        }
        let prefix = format!("{path}/");
        let doomed: Vec<String> = self
            .nodes
            .keys()
            .filter(|key| key.as_str() == path || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in doomed {
            self.nodes.remove(&key);
        }
        true
    }

    fn rename(&mut self, from: &str, to: &str) -> bool {
        let from = norm(from).to_owned();
        let to = norm(to).to_owned();
        if !self.nodes.contains_key(&from) || !self.parent_exists(&to) {
            return false;
        }
        // Renaming over a non-empty directory fails like the host call would.
        if self.is_directory(&to) && !self.direct_children(&to).is_empty() {
            return false;
        }
        self.nodes.remove(&to);

        let from_prefix = format!("{from}/");
        let moved: Vec<(String, Node)> = self
            .nodes
            .iter()
            .filter(|(key, _)| key.as_str() == from || key.starts_with(&from_prefix))
            .map(|(key, node)| (key.clone(), node.clone()))
            .collect();
        for (key, node) in moved {
            self.nodes.remove(&key);
            let new_key = format!("{to}{}", &key[from.len()..]);
            self.nodes.insert(new_key, node);
        }
        true
    }

    fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        match self.nodes.get(norm(path)) {
            Some(Node::File(data)) => Ok(data.clone()),
            Some(Node::Dir) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path is a directory",
            )),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "no such file")),
        }
    }

    fn write_file(&mut self, path: &str, data: &[u8]) -> io::Result<()> {
        let path = norm(path).to_owned();
        if self.is_directory(&path) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path is a directory",
            ));
        }
        if !self.parent_exists(&path) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "missing parent"));
        }
        self.nodes.insert(path, Node::File(data.to_vec()));
        Ok(())
    }
}
