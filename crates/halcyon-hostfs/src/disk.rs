//! `std::fs`-backed [`HostFilesystem`].

use std::fs;
use std::io;
use std::path::Path;

use crate::{split_parent, FsEntry, HostFilesystem};

/// The production filesystem. Paths are host-absolute strings produced by the
/// virtual path translator.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskFilesystem;

fn leaf_name(path: &str) -> String {
    split_parent(path).1.to_owned()
}

/// Scans one directory level, returning sorted children and the number of
/// descendants included in the scan.
fn scan_dir(path: &str, recursive: bool) -> (Vec<FsEntry>, u64) {
    let Ok(read_dir) = fs::read_dir(path) else {
        return (Vec::new(), 0);
    };

    let mut names: Vec<String> = read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    let mut children = Vec::with_capacity(names.len());
    let mut count = 0u64;
    for name in names {
        let child_path = format!("{path}/{name}");
        let Ok(meta) = fs::metadata(&child_path) else {
            continue;
        };
        count += 1;
        if meta.is_dir() {
            let (sub_children, sub_count) = if recursive {
                scan_dir(&child_path, true)
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
        } else {
            children.push(FsEntry {
                name,
                physical_path: child_path,
                is_directory: false,
                size: meta.len(),
                children: Vec::new(),
            });
        }
    }
    (children, count)
}

impl HostFilesystem for DiskFilesystem {
    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn is_directory(&self, path: &str) -> bool {
        Path::new(path).is_dir()
    }

    fn scan_directory_tree(&self, path: &str, recursive: bool) -> FsEntry {
        let is_directory = self.is_directory(path);
        let (children, count) = if is_directory {
            scan_dir(path, recursive)
        } else {
            (Vec::new(), 0)
        };
        FsEntry {
            name: leaf_name(path),
            physical_path: path.to_owned(),
            is_directory,
            size: count,
            children,
        }
    }

    fn create_dir(&mut self, path: &str) -> bool {
        fs::create_dir(path).is_ok()
    }

    fn create_full_path(&mut self, path: &str) -> bool {
        let (parent, _leaf) = split_parent(path);
        if parent.is_empty() {
            return true;
        }
        fs::create_dir_all(parent).is_ok()
    }

    fn create_empty_file(&mut self, path: &str) -> bool {
        fs::File::create(path).is_ok()
    }

    fn delete_file(&mut self, path: &str) -> bool {
        // The caller cares about the file being gone, not about the unlink
        // itself, so a missing file counts as success.
        if !self.exists(path) {
            return true;
        }
        if self.is_directory(path) {
            tracing::warn!("delete_file called on directory {path}");
            return false;
        }
        fs::remove_file(path).is_ok()
    }

    fn delete_dir_recursively(&mut self, path: &str) -> bool {
        fs::remove_dir_all(path).is_ok()
    }

    fn rename(&mut self, from: &str, to: &str) -> bool {
        fs::rename(from, to).is_ok()
    }

    fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_file(&mut self, path: &str, data: &[u8]) -> io::Result<()> {
        fs::write(path, data)
    }
}
