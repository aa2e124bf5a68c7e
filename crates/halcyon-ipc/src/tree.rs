//! Scratch-directory capture and restore.
//!
//! The scratch root's live contents go into the stream as a flat record
//! sequence: one-byte type tag (`b'd'` directory, `b'f'` file), the path
//! relative to the scratch root, and for files a 4-byte length plus the
//! content in fixed 65536-byte chunks. A zero tag terminates the section.
//!
//! Restore wipes the scratch root first and creates intermediate directories
//! on demand: the flat list does not guarantee that a directory's own record
//! precedes the records of the files inside it.

use std::collections::VecDeque;

use halcyon_hostfs::{FsEntry, HostFilesystem};
use halcyon_state::{Result, StateError, StateStream};

pub const FILE_CHUNK_SIZE: usize = 65536;

const TAG_END: u8 = 0;
const TAG_DIR: u8 = b'd';
const TAG_FILE: u8 = b'f';

/// Captures the live contents of `root` into the stream.
///
/// Traversal is an explicit worklist, not recursion, so host directory depth
/// never translates into stack depth.
pub fn save_tree(fs: &dyn HostFilesystem, root: &str, p: &mut StateStream) -> Result<()> {
    let parent = fs.scan_directory_tree(root, true);
    let mut todo: VecDeque<FsEntry> = parent.children.into_iter().collect();

    while let Some(entry) = todo.pop_front() {
        let mut relative = entry
            .physical_path
            .get(root.len() + 1..)
            .unwrap_or_default()
            .to_owned();
        let mut tag = if entry.is_directory { TAG_DIR } else { TAG_FILE };
        p.do_u8(&mut tag)?;
        p.do_string(&mut relative)?;

        if entry.is_directory {
            todo.extend(entry.children);
        } else {
            let data = fs
                .read_file(&entry.physical_path)
                .map_err(|_| StateError::Corrupt("scratch file unreadable during save"))?;
            let mut size: u32 = data
                .len()
                .try_into()
                .map_err(|_| StateError::Corrupt("scratch file exceeds u32 length"))?;
            p.do_u32(&mut size)?;
            for chunk in data.chunks(FILE_CHUNK_SIZE) {
                let mut buf = chunk.to_vec();
                p.do_raw(&mut buf)?;
            }
        }
    }

    let mut end = TAG_END;
    p.do_u8(&mut end)
}

/// Wipes `root` and rebuilds it from the stream.
pub fn load_tree(fs: &mut dyn HostFilesystem, root: &str, p: &mut StateStream) -> Result<()> {
    fs.delete_dir_recursively(root);
    fs.create_dir(root);

    loop {
        let mut tag = 0u8;
        p.do_u8(&mut tag)?;
        if tag == TAG_END {
            return Ok(());
        }

        let mut relative = String::new();
        p.do_string(&mut relative)?;
        let name = format!("{root}/{relative}");

        match tag {
            TAG_DIR => {
                if !fs.create_full_path(&format!("{name}/")) {
                    return Err(StateError::Corrupt("scratch directory not creatable"));
                }
            }
            TAG_FILE => {
                let mut size = 0u32;
                p.do_u32(&mut size)?;

                let mut data = Vec::new();
                let mut remaining = size as usize;
                while remaining > 0 {
                    let n = remaining.min(FILE_CHUNK_SIZE);
                    let mut buf = vec![0u8; n];
                    p.do_raw(&mut buf)?;
                    data.extend_from_slice(&buf);
                    remaining -= n;
                }

                fs.create_full_path(&name);
                fs.write_file(&name, &data)
                    .map_err(|_| StateError::Corrupt("scratch file not writable"))?;
            }
            _ => return Err(StateError::Corrupt("unknown scratch entry tag")),
        }
    }
}
