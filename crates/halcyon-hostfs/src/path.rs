//! Guest-visible path to host-local path translation.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("guest path {0:?} does not begin with '/'")]
    NotAbsolute(String),
}

/// Maps guest-visible absolute paths beneath a session-scoped host root.
///
/// Validation is limited to the leading separator; `.` and `..` segments are
/// passed through untouched and inherit whatever the host filesystem does
/// with them.
#[derive(Debug, Clone)]
pub struct VirtualRoot {
    root: String,
}

impl VirtualRoot {
    /// `root` is the session-scoped host directory, without a trailing
    /// separator.
    pub fn new(root: impl Into<String>) -> Self {
        let mut root = root.into();
        while root.ends_with('/') && root.len() > 1 {
            root.pop();
        }
        Self { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Translates a guest path. Rejected before any host access when the
    /// leading separator is missing.
    pub fn host_path(&self, guest_path: &str) -> Result<String, PathError> {
        if !guest_path.starts_with('/') {
            return Err(PathError::NotAbsolute(guest_path.to_owned()));
        }
        Ok(format!("{}{}", self.root, guest_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_beneath_the_session_root() {
        let root = VirtualRoot::new("/work/nand");
        assert_eq!(root.host_path("/tmp").unwrap(), "/work/nand/tmp");
        assert_eq!(
            root.host_path("/title/00010001/save.bin").unwrap(),
            "/work/nand/title/00010001/save.bin"
        );
    }

    #[test]
    fn rejects_relative_guest_paths() {
        let root = VirtualRoot::new("/work/nand");
        assert_eq!(
            root.host_path("tmp/file"),
            Err(PathError::NotAbsolute("tmp/file".to_owned()))
        );
        assert_eq!(
            root.host_path(""),
            Err(PathError::NotAbsolute(String::new()))
        );
    }

    #[test]
    fn trailing_separator_on_root_is_dropped() {
        let root = VirtualRoot::new("/work/nand/");
        assert_eq!(root.host_path("/a").unwrap(), "/work/nand/a");
    }

    #[test]
    fn dot_segments_pass_through_untouched() {
        let root = VirtualRoot::new("/work/nand");
        assert_eq!(root.host_path("/a/../b").unwrap(), "/work/nand/a/../b");
    }
}
