//! The kernel filesystem device.
//!
//! Implements the console's filesystem control protocol over an injected
//! [`HostFilesystem`]. Error codes, buffer layouts, and edge-case behavior
//! follow the hardware protocol exactly; guest software breaks on any
//! deviation, including the lossy contracts (DELETE_FILE always reports
//! success) and the quirks (the READ_DIR entry cap is read from the same
//! vector that carried the path).

use std::cell::RefCell;
use std::rc::Rc;

use halcyon_hostfs::{unescape_filename, FsEntry, HostFilesystem, VirtualRoot};
use halcyon_mem::{GuestMemory, GuestMemoryResult};
use halcyon_state::{StateStream, StreamMode};

use crate::device::IpcDevice;
use crate::request::{
    IoctlRequest, IoctlvRequest, IpcReply, LogAlert, OpenRequest, TickSource, UserAlert, FS_EEXIST,
    FS_EINVAL, FS_ENOENT, IPC_EINVAL, IPC_SUCCESS,
};
use crate::tree;

pub const IOCTL_GET_STATS: u32 = 0x02;
pub const IOCTL_CREATE_DIR: u32 = 0x03;
pub const IOCTLV_READ_DIR: u32 = 0x04;
pub const IOCTL_SET_ATTR: u32 = 0x05;
pub const IOCTL_GET_ATTR: u32 = 0x06;
pub const IOCTL_DELETE_FILE: u32 = 0x07;
pub const IOCTL_RENAME_FILE: u32 = 0x08;
pub const IOCTL_CREATE_FILE: u32 = 0x09;
pub const IOCTLV_GETUSAGE: u32 = 0x0C;
pub const IOCTL_SHUTDOWN: u32 = 0x0D;

/// Guest-visible scratch directory, wiped on every device open.
const SCRATCH_DIR: &str = "/tmp";

/// Fixed-width path field in single-buffer commands.
const PATH_FIELD_LEN: usize = 64;

/// One storage block as reported by usage queries.
const USAGE_BLOCK_SIZE: u64 = 16 * 1024;

/// Static usage counters returned by GET_STATS. Placeholders, not derived
/// from real usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NandStat {
    pub block_size: u32,
    pub free_user_blocks: u32,
    pub used_user_blocks: u32,
    pub free_sys_blocks: u32,
    pub used_sys_blocks: u32,
    pub free_inodes: u32,
    pub used_inodes: u32,
}

impl NandStat {
    pub const PLACEHOLDER: NandStat = NandStat {
        block_size: 0x4000,
        free_user_blocks: 0x5DEC,
        used_user_blocks: 0x1DD4,
        free_sys_blocks: 0x10,
        used_sys_blocks: 0x02F0,
        free_inodes: 0x146B,
        used_inodes: 0x0394,
    };

    /// Serialized size of the record in guest memory.
    pub const SIZE: u32 = 28;

    fn write_to(&self, mem: &mut dyn GuestMemory, mut addr: u32) -> GuestMemoryResult<()> {
        for value in [
            self.block_size,
            self.free_user_blocks,
            self.used_user_blocks,
            self.free_sys_blocks,
            self.used_sys_blocks,
            self.free_inodes,
            self.used_inodes,
        ] {
            mem.write_u32_be(addr, value)?;
            addr += 4;
        }
        Ok(())
    }
}

pub type SharedFilesystem = Rc<RefCell<dyn HostFilesystem>>;

pub struct FsDevice {
    name: String,
    active: bool,
    root: VirtualRoot,
    fs: SharedFilesystem,
    ticks: Rc<dyn TickSource>,
    alert: Box<dyn UserAlert>,
}

/// Total byte size of every file under `parent`.
fn total_file_size(parent: &FsEntry) -> u64 {
    let mut total = 0;
    for entry in &parent.children {
        if entry.is_directory {
            total += total_file_size(entry);
        } else {
            total += entry.size;
        }
    }
    total
}

impl FsDevice {
    pub fn new(root: VirtualRoot, fs: SharedFilesystem, ticks: Rc<dyn TickSource>) -> Self {
        Self {
            name: "/dev/fs".to_owned(),
            active: false,
            root,
            fs,
            ticks,
            alert: Box::new(LogAlert),
        }
    }

    pub fn with_alert(mut self, alert: Box<dyn UserAlert>) -> Self {
        self.alert = alert;
        self
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    // A delay of ~1/1000th of a second is too short and hangs guest software
    // that polls the reply queue faster than real hardware answers. 1/500th
    // is observed safe.
    fn fs_reply(&self, return_value: i32) -> IpcReply {
        IpcReply {
            return_value,
            send_reply: true,
            reply_delay_ticks: self.ticks.ticks_per_second() / 500,
        }
    }

    fn scratch_path(&self) -> String {
        self.root
            .host_path(SCRATCH_DIR)
            .expect("scratch path literal is absolute")
    }

    /// Maps a guest path to its host location; logs and yields `None` for
    /// paths missing the leading separator, before any host access.
    fn host_path_checked(&self, guest_path: &str) -> Option<String> {
        match self.root.host_path(guest_path) {
            Ok(host) => Some(host),
            Err(_) => {
                tracing::warn!("not a valid path: {guest_path}");
                None
            }
        }
    }

    fn execute_ioctlv(
        &mut self,
        mem: &mut dyn GuestMemory,
        request: &IoctlvRequest,
    ) -> GuestMemoryResult<i32> {
        match request.request {
            IOCTLV_READ_DIR => self.read_dir(mem, request),
            IOCTLV_GETUSAGE => self.get_usage(mem, request),
            _ => {
                Self::dump_unknown(
                    self.name(),
                    request.request,
                    request.in_vectors.len(),
                    request.io_vectors.len(),
                );
                Ok(FS_EINVAL)
            }
        }
    }

    fn read_dir(
        &mut self,
        mem: &mut dyn GuestMemory,
        request: &IoctlvRequest,
    ) -> GuestMemoryResult<i32> {
        let Some(path_vector) = request.in_vectors.first().copied() else {
            tracing::warn!("READ_DIR: missing path vector");
            return Ok(FS_EINVAL);
        };

        let relative_path = mem.read_cstring(path_vector.address, path_vector.size as usize)?;
        let Some(dir_name) = self.host_path_checked(&relative_path) else {
            return Ok(FS_EINVAL);
        };

        tracing::info!("READ_DIR {dir_name}");

        let fs = self.fs.borrow();
        if !fs.exists(&dir_name) {
            tracing::warn!("READ_DIR: not found: {dir_name}");
            return Ok(FS_ENOENT);
        }
        // Guest software rarely cares which error a non-directory target
        // produces, as long as it is negative; the system menu does care.
        if !fs.is_directory(&dir_name) {
            tracing::warn!("READ_DIR: not a directory: {dir_name}");
            return Ok(FS_EINVAL);
        }

        let mut entry = fs.scan_directory_tree(&dir_name, false);
        drop(fs);

        let Some(io0) = request.io_vectors.first().copied() else {
            tracing::warn!("READ_DIR: missing output vector");
            return Ok(FS_EINVAL);
        };

        if request.in_vectors.len() == 1 && request.io_vectors.len() == 1 {
            // Count-only form; guests use it to size the follow-up query.
            tracing::info!("  {} entries found", entry.children.len());
            mem.write_u32_be(io0.address, entry.children.len() as u32)?;
            return Ok(IPC_SUCCESS);
        }

        let Some(io1) = request.io_vectors.get(1).copied() else {
            tracing::warn!("READ_DIR: missing count output vector");
            return Ok(FS_EINVAL);
        };

        // Decode escaped host-invalid characters so guests find the names
        // they originally wrote.
        for child in &mut entry.children {
            child.name = unescape_filename(&child.name);
        }
        entry.children.sort_by(|a, b| a.name.cmp(&b.name));

        // The entry cap shares the first input vector with the path string.
        let max_entries = mem.read_u32_be(path_vector.address)?;

        mem.fill(io0.address, io0.size as usize, 0)?;
        let mut addr = io0.address;
        let mut written = 0u32;
        for child in entry.children.iter().take(max_entries as usize) {
            mem.write_from(addr, child.name.as_bytes())?;
            addr += child.name.len() as u32;
            mem.write_u8(addr, 0)?;
            addr += 1;
            written += 1;
            tracing::info!("  found: {}", child.name);
        }
        mem.write_u32_be(io1.address, written)?;

        Ok(IPC_SUCCESS)
    }

    fn get_usage(
        &mut self,
        mem: &mut dyn GuestMemory,
        request: &IoctlvRequest,
    ) -> GuestMemoryResult<i32> {
        let (Some(path_vector), Some(io0), Some(io1)) = (
            request.in_vectors.first().copied(),
            request.io_vectors.first().copied(),
            request.io_vectors.get(1).copied(),
        ) else {
            tracing::warn!("GETUSAGE: malformed vector list");
            return Ok(FS_EINVAL);
        };

        let relative_path = mem.read_cstring(path_vector.address, path_vector.size as usize)?;
        let Some(path) = self.host_path_checked(&relative_path) else {
            return Ok(FS_EINVAL);
        };

        tracing::info!("GETUSAGE {path}");

        let mut fs_blocks = 0u32;
        let mut inodes = 0u32;
        let fs = self.fs.borrow();
        if fs.is_directory(&path) {
            if relative_path.starts_with("/title/00010001")
                || relative_path.starts_with("/title/00010005")
            {
                // Historical titles expect these exact counts; empty folders
                // report one inode.
                fs_blocks = 23;
                inodes = 42;
            } else {
                let parent_dir = fs.scan_directory_tree(&path, true);
                // One inode for the directory itself.
                inodes = 1 + parent_dir.size as u32;
                fs_blocks = (total_file_size(&parent_dir) / USAGE_BLOCK_SIZE) as u32;
            }
            tracing::info!("  blocks: {fs_blocks}, inodes: {inodes}");
        } else {
            tracing::warn!("GETUSAGE: cannot find directory: {path}");
        }
        drop(fs);

        mem.write_u32_be(io0.address, fs_blocks)?;
        mem.write_u32_be(io1.address, inodes)?;
        Ok(IPC_SUCCESS)
    }

    fn execute_ioctl(
        &mut self,
        mem: &mut dyn GuestMemory,
        request: &IoctlRequest,
    ) -> GuestMemoryResult<i32> {
        match request.request {
            IOCTL_GET_STATS => self.get_stats(mem, request),
            IOCTL_CREATE_DIR => self.create_dir(mem, request),
            IOCTL_SET_ATTR => self.set_attr(mem, request),
            IOCTL_GET_ATTR => self.get_attr(mem, request),
            IOCTL_DELETE_FILE => self.delete_file(mem, request),
            IOCTL_RENAME_FILE => self.rename_file(mem, request),
            IOCTL_CREATE_FILE => self.create_file(mem, request),
            IOCTL_SHUTDOWN => {
                // Power-off belongs to the frontend; the device only logs.
                tracing::info!("guest called shutdown");
                Ok(FS_EINVAL)
            }
            _ => {
                Self::dump_unknown(self.name(), request.request, 1, 1);
                Ok(FS_EINVAL)
            }
        }
    }

    fn get_stats(
        &mut self,
        mem: &mut dyn GuestMemory,
        request: &IoctlRequest,
    ) -> GuestMemoryResult<i32> {
        if request.buffer_out_size < NandStat::SIZE {
            return Ok(IPC_EINVAL);
        }
        tracing::warn!("GET_STATS: returning static usage counters");
        NandStat::PLACEHOLDER.write_to(mem, request.buffer_out)?;
        Ok(IPC_SUCCESS)
    }

    fn create_dir(
        &mut self,
        mem: &mut dyn GuestMemory,
        request: &IoctlRequest,
    ) -> GuestMemoryResult<i32> {
        let mut addr = request.buffer_in;
        let owner_id = mem.read_u32_be(addr)?;
        addr += 4;
        let group_id = mem.read_u16_be(addr)?;
        addr += 2;
        let guest_path = mem.read_cstring(addr, PATH_FIELD_LEN)?;
        let Some(dir_name) = self.host_path_checked(&guest_path) else {
            return Ok(FS_EINVAL);
        };
        addr += PATH_FIELD_LEN as u32;
        // Owner/group/other permissions plus reserved bytes.
        addr += 9;
        let attributes = mem.read_u8(addr)?;

        tracing::info!(
            "CREATE_DIR {dir_name}, owner 0x{owner_id:08x}, group 0x{group_id:04x}, \
             attributes 0x{attributes:02x}"
        );

        let with_separator = format!("{dir_name}/");
        self.fs.borrow_mut().create_full_path(&with_separator);
        if !self.fs.borrow().is_directory(&dir_name) {
            tracing::error!("CREATE_DIR {dir_name} failed");
        }

        Ok(IPC_SUCCESS)
    }

    fn set_attr(
        &mut self,
        mem: &mut dyn GuestMemory,
        request: &IoctlRequest,
    ) -> GuestMemoryResult<i32> {
        let mut addr = request.buffer_in;
        let owner_id = mem.read_u32_be(addr)?;
        addr += 4;
        let group_id = mem.read_u16_be(addr)?;
        addr += 2;
        let guest_path = mem.read_cstring(addr, PATH_FIELD_LEN)?;
        let Some(file_name) = self.host_path_checked(&guest_path) else {
            return Ok(FS_EINVAL);
        };
        addr += PATH_FIELD_LEN as u32;
        let owner_perm = mem.read_u8(addr)?;
        addr += 1;
        let group_perm = mem.read_u8(addr)?;
        addr += 1;
        let other_perm = mem.read_u8(addr)?;
        addr += 1;
        let attributes = mem.read_u8(addr)?;

        // Permissions are accepted and logged, never enforced.
        tracing::info!("SET_ATTR {file_name}");
        tracing::debug!(
            "  owner 0x{owner_id:08x} group 0x{group_id:04x} perms \
             {owner_perm:02x}/{group_perm:02x}/{other_perm:02x} attributes 0x{attributes:02x}"
        );

        Ok(IPC_SUCCESS)
    }

    fn get_attr(
        &mut self,
        mem: &mut dyn GuestMemory,
        request: &IoctlRequest,
    ) -> GuestMemoryResult<i32> {
        let guest_path = mem.read_cstring(request.buffer_in, PATH_FIELD_LEN)?;
        let Some(file_name) = self.host_path_checked(&guest_path) else {
            return Ok(FS_EINVAL);
        };

        let owner_id = 0u32;
        // Maker code placeholder ("01"); some titles carry their own.
        let group_id = 0x3031u16;
        let owner_perm = 0x3u8;
        let group_perm = 0x3u8;
        let other_perm = 0x3u8;
        let attributes = 0x00u8;

        let fs = self.fs.borrow();
        if fs.is_directory(&file_name) {
            tracing::info!("GET_ATTR directory {file_name} - all permission flags set");
        } else if fs.exists(&file_name) {
            tracing::info!("GET_ATTR {file_name} - all permission flags set");
        } else {
            tracing::info!("GET_ATTR unknown {file_name}");
            return Ok(FS_ENOENT);
        }
        drop(fs);

        if request.buffer_out_size == 76 {
            let mut addr = request.buffer_out;
            mem.write_u32_be(addr, owner_id)?;
            addr += 4;
            mem.write_u16_be(addr, group_id)?;
            addr += 2;
            // Echo the guest's own 64-byte path field back verbatim.
            let mut raw_path = [0u8; PATH_FIELD_LEN];
            mem.read_into(request.buffer_in, &mut raw_path)?;
            mem.write_from(addr, &raw_path)?;
            addr += PATH_FIELD_LEN as u32;
            for value in [owner_perm, group_perm, other_perm, attributes] {
                mem.write_u8(addr, value)?;
                addr += 1;
            }
        } else {
            tracing::warn!(
                "GET_ATTR needs a 76 byte output buffer, got {}",
                request.buffer_out_size
            );
        }

        Ok(IPC_SUCCESS)
    }

    fn delete_file(
        &mut self,
        mem: &mut dyn GuestMemory,
        request: &IoctlRequest,
    ) -> GuestMemoryResult<i32> {
        let guest_path = mem.read_cstring(request.buffer_in, PATH_FIELD_LEN)?;
        let Some(file_name) = self.host_path_checked(&guest_path) else {
            return Ok(FS_EINVAL);
        };

        let mut fs = self.fs.borrow_mut();
        if fs.delete_file(&file_name) {
            tracing::info!("DELETE_FILE {file_name}");
        } else if fs.delete_dir_recursively(&file_name) {
            tracing::info!("DELETE_FILE directory {file_name}");
        } else {
            tracing::warn!("DELETE_FILE {file_name} failed");
        }

        // The guest is always told the delete worked.
        Ok(IPC_SUCCESS)
    }

    fn rename_file(
        &mut self,
        mem: &mut dyn GuestMemory,
        request: &IoctlRequest,
    ) -> GuestMemoryResult<i32> {
        let guest_path = mem.read_cstring(request.buffer_in, PATH_FIELD_LEN)?;
        let Some(file_name) = self.host_path_checked(&guest_path) else {
            return Ok(FS_EINVAL);
        };

        let guest_path_rename =
            mem.read_cstring(request.buffer_in + PATH_FIELD_LEN as u32, PATH_FIELD_LEN)?;
        let Some(file_name_rename) = self.host_path_checked(&guest_path_rename) else {
            return Ok(FS_EINVAL);
        };

        let mut fs = self.fs.borrow_mut();
        fs.create_full_path(&file_name_rename);

        // An existing destination is replaced.
        if fs.exists(&file_name) && fs.exists(&file_name_rename) {
            fs.delete_file(&file_name_rename);
        }

        if fs.rename(&file_name, &file_name_rename) {
            tracing::info!("RENAME {file_name} to {file_name_rename}");
            Ok(IPC_SUCCESS)
        } else {
            tracing::error!("RENAME {file_name} to {file_name_rename} - failed");
            Ok(FS_ENOENT)
        }
    }

    fn create_file(
        &mut self,
        mem: &mut dyn GuestMemory,
        request: &IoctlRequest,
    ) -> GuestMemoryResult<i32> {
        let mut addr = request.buffer_in;
        let owner_id = mem.read_u32_be(addr)?;
        addr += 4;
        let group_id = mem.read_u16_be(addr)?;
        addr += 2;
        let guest_path = mem.read_cstring(addr, PATH_FIELD_LEN)?;
        let Some(file_name) = self.host_path_checked(&guest_path) else {
            return Ok(FS_EINVAL);
        };
        addr += PATH_FIELD_LEN as u32;
        let owner_perm = mem.read_u8(addr)?;
        addr += 1;
        let group_perm = mem.read_u8(addr)?;
        addr += 1;
        let other_perm = mem.read_u8(addr)?;
        addr += 1;
        let attributes = mem.read_u8(addr)?;

        tracing::info!("CREATE_FILE {file_name}");
        tracing::debug!(
            "  owner 0x{owner_id:08x} group 0x{group_id:04x} perms \
             {owner_perm:02x}/{group_perm:02x}/{other_perm:02x} attributes 0x{attributes:02x}"
        );

        let mut fs = self.fs.borrow_mut();
        if fs.exists(&file_name) {
            tracing::info!("  result = FS_EEXIST");
            return Ok(FS_EEXIST);
        }

        fs.create_full_path(&file_name);
        if !fs.create_empty_file(&file_name) {
            drop(fs);
            // Guest software assumes this call cannot fail; continuing
            // silently would desynchronize its view from the host.
            self.alert
                .alert(&format!("filesystem device: couldn't create {file_name}"));
            return Ok(FS_EINVAL);
        }

        tracing::info!("  result = IPC_SUCCESS");
        Ok(IPC_SUCCESS)
    }

    fn dump_unknown(name: &str, opcode: u32, in_count: usize, out_count: usize) {
        tracing::warn!(
            "{name}: unknown command 0x{opcode:02x} ({in_count} in, {out_count} out) - \
             returning EINVAL"
        );
    }
}

impl IpcDevice for FsDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, _mem: &mut dyn GuestMemory, _request: &OpenRequest) -> IpcReply {
        // Wipe the scratch directory.
        let path = self.scratch_path();
        let mut fs = self.fs.borrow_mut();
        fs.delete_dir_recursively(&path);
        fs.create_dir(&path);
        drop(fs);

        self.active = true;
        self.fs_reply(IPC_SUCCESS)
    }

    fn close(&mut self, _mem: &mut dyn GuestMemory) -> IpcReply {
        self.active = false;
        self.fs_reply(IPC_SUCCESS)
    }

    fn ioctl(&mut self, mem: &mut dyn GuestMemory, request: &IoctlRequest) -> IpcReply {
        let zeroed = mem.fill(request.buffer_out, request.buffer_out_size as usize, 0);
        let return_value = match zeroed.and_then(|()| self.execute_ioctl(mem, request)) {
            Ok(ret) => ret,
            Err(err) => {
                tracing::error!("ioctl 0x{:02x}: guest memory fault: {err}", request.request);
                FS_EINVAL
            }
        };
        self.fs_reply(return_value)
    }

    fn ioctlv(&mut self, mem: &mut dyn GuestMemory, request: &IoctlvRequest) -> IpcReply {
        let return_value = match self.execute_ioctlv(mem, request) {
            Ok(ret) => ret,
            Err(err) => {
                tracing::error!("ioctlv 0x{:02x}: guest memory fault: {err}", request.request);
                FS_EINVAL
            }
        };
        self.fs_reply(return_value)
    }

    fn do_state(&mut self, p: &mut StateStream) -> halcyon_state::Result<()> {
        p.do_string(&mut self.name)?;
        p.do_bool(&mut self.active)?;

        let path = self.scratch_path();
        match p.mode() {
            StreamMode::Save => tree::save_tree(&*self.fs.borrow(), &path, p),
            StreamMode::Load => tree::load_tree(&mut *self.fs.borrow_mut(), &path, p),
        }
    }
}
