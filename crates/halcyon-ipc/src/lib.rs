//! Emulated IPC subsystem: guest software issues control commands against
//! kernel devices, the device models execute them against host resources and
//! answer with a status code plus an artificial completion delay.
//!
//! Everything here is single-threaded and host-local. Devices never own guest
//! memory; the dispatching caller lends `&mut dyn GuestMemory` for the
//! duration of one command. When the reply is due is not decided here either:
//! the delay in an [`IpcReply`] is consumed by the external scheduler that
//! models hardware latency.

#![forbid(unsafe_code)]

mod device;
mod fs;
mod request;
mod tree;

pub use device::{DeviceRegistry, IpcDevice, SharedDevice};
pub use fs::{
    FsDevice, NandStat, SharedFilesystem, IOCTLV_GETUSAGE, IOCTLV_READ_DIR, IOCTL_CREATE_DIR,
    IOCTL_CREATE_FILE, IOCTL_DELETE_FILE, IOCTL_GET_ATTR, IOCTL_GET_STATS, IOCTL_RENAME_FILE,
    IOCTL_SET_ATTR, IOCTL_SHUTDOWN,
};
pub use request::{
    FixedTickRate, IoVector, IoctlRequest, IoctlvRequest, IpcReply, LogAlert, OpenRequest,
    TickSource, UserAlert, FS_EEXIST, FS_EINVAL, FS_ENOENT, IPC_EINVAL, IPC_SUCCESS,
};
pub use tree::{load_tree, save_tree, FILE_CHUNK_SIZE};
