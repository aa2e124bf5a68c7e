//! IPC command descriptions and replies.

/// Command completed.
pub const IPC_SUCCESS: i32 = 0;
/// Kernel-level invalid argument (undersized reply buffer and the like).
pub const IPC_EINVAL: i32 = -1017;
/// Filesystem: invalid argument.
pub const FS_EINVAL: i32 = -101;
/// Filesystem: target already exists.
pub const FS_EEXIST: i32 = -105;
/// Filesystem: no such file or directory.
pub const FS_ENOENT: i32 = -106;

/// One guest memory region of a multi-vector command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVector {
    pub address: u32,
    pub size: u32,
}

/// Request to open a device by its kernel path (e.g. `/dev/fs`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub path: String,
    pub flags: u32,
}

/// Single-buffer control command. Immutable for the duration of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoctlRequest {
    pub fd: u32,
    pub request: u32,
    pub buffer_in: u32,
    pub buffer_in_size: u32,
    pub buffer_out: u32,
    pub buffer_out_size: u32,
}

/// Multi-vector control command: ordered input and output regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoctlvRequest {
    pub fd: u32,
    pub request: u32,
    pub in_vectors: Vec<IoVector>,
    pub io_vectors: Vec<IoVector>,
}

/// Result of one command dispatch.
///
/// `reply_delay_ticks` is how long, in emulated ticks, the guest must wait
/// before it can observe the reply. The device itself never sleeps; the
/// external timer collaborator owns the delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcReply {
    pub return_value: i32,
    /// False when the command parks the reply for later (unused by the
    /// filesystem device, which always answers).
    pub send_reply: bool,
    pub reply_delay_ticks: u64,
}

impl IpcReply {
    /// A reply with no artificial latency.
    pub fn immediate(return_value: i32) -> Self {
        Self {
            return_value,
            send_reply: true,
            reply_delay_ticks: 0,
        }
    }
}

/// Emulated-time rate consumed when deriving reply delays.
pub trait TickSource {
    fn ticks_per_second(&self) -> u64;
}

#[derive(Debug, Clone, Copy)]
pub struct FixedTickRate(pub u64);

impl TickSource for FixedTickRate {
    fn ticks_per_second(&self) -> u64 {
        self.0
    }
}

/// Escalation channel for host failures the emulated hardware cannot have.
///
/// Logging is not enough for these: silently continuing would leave the guest
/// believing in state the host does not hold.
pub trait UserAlert {
    fn alert(&self, message: &str);
}

/// Default [`UserAlert`] that raises through the log at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlert;

impl UserAlert for LogAlert {
    fn alert(&self, message: &str) {
        tracing::error!("{message}");
    }
}
