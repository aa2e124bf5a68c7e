//! Device capability interface and descriptor routing.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use halcyon_mem::GuestMemory;
use halcyon_state::{StateError, StateStream};

use crate::request::{IoctlRequest, IoctlvRequest, IpcReply, OpenRequest, FS_ENOENT, IPC_SUCCESS};

/// An emulated kernel device endpoint.
///
/// All five operations run synchronously on the one emulation context; the
/// reply's delay only postpones when the guest sees the result.
pub trait IpcDevice {
    /// Kernel path the device is registered under (e.g. `/dev/fs`).
    fn name(&self) -> &str;

    fn open(&mut self, mem: &mut dyn GuestMemory, request: &OpenRequest) -> IpcReply;
    fn close(&mut self, mem: &mut dyn GuestMemory) -> IpcReply;
    fn ioctl(&mut self, mem: &mut dyn GuestMemory, request: &IoctlRequest) -> IpcReply;
    fn ioctlv(&mut self, mem: &mut dyn GuestMemory, request: &IoctlvRequest) -> IpcReply;

    /// Serializes or restores device state against the shared stream. The
    /// same call sequence must run in both modes.
    fn do_state(&mut self, p: &mut StateStream) -> halcyon_state::Result<()>;
}

pub type SharedDevice = Rc<RefCell<dyn IpcDevice>>;

/// Owns the registered devices and the open-descriptor table, and routes
/// requests to the device behind a descriptor.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, SharedDevice>,
    fds: Vec<Option<SharedDevice>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, device: SharedDevice) {
        let name = device.borrow().name().to_owned();
        self.devices.insert(name, device);
    }

    pub fn device(&self, name: &str) -> Option<SharedDevice> {
        self.devices.get(name).cloned()
    }

    /// Opens the device registered under `request.path` and allocates a
    /// descriptor for it. On success the reply's return value is the
    /// descriptor.
    pub fn open(&mut self, mem: &mut dyn GuestMemory, request: &OpenRequest) -> IpcReply {
        let Some(device) = self.devices.get(&request.path).cloned() else {
            tracing::warn!("open {}: unknown device", request.path);
            return IpcReply::immediate(FS_ENOENT);
        };

        let mut reply = device.borrow_mut().open(mem, request);
        if reply.return_value == IPC_SUCCESS {
            let fd = match self.fds.iter().position(Option::is_none) {
                Some(free) => free,
                None => {
                    self.fds.push(None);
                    self.fds.len() - 1
                }
            };
            self.fds[fd] = Some(device);
            reply.return_value = fd as i32;
        }
        reply
    }

    pub fn close(&mut self, mem: &mut dyn GuestMemory, fd: u32) -> IpcReply {
        match self.fds.get_mut(fd as usize).and_then(Option::take) {
            Some(device) => device.borrow_mut().close(mem),
            None => {
                tracing::warn!("close: descriptor {fd} is not open");
                IpcReply::immediate(FS_ENOENT)
            }
        }
    }

    pub fn ioctl(&mut self, mem: &mut dyn GuestMemory, request: &IoctlRequest) -> IpcReply {
        match self.descriptor(request.fd) {
            Some(device) => device.borrow_mut().ioctl(mem, request),
            None => {
                tracing::warn!("ioctl: descriptor {} is not open", request.fd);
                IpcReply::immediate(FS_ENOENT)
            }
        }
    }

    pub fn ioctlv(&mut self, mem: &mut dyn GuestMemory, request: &IoctlvRequest) -> IpcReply {
        match self.descriptor(request.fd) {
            Some(device) => device.borrow_mut().ioctlv(mem, request),
            None => {
                tracing::warn!("ioctlv: descriptor {} is not open", request.fd);
                IpcReply::immediate(FS_ENOENT)
            }
        }
    }

    fn descriptor(&self, fd: u32) -> Option<SharedDevice> {
        self.fds.get(fd as usize).and_then(Clone::clone)
    }

    /// Runs every device's `do_state` in registration-name order, then passes
    /// the descriptor table through the stream so open handles survive a
    /// save/load cycle.
    pub fn do_state(&mut self, p: &mut StateStream) -> halcyon_state::Result<()> {
        for device in self.devices.values() {
            device.borrow_mut().do_state(p)?;
        }

        let mut fd_count = self.fds.len() as u32;
        p.do_u32(&mut fd_count)?;
        match p.mode() {
            halcyon_state::StreamMode::Save => {
                for slot in &self.fds {
                    let mut name = slot
                        .as_ref()
                        .map(|device| device.borrow().name().to_owned())
                        .unwrap_or_default();
                    p.do_string(&mut name)?;
                }
            }
            halcyon_state::StreamMode::Load => {
                let mut fds = Vec::new();
                for _ in 0..fd_count {
                    let mut name = String::new();
                    p.do_string(&mut name)?;
                    if name.is_empty() {
                        fds.push(None);
                    } else {
                        let device = self
                            .devices
                            .get(&name)
                            .cloned()
                            .ok_or(StateError::Corrupt("descriptor names unknown device"))?;
                        fds.push(Some(device));
                    }
                }
                self.fds = fds;
            }
        }
        Ok(())
    }
}
