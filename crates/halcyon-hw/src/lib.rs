//! Hardware lifecycle orchestration.
//!
//! [`Hardware`] owns every emulated subsystem as an explicit ordered list and
//! is the only thing that sequences Init, Shutdown, and DoState across them.
//! Nothing is discovered dynamically: the list is assembled once, and the
//! save-state stream layout is exactly that list order, each section followed
//! by a named marker. Loading with a different list (or a section whose
//! layout drifted) fails at the first marker instead of silently decoding
//! garbage.

#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::rc::Rc;

use halcyon_hostfs::VirtualRoot;
use halcyon_ipc::{DeviceRegistry, FixedTickRate, FsDevice, SharedFilesystem};
use halcyon_mem::{FlatMemory, GuestMemory};
use halcyon_state::{StateError, StateStream};

/// Emulated CPU clock of the console variant carrying the IPC subsystem.
pub const TICKS_PER_SECOND: u64 = 729_000_000;

/// One hardware subsystem under orchestrator control.
pub trait HwComponent {
    /// Stable name; doubles as the component's save-state marker.
    fn name(&self) -> &'static str;

    fn init(&mut self) {}
    fn shutdown(&mut self) {}

    fn do_state(&mut self, p: &mut StateStream) -> halcyon_state::Result<()>;
}

/// Guest RAM as an orchestrated subsystem. Serializes the full contents.
pub struct MemoryComponent {
    mem: Rc<RefCell<FlatMemory>>,
}

impl MemoryComponent {
    pub fn new(mem: Rc<RefCell<FlatMemory>>) -> Self {
        Self { mem }
    }
}

impl HwComponent for MemoryComponent {
    fn name(&self) -> &'static str {
        "Memory"
    }

    fn init(&mut self) {
        tracing::info!("memory subsystem initialized");
    }

    fn do_state(&mut self, p: &mut StateStream) -> halcyon_state::Result<()> {
        let mut mem = self.mem.borrow_mut();
        let mut size = mem.size();
        p.do_u32(&mut size)?;
        if size != mem.size() {
            return Err(StateError::Corrupt("guest memory size mismatch"));
        }
        p.do_raw(mem.as_bytes_mut())
    }
}

/// The console-specific IPC/microkernel layer: device registry plus the
/// filesystem device wiring. Present only on the platform variant that has
/// it, and initialized strictly after the memory subsystem since command
/// dispatch reads and writes guest memory.
pub struct IpcSubsystem {
    registry: DeviceRegistry,
}

impl IpcSubsystem {
    pub fn new(nand_root: VirtualRoot, fs: SharedFilesystem, ticks_per_second: u64) -> Self {
        let mut registry = DeviceRegistry::new();
        registry.register(Rc::new(RefCell::new(FsDevice::new(
            nand_root,
            fs,
            Rc::new(FixedTickRate(ticks_per_second)),
        ))));
        Self { registry }
    }

    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }

    fn init(&mut self) {
        tracing::info!("IPC subsystem initialized");
    }

    fn shutdown(&mut self) {
        tracing::info!("IPC subsystem shut down");
    }

    fn do_state(&mut self, p: &mut StateStream) -> halcyon_state::Result<()> {
        self.registry.do_state(p)
    }
}

/// Sole owner and sequencer of the hardware subsystems.
#[derive(Default)]
pub struct Hardware {
    components: Vec<Box<dyn HwComponent>>,
    ipc: Option<IpcSubsystem>,
}

impl Hardware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a subsystem. Init order is append order; shutdown is the
    /// reverse.
    pub fn add_component(&mut self, component: Box<dyn HwComponent>) {
        self.components.push(component);
    }

    /// Attaches the console-specific IPC layer. It always initializes after
    /// every listed component, so the memory subsystem must already be in
    /// the list.
    pub fn attach_ipc(&mut self, ipc: IpcSubsystem) {
        self.ipc = Some(ipc);
    }

    pub fn ipc_mut(&mut self) -> Option<&mut IpcSubsystem> {
        self.ipc.as_mut()
    }

    pub fn init(&mut self) {
        for component in &mut self.components {
            component.init();
        }
        if let Some(ipc) = &mut self.ipc {
            // Depends on guest memory access being available.
            ipc.init();
        }
    }

    pub fn shutdown(&mut self) {
        // Console-specific state is torn down first.
        if let Some(ipc) = &mut self.ipc {
            ipc.shutdown();
        }
        for component in self.components.iter_mut().rev() {
            component.shutdown();
        }
    }

    /// Runs every subsystem's DoState against the shared stream, a named
    /// marker after each. Strictly sequential positional decoding.
    pub fn do_state(&mut self, p: &mut StateStream) -> halcyon_state::Result<()> {
        for component in &mut self.components {
            component.do_state(p)?;
            p.marker(component.name())?;
        }

        if let Some(ipc) = &mut self.ipc {
            ipc.do_state(p)?;
            p.marker("IPC")?;
        }

        p.marker("HW")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl HwComponent for Probe {
        fn name(&self) -> &'static str {
            self.name
        }

        fn init(&mut self) {
            self.log.borrow_mut().push(format!("init {}", self.name));
        }

        fn shutdown(&mut self) {
            self.log
                .borrow_mut()
                .push(format!("shutdown {}", self.name));
        }

        fn do_state(&mut self, _p: &mut StateStream) -> halcyon_state::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn shutdown_is_exact_reverse_of_init() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut hw = Hardware::new();
        for name in ["Video", "Serial", "Memory"] {
            hw.add_component(Box::new(Probe {
                name,
                log: log.clone(),
            }));
        }

        hw.init();
        hw.shutdown();
        assert_eq!(
            *log.borrow(),
            [
                "init Video",
                "init Serial",
                "init Memory",
                "shutdown Memory",
                "shutdown Serial",
                "shutdown Video",
            ]
        );
    }
}
