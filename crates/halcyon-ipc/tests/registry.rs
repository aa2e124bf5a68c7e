//! Descriptor routing and whole-registry save/load.

use std::cell::RefCell;
use std::rc::Rc;

use halcyon_hostfs::{HostFilesystem, MemFilesystem, VirtualRoot};
use halcyon_ipc::{
    DeviceRegistry, FixedTickRate, FsDevice, IoctlRequest, OpenRequest, FS_ENOENT,
    IOCTL_GET_STATS, IPC_SUCCESS,
};
use halcyon_mem::FlatMemory;
use halcyon_state::{StateError, StateStream};

fn fs_registry() -> (DeviceRegistry, Rc<RefCell<MemFilesystem>>) {
    let mut backing = MemFilesystem::new();
    backing.mkdir_all("/nand");
    let fs = Rc::new(RefCell::new(backing));
    let device = FsDevice::new(
        VirtualRoot::new("/nand"),
        fs.clone(),
        Rc::new(FixedTickRate(1000)),
    );
    let mut registry = DeviceRegistry::new();
    registry.register(Rc::new(RefCell::new(device)));
    (registry, fs)
}

fn open_fs(registry: &mut DeviceRegistry, mem: &mut FlatMemory) -> u32 {
    let reply = registry.open(
        mem,
        &OpenRequest {
            path: "/dev/fs".to_owned(),
            flags: 0,
        },
    );
    assert!(reply.return_value >= 0);
    reply.return_value as u32
}

#[test]
fn open_allocates_descriptors_and_close_releases_them() {
    let (mut registry, _fs) = fs_registry();
    let mut mem = FlatMemory::new(0x1000);

    let fd = open_fs(&mut registry, &mut mem);
    assert_eq!(fd, 0);
    let fd2 = open_fs(&mut registry, &mut mem);
    assert_eq!(fd2, 1);

    assert_eq!(registry.close(&mut mem, fd).return_value, IPC_SUCCESS);
    // Released slot is reused.
    assert_eq!(open_fs(&mut registry, &mut mem), 0);
}

#[test]
fn unknown_device_and_stale_descriptors_are_enoent() {
    let (mut registry, _fs) = fs_registry();
    let mut mem = FlatMemory::new(0x1000);

    let reply = registry.open(
        &mut mem,
        &OpenRequest {
            path: "/dev/net".to_owned(),
            flags: 0,
        },
    );
    assert_eq!(reply.return_value, FS_ENOENT);
    assert_eq!(reply.reply_delay_ticks, 0);

    let req = IoctlRequest {
        fd: 7,
        request: IOCTL_GET_STATS,
        buffer_in: 0,
        buffer_in_size: 0,
        buffer_out: 0x100,
        buffer_out_size: 0x1c,
    };
    assert_eq!(registry.ioctl(&mut mem, &req).return_value, FS_ENOENT);
    assert_eq!(registry.close(&mut mem, 7).return_value, FS_ENOENT);
}

#[test]
fn registry_state_roundtrip_restores_descriptors_and_scratch() {
    let (mut registry, fs) = fs_registry();
    let mut mem = FlatMemory::new(0x1000);

    let fd = open_fs(&mut registry, &mut mem);
    fs.borrow_mut()
        .write_file("/nand/tmp/session", b"in-flight")
        .unwrap();

    let mut save = StateStream::new_save();
    registry.do_state(&mut save).unwrap();

    // A fresh machine with an empty scratch directory and no open handles.
    let (mut restored, restored_fs) = fs_registry();
    restored_fs.borrow_mut().mkdir_all("/nand/tmp");
    let mut load = StateStream::new_load(save.into_bytes());
    restored.do_state(&mut load).unwrap();

    assert_eq!(
        restored_fs.borrow().read_file("/nand/tmp/session").unwrap(),
        b"in-flight"
    );
    // The saved descriptor still routes to the filesystem device.
    let req = IoctlRequest {
        fd,
        request: IOCTL_GET_STATS,
        buffer_in: 0,
        buffer_in_size: 0,
        buffer_out: 0x100,
        buffer_out_size: 0x1c,
    };
    assert_eq!(restored.ioctl(&mut mem, &req).return_value, IPC_SUCCESS);
}

#[test]
fn registry_load_rejects_descriptor_for_unknown_device() {
    // Descriptor table claiming a device that is not registered. For a
    // registry with no devices the stream holds only the table.
    let mut save = StateStream::new_save();
    let mut count = 1u32;
    save.do_u32(&mut count).unwrap();
    let mut name = String::from("/dev/mystery");
    save.do_string(&mut name).unwrap();

    let mut empty = DeviceRegistry::new();
    let mut load = StateStream::new_load(save.into_bytes());
    assert_eq!(
        empty.do_state(&mut load).unwrap_err(),
        StateError::Corrupt("descriptor names unknown device")
    );
}
