//! Disk-backed filesystem behavior must match what the in-memory fake
//! promises, since the device command set is tested against the fake.

use halcyon_hostfs::{DiskFilesystem, HostFilesystem};

fn root() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_owned();
    (dir, path)
}

#[test]
fn create_full_path_creates_parents_only() {
    let (_guard, root) = root();
    let mut fs = DiskFilesystem;

    assert!(fs.create_full_path(&format!("{root}/a/b/c/file.bin")));
    assert!(fs.is_directory(&format!("{root}/a/b/c")));
    assert!(!fs.exists(&format!("{root}/a/b/c/file.bin")));

    assert!(fs.create_full_path(&format!("{root}/x/y/")));
    assert!(fs.is_directory(&format!("{root}/x/y")));
}

#[test]
fn delete_file_missing_counts_as_success() {
    let (_guard, root) = root();
    let mut fs = DiskFilesystem;

    assert!(fs.delete_file(&format!("{root}/never-created")));

    fs.write_file(&format!("{root}/f"), b"x").unwrap();
    assert!(fs.delete_file(&format!("{root}/f")));
    assert!(!fs.exists(&format!("{root}/f")));

    fs.create_dir(&format!("{root}/d"));
    assert!(!fs.delete_file(&format!("{root}/d")));
}

#[test]
fn scan_is_sorted_and_counts_descendants() {
    let (_guard, root) = root();
    let mut fs = DiskFilesystem;

    fs.create_dir(&format!("{root}/zz"));
    fs.create_dir(&format!("{root}/aa"));
    fs.write_file(&format!("{root}/aa/f1"), &[0u8; 10]).unwrap();
    fs.write_file(&format!("{root}/m"), &[0u8; 3]).unwrap();

    let tree = fs.scan_directory_tree(&root, true);
    assert!(tree.is_directory);
    assert_eq!(tree.size, 4);
    let names: Vec<&str> = tree.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["aa", "m", "zz"]);
    assert_eq!(tree.children[1].size, 3);

    let flat = fs.scan_directory_tree(&root, false);
    assert_eq!(flat.size, 3);
    assert!(flat.children[0].children.is_empty());
}

#[test]
fn rename_into_created_parent() {
    let (_guard, root) = root();
    let mut fs = DiskFilesystem;

    fs.write_file(&format!("{root}/src"), b"payload").unwrap();
    let dest = format!("{root}/deep/nested/dst");
    assert!(fs.create_full_path(&dest));
    assert!(fs.rename(&format!("{root}/src"), &dest));
    assert_eq!(fs.read_file(&dest).unwrap(), b"payload");
}

#[test]
fn missing_or_file_scan_target_yields_empty_root() {
    let (_guard, root) = root();
    let mut fs = DiskFilesystem;
    fs.write_file(&format!("{root}/f"), b"x").unwrap();

    let missing = fs.scan_directory_tree(&format!("{root}/nope"), true);
    assert!(!missing.is_directory);
    assert_eq!((missing.size, missing.children.len()), (0, 0));

    let file = fs.scan_directory_tree(&format!("{root}/f"), true);
    assert!(!file.is_directory);
    assert!(file.children.is_empty());
}
