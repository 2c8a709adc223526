// tests/pid_registry.rs

use std::fs;
use std::rc::Rc;

use forkpool::errors::ForkpoolError;
use forkpool::registry::{PidRegistry, RegistryTable};
use forkpool_test_utils::temp_pid_file;

#[test]
fn same_path_shares_one_registry() {
    let (_dir, path) = temp_pid_file();
    let mut table = RegistryTable::new();

    let a = table.lookup(&path).unwrap();
    let b = table.lookup(&path).unwrap();
    assert!(Rc::ptr_eq(&a, &b));
    assert_eq!(table.len(), 1);

    a.borrow_mut().add(77, true, false).unwrap();
    assert!(b.borrow().exists(77));
}

#[test]
fn different_paths_get_different_registries() {
    let (_dir, path) = temp_pid_file();
    let other = path.with_file_name("other.pid");
    let mut table = RegistryTable::new();

    let a = table.lookup(&path).unwrap();
    let b = table.lookup(&other).unwrap();
    assert!(!Rc::ptr_eq(&a, &b));
    assert_eq!(table.len(), 2);
}

#[test]
fn missing_directory_is_created() {
    let (_dir, path) = temp_pid_file();
    assert!(!path.parent().unwrap().exists());

    let registry = PidRegistry::open(&path).unwrap();
    assert!(path.parent().unwrap().is_dir());
    assert_eq!(registry.borrow().pid_dir(), path.parent().unwrap());
}

#[test]
fn uncreatable_directory_is_a_permission_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, b"file").unwrap();

    let err = PidRegistry::open(blocker.join("run").join("x.pid")).unwrap_err();
    match err {
        ForkpoolError::FsPermission { path, mode, .. } => {
            assert!(path.ends_with("run"));
            assert_eq!(mode, 0o755);
        }
        other => panic!("expected FsPermission, got {other:?}"),
    }
}

#[test]
fn file_holds_descending_json_array() {
    let (_dir, path) = temp_pid_file();
    let registry = PidRegistry::open(&path).unwrap();

    registry.borrow_mut().add_all(&[3, 100, 42]).unwrap();

    let raw = fs::read_to_string(&path).unwrap();
    assert_eq!(raw, "[100,42,3]");
}

#[test]
fn reload_sees_other_writers() {
    let (_dir, path) = temp_pid_file();
    let registry = PidRegistry::open(&path).unwrap();
    registry.borrow_mut().add(10, true, true).unwrap();

    fs::write(&path, b"[12,11,10]").unwrap();

    let mut reg = registry.borrow_mut();
    let mut kids = reg.children(0, true);
    kids.sort();
    assert_eq!(kids, vec![11, 12]);
}

#[test]
fn unreadable_file_loads_as_empty() {
    let (_dir, path) = temp_pid_file();
    let registry = PidRegistry::open(&path).unwrap();

    fs::write(&path, b"not json").unwrap();
    assert!(registry.borrow_mut().is_empty(true));
}

#[test]
fn concurrent_writers_keep_every_pid() {
    let _guard = forkpool_test_utils::fork_lock();
    let (_dir, path) = temp_pid_file();
    let registry = PidRegistry::open(&path).unwrap();
    let me = nix::unistd::getpid().as_raw();
    registry.borrow_mut().add(me, true, true).unwrap();

    let mut kids = Vec::new();
    for _ in 0..12 {
        // SAFETY: the child only touches the registry and exits.
        match unsafe { nix::unistd::fork() }.unwrap() {
            nix::unistd::ForkResult::Parent { child } => kids.push(child.as_raw()),
            nix::unistd::ForkResult::Child => {
                let pid = nix::unistd::getpid().as_raw();
                let code = match registry.borrow_mut().add(pid, true, false) {
                    Ok(_) => 0,
                    Err(_) => 1,
                };
                std::process::exit(code);
            }
        }
    }

    for pid in &kids {
        let status = nix::sys::wait::waitpid(nix::unistd::Pid::from_raw(*pid), None).unwrap();
        assert_eq!(status, nix::sys::wait::WaitStatus::Exited(nix::unistd::Pid::from_raw(*pid), 0));
    }

    let mut reg = registry.borrow_mut();
    let mut on_file = reg.children(0, true);
    on_file.sort();
    kids.sort();
    assert_eq!(on_file, kids);
    assert!(reg.exists(me));
}
