// src/registry/pid_registry.rs

use std::cell::RefCell;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::errors::{ForkpoolError, Result};
use crate::logging::Logger;

/// Mode used for directories the registry creates.
const DIR_MODE: u32 = 0o755;
/// Mode used for the pid file itself.
const FILE_MODE: u32 = 0o644;

/// Shared handle to a registry.
pub type RegistryHandle = Rc<RefCell<PidRegistry>>;

/// Set of tracked process ids, persisted as a JSON array.
///
/// At most one id is designated as the parent. Every flushing mutation
/// re-reads, changes and rewrites the file under one exclusive `flock`, so
/// concurrent writers never drop each other's ids. The file is kept in
/// descending numeric order.
#[derive(Debug)]
pub struct PidRegistry {
    path: PathBuf,
    current: Vec<i32>,
    parent: i32,
    logger: Logger,
}

impl PidRegistry {
    /// Build a standalone registry for `path` behind a shared handle.
    pub fn open(path: impl AsRef<Path>) -> Result<RegistryHandle> {
        Ok(Rc::new(RefCell::new(Self::create(path.as_ref())?)))
    }

    pub(crate) fn create(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        let logger = Logger::new(format!("[pid:{}]", path.display()));

        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                logger.warning(format_args!("cannot remove stale pid file: {e}"));
            }
        }

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.is_dir() {
                fs::DirBuilder::new()
                    .recursive(true)
                    .mode(DIR_MODE)
                    .create(dir)
                    .map_err(|_| ForkpoolError::fs_permission(dir, DIR_MODE))?;
            }
        }

        let mut registry = Self {
            path,
            current: Vec::new(),
            parent: 0,
            logger,
        };
        registry.load();
        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the pid file.
    pub fn pid_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("/"))
    }

    /// Designated parent id, or 0 when none is known.
    pub fn parent(&self) -> i32 {
        self.parent
    }

    /// Track `pid`.
    ///
    /// `pid` becomes the parent when `is_parent` is set or when it is the
    /// OS parent of the calling process. Returns `false` when already
    /// tracked. With `flush`, the check and the write happen against the
    /// file contents under the lock.
    pub fn add(&mut self, pid: i32, flush: bool, is_parent: bool) -> Result<bool> {
        self.mark_parent(pid, is_parent);

        if flush {
            return self.update(|set| insert(set, pid));
        }
        Ok(insert(&mut self.current, pid))
    }

    /// Track several ids, persisting once. Returns how many were new.
    pub fn add_all(&mut self, pids: &[i32]) -> Result<usize> {
        for pid in pids {
            self.mark_parent(*pid, false);
        }
        self.update(|set| pids.iter().filter(|pid| insert(set, **pid)).count())
    }

    pub fn exists(&self, pid: i32) -> bool {
        self.current.contains(&pid)
    }

    /// Stop tracking `pid`. Returns `false` when it was not tracked.
    pub fn remove(&mut self, pid: i32, flush: bool) -> Result<bool> {
        if flush {
            return self.update(|set| discard(set, pid));
        }
        Ok(discard(&mut self.current, pid))
    }

    /// Stop tracking several ids, persisting once. Returns how many were removed.
    pub fn remove_all(&mut self, pids: &[i32]) -> Result<usize> {
        self.update(|set| pids.iter().filter(|pid| discard(set, **pid)).count())
    }

    /// Forget every id and persist the empty set. Returns how many were dropped.
    pub fn clear(&mut self) -> Result<usize> {
        self.update(|set| {
            let dropped = set.len();
            set.clear();
            dropped
        })
    }

    /// Remove and return the first tracked id (0 when empty).
    ///
    /// With `flush` the file is re-read under the lock, whatever `reload` says.
    pub fn pop(&mut self, flush: bool, reload: bool) -> Result<i32> {
        if flush {
            return self.update(pop_first);
        }
        if reload {
            self.load();
        }
        Ok(pop_first(&mut self.current))
    }

    pub fn is_empty(&mut self, reload: bool) -> bool {
        if reload {
            self.load();
        }
        self.current.is_empty()
    }

    /// Every tracked id.
    pub fn all(&mut self, reload: bool) -> Vec<i32> {
        if reload {
            self.load();
        }
        self.current.clone()
    }

    /// Every tracked id except `parent` (0 means the recorded parent).
    ///
    /// With no parent known at all, returns every id.
    pub fn children(&mut self, parent: i32, reload: bool) -> Vec<i32> {
        let parent = if parent == 0 { self.parent } else { parent };
        let all = self.all(reload);
        if parent == 0 {
            return all;
        }
        all.into_iter().filter(|pid| *pid != parent).collect()
    }

    /// Overwrite the file with the in-memory set. Returns the number of
    /// bytes written.
    pub fn flush(&mut self) -> Result<usize> {
        let mut locked = self.lock()?;
        self.current.sort_unstable_by(|a, b| b.cmp(a));
        write_locked(&mut locked, &self.current)
    }

    /// Read the file, apply `change` and write it back, all under one
    /// exclusive lock. The in-memory set ends up equal to the file.
    fn update<R>(&mut self, change: impl FnOnce(&mut Vec<i32>) -> R) -> Result<R> {
        let mut locked = self.lock()?;

        let mut raw = Vec::new();
        locked.read_to_end(&mut raw)?;
        self.current = self.parse(&raw);

        let out = change(&mut self.current);
        self.current.sort_unstable_by(|a, b| b.cmp(a));
        write_locked(&mut locked, &self.current)?;
        Ok(out)
    }

    fn lock(&self) -> Result<Flock<File>> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(FILE_MODE)
            .open(&self.path)
            .map_err(|_| ForkpoolError::fs_permission(&self.path, FILE_MODE))?;

        loop {
            match Flock::lock(file, FlockArg::LockExclusive) {
                Ok(locked) => return Ok(locked),
                Err((unlocked, Errno::EINTR)) => file = unlocked,
                Err((_, errno)) => return Err(errno.into()),
            }
        }
    }

    fn mark_parent(&mut self, pid: i32, is_parent: bool) {
        if is_parent || nix::unistd::getppid().as_raw() == pid {
            self.parent = pid;
        }
    }

    /// Replace the in-memory set with the file contents.
    ///
    /// Children register themselves in the file, so the parent reloads
    /// before mutating.
    pub fn reload(&mut self) {
        self.load();
    }

    fn load(&mut self) {
        self.current = match fs::read(&self.path) {
            Ok(bytes) => self.parse(&bytes),
            Err(_) => Vec::new(),
        };
    }

    fn parse(&self, bytes: &[u8]) -> Vec<i32> {
        if bytes.is_empty() {
            return Vec::new();
        }
        match serde_json::from_slice(bytes) {
            Ok(pids) => pids,
            Err(e) => {
                self.logger
                    .warning(format_args!("ignoring unreadable pid file: {e}"));
                Vec::new()
            }
        }
    }
}

fn insert(set: &mut Vec<i32>, pid: i32) -> bool {
    if set.contains(&pid) {
        return false;
    }
    set.push(pid);
    true
}

fn discard(set: &mut Vec<i32>, pid: i32) -> bool {
    let before = set.len();
    set.retain(|p| *p != pid);
    set.len() != before
}

fn pop_first(set: &mut Vec<i32>) -> i32 {
    if set.is_empty() { 0 } else { set.remove(0) }
}

fn write_locked(locked: &mut Flock<File>, pids: &[i32]) -> Result<usize> {
    let encoded = serde_json::to_vec(pids)?;
    locked.set_len(0)?;
    locked.seek(SeekFrom::Start(0))?;
    locked.write_all(&encoded)?;
    locked.flush()?;
    Ok(encoded.len())
}

impl Drop for PidRegistry {
    fn drop(&mut self) {
        if self.path.exists() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_is_idempotent_and_persists_descending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run").join("test.pid");
        let mut reg = PidRegistry::create(&path).unwrap();

        assert!(reg.add(10, true, false).unwrap());
        assert!(!reg.add(10, true, false).unwrap());
        assert!(reg.add(30, true, false).unwrap());
        assert!(reg.exists(10));

        let on_disk: Vec<i32> = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk, vec![30, 10]);
    }

    #[test]
    fn children_exclude_parent() {
        let dir = tempdir().unwrap();
        let mut reg = PidRegistry::create(&dir.path().join("p.pid")).unwrap();

        reg.add(1000, true, true).unwrap();
        reg.add_all(&[1001, 1002, 1000]).unwrap();

        assert_eq!(reg.parent(), 1000);
        let mut kids = reg.children(0, false);
        kids.sort();
        assert_eq!(kids, vec![1001, 1002]);
        assert_eq!(reg.children(1001, false).len(), 2);
    }

    #[test]
    fn remove_pop_and_clear() {
        let dir = tempdir().unwrap();
        let mut reg = PidRegistry::create(&dir.path().join("p.pid")).unwrap();

        reg.add_all(&[5, 6, 7]).unwrap();
        assert!(reg.remove(6, true).unwrap());
        assert!(!reg.remove(6, true).unwrap());
        assert_eq!(reg.remove_all(&[5, 99]).unwrap(), 1);

        assert_eq!(reg.pop(true, true).unwrap(), 7);
        assert_eq!(reg.pop(true, false).unwrap(), 0);

        reg.add(8, true, false).unwrap();
        reg.clear().unwrap();
        assert!(reg.is_empty(true));
    }

    #[test]
    fn drop_deletes_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.pid");
        {
            let mut reg = PidRegistry::create(&path).unwrap();
            reg.add(42, true, false).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn stale_file_is_discarded_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stale.pid");
        fs::write(&path, b"[1,2,3]").unwrap();

        let mut reg = PidRegistry::create(&path).unwrap();
        assert!(reg.is_empty(true));
    }
}
