// src/channel/mod.rs

//! Shared result channel.
//!
//! Each live child owns at most one slot, a POSIX shared-memory segment keyed
//! by the child's pid. A slot is a [`header::SlotHeader`] followed by `size`
//! payload bytes encoded by [`codec`].
//!
//! Slot names are `/<namespace>.<fingerprint>.<id>`, all hex. The fingerprint
//! mixes the namespace with the identity of the running executable, so
//! different binaries sharing a namespace don't read each other's slots.
//! Two concurrent instances of the same binary with the same namespace can
//! still collide if the OS reuses a pid while a slot is pending.

pub mod codec;
pub mod header;

use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::fs::MetadataExt;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;

use crate::errors::{ForkpoolError, Result};
use crate::logging::Logger;
use crate::value::Value;

pub use header::{HEADER_SIZE, SlotFlags, SlotHeader};

pub const DEFAULT_NAMESPACE: &str = "forkpool";

#[derive(Debug, Clone)]
pub struct ShmChannel {
    namespace: String,
    fingerprint: u32,
    logger: Logger,
}

impl Default for ShmChannel {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl ShmChannel {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let fingerprint = fingerprint(&namespace);
        Self {
            logger: Logger::new(format!("[shm:{namespace}]")),
            namespace,
            fingerprint,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Segment name for `id`.
    pub fn slot_name(&self, id: u32) -> String {
        format!("/{}.{:08x}.{:08x}", self.namespace, self.fingerprint, id)
    }

    /// Store `value` in the slot for `id`, replacing any previous slot.
    ///
    /// `offset` is carried in the header untouched. `extra_flags` are OR-ed
    /// into the computed flags. Returns the number of bytes written, or 0
    /// when the segment could not be created or sized.
    pub fn write(&self, id: u32, offset: u16, value: &Value, extra_flags: SlotFlags) -> Result<usize> {
        let key = format!("write_{id}");
        self.logger.begin_profile(key.as_str());
        let written = self.write_slot(id, offset, value, extra_flags);
        self.logger
            .end_profile(&key, format_args!("writing slot for {id}"));
        written
    }

    fn write_slot(&self, id: u32, offset: u16, value: &Value, extra_flags: SlotFlags) -> Result<usize> {
        let (payload, flags) = codec::encode(value)?;

        if self.exists(id) {
            self.delete(id);
        }

        let header = SlotHeader {
            // The header id is a 16-bit tag; the segment name carries the full id.
            id: (id & 0xffff) as u16,
            offset,
            size: payload.len() as u64,
            flags: flags | extra_flags,
        };

        let name = self.slot_name(id);
        let fd = match shm_open(
            name.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::from_bits_truncate(0o644),
        ) {
            Ok(fd) => fd,
            Err(errno) => {
                self.logger
                    .error(format_args!("cannot create slot {name}: {errno}"));
                return Ok(0);
            }
        };
        let mut file = File::from(fd);

        let total = HEADER_SIZE + payload.len();
        if let Err(e) = file.set_len(total as u64) {
            self.logger.error(format_args!("cannot size slot {name}: {e}"));
            let _ = shm_unlink(name.as_str());
            return Ok(0);
        }

        self.fill(&mut file, &name, &header, &payload)?;

        self.logger.debug(format_args!(
            "wrote {total} bytes to {name} (flags 0x{:03x})",
            header.flags.bits()
        ));
        Ok(total)
    }

    /// Write header and payload; a half-written slot is unlinked.
    fn fill(&self, out: &mut impl Write, name: &str, header: &SlotHeader, payload: &[u8]) -> Result<()> {
        let filled = out
            .write_all(&header.encode())
            .and_then(|()| out.write_all(payload));
        if let Err(e) = filled {
            self.logger.error(format_args!("cannot fill slot {name}: {e}"));
            let _ = shm_unlink(name);
            return Err(e.into());
        }
        Ok(())
    }

    /// Read the slot for `id`, returning the value and the header offset.
    ///
    /// With `cleanup`, the slot is removed once read.
    pub fn read(&self, id: u32, cleanup: bool) -> Result<(Value, u16)> {
        let key = format!("read_{id}");
        self.logger.begin_profile(key.as_str());
        let read = self.read_slot(id, cleanup);
        self.logger
            .end_profile(&key, format_args!("reading slot for {id}"));
        read
    }

    fn read_slot(&self, id: u32, cleanup: bool) -> Result<(Value, u16)> {
        let name = self.slot_name(id);
        let fd = match shm_open(name.as_str(), OFlag::O_RDONLY, Mode::empty()) {
            Ok(fd) => fd,
            Err(Errno::ENOENT) => return Err(ForkpoolError::SlotMissing(id)),
            Err(errno) => return Err(errno.into()),
        };
        let mut file = File::from(fd);

        let decoded = read_segment(&mut file, id);
        drop(file);

        if cleanup {
            self.delete(id);
        }

        let (header, payload) = decoded?;
        let value = codec::decode(id, &payload, header.flags)?;
        Ok((value, header.offset))
    }

    pub fn exists(&self, id: u32) -> bool {
        shm_open(self.slot_name(id).as_str(), OFlag::O_RDONLY, Mode::empty()).is_ok()
    }

    /// Remove the slot for `id`. Returns whether a slot was removed.
    pub fn delete(&self, id: u32) -> bool {
        match shm_unlink(self.slot_name(id).as_str()) {
            Ok(()) => true,
            Err(Errno::ENOENT) => false,
            Err(errno) => {
                self.logger
                    .warning(format_args!("cannot delete slot for {id}: {errno}"));
                false
            }
        }
    }
}

fn read_segment(file: &mut File, id: u32) -> Result<(SlotHeader, Vec<u8>)> {
    let mut raw = [0u8; HEADER_SIZE];
    file.read_exact(&mut raw)
        .map_err(|e| ForkpoolError::CorruptSlot {
            id,
            reason: format!("short header: {e}"),
        })?;
    let header = SlotHeader::decode(&raw);

    let size = usize::try_from(header.size).map_err(|_| ForkpoolError::CorruptSlot {
        id,
        reason: format!("payload size {} out of range", header.size),
    })?;
    let available = file.metadata()?.len().saturating_sub(HEADER_SIZE as u64);
    if header.size > available {
        return Err(ForkpoolError::CorruptSlot {
            id,
            reason: format!("payload of {} bytes, {available} present", header.size),
        });
    }

    let mut payload = vec![0u8; size];
    file.read_exact(&mut payload)
        .map_err(|e| ForkpoolError::CorruptSlot {
            id,
            reason: format!("short payload: {e}"),
        })?;

    Ok((header, payload))
}

/// 32-bit tag for `namespace` and the running executable.
fn fingerprint(namespace: &str) -> u32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(namespace.as_bytes());

    if let Ok(meta) = std::env::current_exe().and_then(std::fs::metadata) {
        hasher.update(&meta.dev().to_ne_bytes());
        hasher.update(&meta.ino().to_ne_bytes());
    }

    let digest = hasher.finalize();
    let bytes = digest.as_bytes();
    u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
