//! The file-block registry behind the vmblock control file.
//!
//! A blocker (one open handle on the control file) blocks a path; anybody
//! touching that path waits until the block is removed, either explicitly
//! or because the blocker closed its handle.
//!
//! Requests arrive as an opcode and a path. The kernel module takes the
//! numeric opcodes through `write(2)` on [`DEVICE`]; the FUSE variant reads
//! a single command byte instead, see [`fuse`].

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::sync::{Condvar, Mutex};

pub const ADD_FILEBLOCK: u32 = 98;
pub const DEL_FILEBLOCK: u32 = 99;
#[cfg(feature = "devel")]
pub const LIST_FILEBLOCKS: u32 = 100;

pub const FS_NAME: &str = "vmblock";
pub const MOUNT_POINT: &str = "/proc/fs/vmblock/mountPoint";
pub const FS_ROOT: &str = MOUNT_POINT;
pub const DEVICE: &str = "/proc/fs/vmblock/dev";
pub const DEVICE_MODE: libc::c_int = libc::O_WRONLY;

/// Names used by the user-level FUSE implementation.
pub mod fuse {
    pub const ADD_FILEBLOCK: u8 = b'a';
    pub const DEL_FILEBLOCK: u8 = b'd';
    #[cfg(feature = "devel")]
    pub const LIST_FILEBLOCKS: u8 = b'l';

    /// What a read of the control file returns, to tell FUSE apart from
    /// the kernel module.
    pub const READ_RESPONSE: &str = "I am VMBLOCK-FUSE";
    pub const FS_NAME: &str = "fuse.vmware-vmblock";
    pub const MOUNT_POINT: &str = "/tmp/vmblock-fuse";
    pub const CTRL_MNTPNT: &str = "blockdir";
    pub const FS_ROOT: &str = "/tmp/vmblock-fuse/blockdir";
    pub const DEVICE_NAME: &str = "dev";
    pub const DEVICE: &str = "/tmp/vmblock-fuse/dev";
    pub const DEVICE_MODE: libc::c_int = libc::O_RDWR;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    Add,
    Delete,
    /// Dumps the current blocks to the log.
    #[cfg(feature = "devel")]
    List,
}

impl ControlOp {
    pub fn from_raw(op: u32) -> Option<Self> {
        match op {
            ADD_FILEBLOCK => Some(Self::Add),
            DEL_FILEBLOCK => Some(Self::Delete),
            #[cfg(feature = "devel")]
            LIST_FILEBLOCKS => Some(Self::List),
            _ => None,
        }
    }

    pub fn from_fuse(op: u8) -> Option<Self> {
        match op {
            fuse::ADD_FILEBLOCK => Some(Self::Add),
            fuse::DEL_FILEBLOCK => Some(Self::Delete),
            #[cfg(feature = "devel")]
            fuse::LIST_FILEBLOCKS => Some(Self::List),
            _ => None,
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            Self::Add => ADD_FILEBLOCK,
            Self::Delete => DEL_FILEBLOCK,
            #[cfg(feature = "devel")]
            Self::List => LIST_FILEBLOCKS,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("empty path")]
    EmptyPath,
    #[error("path of {0} bytes is too long")]
    NameTooLong(usize),
    #[error("path is not valid UTF-8")]
    InvalidPath,
    #[error("unknown control operation {0}")]
    UnknownOp(u32),
    #[error("{0} is already blocked")]
    AlreadyBlocked(String),
    #[error("{0} is not blocked")]
    NotBlocked(String),
    #[error("{path} is blocked by {owner}")]
    NotOwner { path: String, owner: BlockerId },
}

impl BlockError {
    pub fn errno(&self) -> i32 {
        match self {
            Self::EmptyPath | Self::InvalidPath | Self::UnknownOp(_) => libc::EINVAL,
            Self::NameTooLong(_) => libc::ENAMETOOLONG,
            Self::AlreadyBlocked(_) => libc::EEXIST,
            Self::NotBlocked(_) => libc::ENOENT,
            Self::NotOwner { .. } => libc::EPERM,
        }
    }
}

/// Identifies whoever placed a block, typically one open control handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockerId(pub u64);

impl fmt::Display for BlockerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blocker {}", self.0)
    }
}

fn check_path(path: &str) -> Result<(), BlockError> {
    if path.is_empty() {
        return Err(BlockError::EmptyPath);
    }
    // PATH_MAX counts the terminating nul.
    if path.len() >= libc::PATH_MAX as usize {
        return Err(BlockError::NameTooLong(path.len()));
    }
    Ok(())
}

#[derive(Default)]
pub struct BlockRegistry {
    blocks: Mutex<HashMap<String, BlockerId>>,
    unblocked: Condvar,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, path: &str, blocker: BlockerId) -> Result<(), BlockError> {
        check_path(path)?;
        let mut blocks = self.blocks.lock();
        if blocks.contains_key(path) {
            return Err(BlockError::AlreadyBlocked(path.to_owned()));
        }
        blocks.insert(path.to_owned(), blocker);
        tracing::trace!(path, %blocker, "added file block");
        Ok(())
    }

    /// Only the blocker that placed a block may remove it.
    pub fn delete(&self, path: &str, blocker: BlockerId) -> Result<(), BlockError> {
        check_path(path)?;
        let mut blocks = self.blocks.lock();
        match blocks.get(path) {
            None => return Err(BlockError::NotBlocked(path.to_owned())),
            Some(&owner) if owner != blocker => {
                return Err(BlockError::NotOwner {
                    path: path.to_owned(),
                    owner,
                })
            }
            Some(_) => {}
        }
        blocks.remove(path);
        drop(blocks);
        tracing::trace!(path, %blocker, "deleted file block");
        self.unblocked.notify_all();
        Ok(())
    }

    /// Drops every block `blocker` holds, as when its handle is closed.
    pub fn remove_all(&self, blocker: BlockerId) -> usize {
        let mut blocks = self.blocks.lock();
        let before = blocks.len();
        blocks.retain(|_, owner| *owner != blocker);
        let removed = before - blocks.len();
        drop(blocks);
        if removed > 0 {
            tracing::trace!(%blocker, removed, "removed file blocks of closed blocker");
            self.unblocked.notify_all();
        }
        removed
    }

    pub fn is_blocked(&self, path: &str) -> bool {
        self.blocks.lock().contains_key(path)
    }

    /// Sleeps until `path` has no block.
    pub fn wait_while_blocked(&self, path: &str) {
        let blocks = self.blocks.lock();
        drop(self.unblocked.wait_while(blocks, |blocks| blocks.contains_key(path)));
    }

    #[cfg(feature = "devel")]
    pub fn list(&self) -> Vec<(String, BlockerId)> {
        let mut list: Vec<_> = self
            .blocks
            .lock()
            .iter()
            .map(|(path, owner)| (path.clone(), *owner))
            .collect();
        list.sort();
        list
    }

    pub fn control(&self, op: ControlOp, path: &str, blocker: BlockerId) -> Result<(), BlockError> {
        match op {
            ControlOp::Add => self.add(path, blocker),
            ControlOp::Delete => self.delete(path, blocker),
            #[cfg(feature = "devel")]
            ControlOp::List => {
                let list = self.list();
                tracing::info!(count = list.len(), "file blocks");
                for (path, owner) in list {
                    tracing::info!(path = %path, %owner, "file block");
                }
                Ok(())
            }
        }
    }

    /// The control-file entry point: 0 on success, -1 with the reason left
    /// in [`last_errno`].
    pub fn control_raw(&self, op: u32, path: &[u8], blocker: BlockerId) -> i32 {
        let result = ControlOp::from_raw(op)
            .ok_or(BlockError::UnknownOp(op))
            .and_then(|op| {
                let path = std::str::from_utf8(path).map_err(|_| BlockError::InvalidPath)?;
                self.control(op, path, blocker)
            });
        match result {
            Ok(()) => 0,
            Err(err) => {
                tracing::trace!(op, %blocker, %err, "control request failed");
                LAST_ERRNO.with(|errno| errno.set(err.errno()));
                -1
            }
        }
    }
}

impl fmt::Debug for BlockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRegistry")
            .field("blocks", &self.blocks.lock().len())
            .finish()
    }
}

thread_local! {
    static LAST_ERRNO: Cell<i32> = const { Cell::new(0) };
}

/// The errno of the calling thread's last failed [`BlockRegistry::control_raw`].
/// Not cleared by successful calls.
pub fn last_errno() -> i32 {
    LAST_ERRNO.with(Cell::get)
}
