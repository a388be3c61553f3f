//! Block layer contract (spec.md 6).
//!
//! Narrows `src/primitives/io/mod.rs::FileIo` (`read_at`/`write_at`/
//! `sync_all`/`truncate`, `Send + Sync + 'static`, `#[cfg(unix)]`/
//! `#[cfg(windows)]` split) to the bucket-addressed, opaque-buffer contract
//! spec.md 6 specifies: `submit(op, bucket, buf, len) -> completion`.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::alloc::BucketAddr;
use crate::error::{Error, Result};

/// One of the four operations the block layer accepts (spec.md 6).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum BlockOp {
    Read,
    Write,
    Discard,
    Flush,
}

/// Completion status (spec.md 6).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Completion {
    Ok,
    IoError,
    Timeout,
    NoSpace,
}

/// Opaque block-device contract the core treats as external (spec.md 6).
/// Writes are unordered relative to each other unless preceded by a flush;
/// a `Flush` followed by a `Write` is the FUA idiom spec.md 6 describes.
pub trait BlockDevice: Send + Sync {
    fn submit(&self, op: BlockOp, bucket: BucketAddr, buf: &mut [u8]) -> Completion;
}

#[derive(Default)]
struct DeviceState {
    data: HashMap<u64, Vec<u8>>,
    bucket_size: usize,
}

/// In-memory reference implementation for tests and for exercising the
/// engine without real hardware.
pub struct InMemoryBlockDevice {
    bucket_size: usize,
    devices: RwLock<HashMap<u32, DeviceState>>,
    fail_reads: RwLock<std::collections::HashSet<(u32, u64)>>,
}

impl InMemoryBlockDevice {
    pub fn new(bucket_size: usize) -> Self {
        Self { bucket_size, devices: RwLock::new(HashMap::new()), fail_reads: RwLock::new(Default::default()) }
    }

    /// Test hook: make the next read of this bucket fail with `io_error`,
    /// modelling a bad replica (spec.md 7: "read paths ... if none are good,
    /// the read fails with io_error").
    pub fn inject_read_failure(&self, bucket: BucketAddr) {
        self.fail_reads.write().insert((bucket.dev, bucket.bucket));
    }
}

impl BlockDevice for InMemoryBlockDevice {
    fn submit(&self, op: BlockOp, bucket: BucketAddr, buf: &mut [u8]) -> Completion {
        match op {
            BlockOp::Flush => Completion::Ok,
            BlockOp::Discard => {
                self.devices.write().entry(bucket.dev).or_insert_with(|| DeviceState { data: HashMap::new(), bucket_size: self.bucket_size }).data.remove(&bucket.bucket);
                Completion::Ok
            }
            BlockOp::Write => {
                let mut devices = self.devices.write();
                let dev = devices.entry(bucket.dev).or_insert_with(|| DeviceState { data: HashMap::new(), bucket_size: self.bucket_size });
                dev.data.insert(bucket.bucket, buf.to_vec());
                Completion::Ok
            }
            BlockOp::Read => {
                if self.fail_reads.write().remove(&(bucket.dev, bucket.bucket)) {
                    return Completion::IoError;
                }
                let devices = self.devices.read();
                match devices.get(&bucket.dev).and_then(|d| d.data.get(&bucket.bucket)) {
                    Some(bytes) => {
                        let n = bytes.len().min(buf.len());
                        buf[..n].copy_from_slice(&bytes[..n]);
                        for b in &mut buf[n..] {
                            *b = 0;
                        }
                        Completion::Ok
                    }
                    None => {
                        buf.fill(0);
                        Completion::Ok
                    }
                }
            }
        }
    }
}

/// Read a bucket, surfacing `io_error` on failure (spec.md 7).
pub fn read_bucket(dev: &dyn BlockDevice, bucket: BucketAddr, buf: &mut [u8]) -> Result<()> {
    match dev.submit(BlockOp::Read, bucket, buf) {
        Completion::Ok => Ok(()),
        Completion::IoError => Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "block read failed"))),
        Completion::Timeout => Err(Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "block read timed out"))),
        Completion::NoSpace => Err(Error::NoSpace),
    }
}

/// Write a bucket, surfacing `io_error` on failure (spec.md 7).
pub fn write_bucket(dev: &dyn BlockDevice, bucket: BucketAddr, buf: &mut [u8]) -> Result<()> {
    match dev.submit(BlockOp::Write, bucket, buf) {
        Completion::Ok => Ok(()),
        Completion::IoError => Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "block write failed"))),
        Completion::Timeout => Err(Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "block write timed out"))),
        Completion::NoSpace => Err(Error::NoSpace),
    }
}
