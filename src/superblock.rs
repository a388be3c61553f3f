//! Superblock contract (spec.md 6, scenario 6).
//!
//! Fixed-offset, magic-validated encode/decode follows
//! `crates/sombra-types::page::PageHeader::{encode, decode}`, scaled up to
//! the superblock's larger, multi-section layout.

use crate::error::{Error, Result};

pub const SB_MAGIC: [u8; 8] = *b"DRIFTSB\0";
pub const SB_VERSION: u16 = 1;

/// Compression algorithm recorded in superblock options (spec.md 6, 8).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Compression {
    None,
    Lz4,
    Zstd,
}

impl Compression {
    fn as_u8(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Lz4 => 1,
            Compression::Zstd => 2,
        }
    }
    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Compression::None,
            1 => Compression::Lz4,
            2 => Compression::Zstd,
            _ => return Err(Error::FatalCorruption("unknown compression tag in superblock".into())),
        })
    }
}

/// String-hash algorithm used for directory entry hashing (spec.md 8, scenario 6).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum StrHash {
    Siphash,
    Crc32c,
}

impl StrHash {
    fn as_u8(self) -> u8 {
        match self {
            StrHash::Siphash => 0,
            StrHash::Crc32c => 1,
        }
    }
    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => StrHash::Siphash,
            1 => StrHash::Crc32c,
            _ => return Err(Error::FatalCorruption("unknown str_hash tag in superblock".into())),
        })
    }
}

/// Filesystem-wide formatting options (spec.md 6).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Options {
    pub block_size: u32,
    pub bucket_size: u32,
    pub compression: Compression,
    pub replicas: u8,
    pub str_hash: StrHash,
}

/// Per-device entry in the superblock's "members" section (spec.md 6).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct SuperblockMember {
    pub uuid: [u8; 16],
    pub bucket_size: u32,
    pub bucket_count: u64,
}

/// The last btree roots and usage counters recorded at clean unmount,
/// allowing journal replay to be skipped (spec.md 6).
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct CleanSection {
    pub present: bool,
    pub journal_seq: u64,
    /// `(btree_id, node_id, seq)` per tree root.
    pub btree_roots: Vec<(u8, u64, u64)>,
}

/// Journal bucket list, v1 (individual buckets) or v2 (ranges) (spec.md 6).
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum JournalBuckets {
    V1(Vec<u64>),
    V2(Vec<(u64, u64)>),
}

/// The filesystem superblock (spec.md 6).
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Superblock {
    pub fs_uuid: [u8; 16],
    pub options: Options,
    pub members: Vec<SuperblockMember>,
    pub journal_buckets: JournalBuckets,
    pub clean: CleanSection,
}

impl Superblock {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&SB_MAGIC);
        out.extend_from_slice(&SB_VERSION.to_le_bytes());
        out.extend_from_slice(&self.fs_uuid);
        out.extend_from_slice(&self.options.block_size.to_le_bytes());
        out.extend_from_slice(&self.options.bucket_size.to_le_bytes());
        out.push(self.options.compression.as_u8());
        out.push(self.options.replicas);
        out.push(self.options.str_hash.as_u8());

        out.extend_from_slice(&(self.members.len() as u32).to_le_bytes());
        for m in &self.members {
            out.extend_from_slice(&m.uuid);
            out.extend_from_slice(&m.bucket_size.to_le_bytes());
            out.extend_from_slice(&m.bucket_count.to_le_bytes());
        }

        match &self.journal_buckets {
            JournalBuckets::V1(buckets) => {
                out.push(1);
                out.extend_from_slice(&(buckets.len() as u32).to_le_bytes());
                for b in buckets {
                    out.extend_from_slice(&b.to_le_bytes());
                }
            }
            JournalBuckets::V2(ranges) => {
                out.push(2);
                out.extend_from_slice(&(ranges.len() as u32).to_le_bytes());
                for (start, end) in ranges {
                    out.extend_from_slice(&start.to_le_bytes());
                    out.extend_from_slice(&end.to_le_bytes());
                }
            }
        }

        out.push(self.clean.present as u8);
        out.extend_from_slice(&self.clean.journal_seq.to_le_bytes());
        out.extend_from_slice(&(self.clean.btree_roots.len() as u32).to_le_bytes());
        for (btree_id, node_id, seq) in &self.clean.btree_roots {
            out.push(*btree_id);
            out.extend_from_slice(&node_id.to_le_bytes());
            out.extend_from_slice(&seq.to_le_bytes());
        }

        let crc = {
            let mut h = crc32fast::Hasher::new();
            h.update(&out);
            h.finalize()
        };
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < 4 {
            return Err(Error::FatalCorruption("superblock truncated".into()));
        }
        let (body, crc_bytes) = src.split_at(src.len() - 4);
        let expected_crc = u32::from_le_bytes(crc_bytes.try_into().unwrap());
        let actual_crc = {
            let mut h = crc32fast::Hasher::new();
            h.update(body);
            h.finalize()
        };
        if actual_crc != expected_crc {
            return Err(Error::FatalCorruption("superblock checksum mismatch".into()));
        }

        let mut r = Reader { buf: body, pos: 0 };
        let magic = r.take(8)?;
        if magic != SB_MAGIC {
            return Err(Error::FatalCorruption("bad superblock magic".into()));
        }
        let version = r.u16()?;
        if version != SB_VERSION {
            return Err(Error::UnsupportedFeature("superblock version not supported"));
        }
        let fs_uuid: [u8; 16] = r.take(16)?.try_into().unwrap();
        let block_size = r.u32()?;
        let bucket_size = r.u32()?;
        let compression = Compression::from_u8(r.u8()?)?;
        let replicas = r.u8()?;
        let str_hash = StrHash::from_u8(r.u8()?)?;
        let options = Options { block_size, bucket_size, compression, replicas, str_hash };

        let member_count = r.u32()? as usize;
        let mut members = Vec::with_capacity(member_count);
        for _ in 0..member_count {
            let uuid: [u8; 16] = r.take(16)?.try_into().unwrap();
            let bucket_size = r.u32()?;
            let bucket_count = r.u64()?;
            members.push(SuperblockMember { uuid, bucket_size, bucket_count });
        }

        let journal_version = r.u8()?;
        let journal_buckets = match journal_version {
            1 => {
                let n = r.u32()? as usize;
                let mut v = Vec::with_capacity(n);
                for _ in 0..n {
                    v.push(r.u64()?);
                }
                JournalBuckets::V1(v)
            }
            2 => {
                let n = r.u32()? as usize;
                let mut v = Vec::with_capacity(n);
                for _ in 0..n {
                    v.push((r.u64()?, r.u64()?));
                }
                JournalBuckets::V2(v)
            }
            _ => return Err(Error::FatalCorruption("unknown journal bucket list version".into())),
        };

        let present = r.u8()? != 0;
        let journal_seq = r.u64()?;
        let root_count = r.u32()? as usize;
        let mut btree_roots = Vec::with_capacity(root_count);
        for _ in 0..root_count {
            let btree_id = r.u8()?;
            let node_id = r.u64()?;
            let seq = r.u64()?;
            btree_roots.push((btree_id, node_id, seq));
        }
        let clean = CleanSection { present, journal_seq, btree_roots };

        Ok(Superblock { fs_uuid, options, members, journal_buckets, clean })
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let slice = self.buf.get(self.pos..end).ok_or_else(|| Error::FatalCorruption("superblock truncated".into()))?;
        self.pos = end;
        Ok(slice)
    }
    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }
    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }
    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}
