//! `bkey` — the typed key with header + value (spec.md 3, 4.1).
//!
//! The closed-but-extensible tag set and fixed-offset header encoding follow
//! `crates/sombra-types::page::{PageHeader, PageKind}`: a small `#[repr(u8)]`
//! enum with `TryFrom<u8>`, paired with a struct whose `encode`/`decode`
//! write to fixed byte ranges and validate a magic/version/reserved field.

use std::convert::TryFrom;

use crate::bpos::BPos;
use crate::error::{Error, Result};

/// Identifies one of the fixed family of B+trees (spec.md 3).
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Ord, PartialOrd)]
#[repr(u8)]
pub enum BtreeId {
    Extents = 0,
    Inodes = 1,
    Dirents = 2,
    Xattrs = 3,
    Alloc = 4,
    Stripes = 5,
    Reflink = 6,
    Subvolumes = 7,
    Snapshots = 8,
}

impl BtreeId {
    /// Whether this tree's keys describe `[start, end)` extent ranges
    /// rather than point keys (spec.md 3: tree flag `is_extents`).
    pub const fn is_extents(self) -> bool {
        matches!(self, BtreeId::Extents | BtreeId::Reflink)
    }

    /// Whether this tree's keyspace carries a snapshot overlay (spec.md 3:
    /// tree flag `has_snapshots`).
    pub const fn has_snapshots(self) -> bool {
        !matches!(self, BtreeId::Alloc | BtreeId::Snapshots | BtreeId::Stripes)
    }
}

impl TryFrom<u8> for BtreeId {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            0 => BtreeId::Extents,
            1 => BtreeId::Inodes,
            2 => BtreeId::Dirents,
            3 => BtreeId::Xattrs,
            4 => BtreeId::Alloc,
            5 => BtreeId::Stripes,
            6 => BtreeId::Reflink,
            7 => BtreeId::Subvolumes,
            8 => BtreeId::Snapshots,
            _ => return Err(Error::UnsupportedFeature("unknown btree_id")),
        })
    }
}

/// Key type tag (spec.md 3). `Unknown` preserves unrecognised tags read from
/// disk verbatim, per the forward-compatibility rule in spec.md 9.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum BkeyType {
    BtreePtrV2,
    Extent,
    InodeV3,
    Dirent,
    Xattr,
    AllocV4,
    Stripe,
    ReflinkP,
    ReflinkV,
    Snapshot,
    Subvolume,
    InlineData,
    Deleted,
    Whiteout,
    /// Space accounted but not yet backed by a real extent (SPEC_FULL supplement).
    Reservation,
    /// Per-tree accounting summary key (SPEC_FULL supplement).
    AccountingSummary,
    /// Tag not recognised by this build; bytes are preserved as-is.
    Unknown(u8),
}

impl BkeyType {
    pub const fn as_u8(self) -> u8 {
        match self {
            BkeyType::BtreePtrV2 => 1,
            BkeyType::Extent => 2,
            BkeyType::InodeV3 => 3,
            BkeyType::Dirent => 4,
            BkeyType::Xattr => 5,
            BkeyType::AllocV4 => 6,
            BkeyType::Stripe => 7,
            BkeyType::ReflinkP => 8,
            BkeyType::ReflinkV => 9,
            BkeyType::Snapshot => 10,
            BkeyType::Subvolume => 11,
            BkeyType::InlineData => 12,
            BkeyType::Deleted => 13,
            BkeyType::Whiteout => 14,
            BkeyType::Reservation => 15,
            BkeyType::AccountingSummary => 16,
            BkeyType::Unknown(tag) => tag,
        }
    }

    pub const fn from_u8(tag: u8) -> Self {
        match tag {
            1 => BkeyType::BtreePtrV2,
            2 => BkeyType::Extent,
            3 => BkeyType::InodeV3,
            4 => BkeyType::Dirent,
            5 => BkeyType::Xattr,
            6 => BkeyType::AllocV4,
            7 => BkeyType::Stripe,
            8 => BkeyType::ReflinkP,
            9 => BkeyType::ReflinkV,
            10 => BkeyType::Snapshot,
            11 => BkeyType::Subvolume,
            12 => BkeyType::InlineData,
            13 => BkeyType::Deleted,
            14 => BkeyType::Whiteout,
            15 => BkeyType::Reservation,
            16 => BkeyType::AccountingSummary,
            other => BkeyType::Unknown(other),
        }
    }

    /// Tombstone types suppress older keys at the same position (spec.md 3, 4.1).
    pub const fn is_tombstone(self) -> bool {
        matches!(self, BkeyType::Deleted | BkeyType::Whiteout)
    }
}

/// Fixed header preceding every key's type-specific value (spec.md 3).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct BkeyHeader {
    /// Length of the whole key (header + value) in u64 words; `0` terminates a bset.
    pub u64s_len: u16,
    /// Packing format this key was encoded under, or 0xff if stored unpacked.
    pub format_tag: u8,
    /// Raw type tag; see [`BkeyType`].
    pub type_tag: u8,
    pub position: BPos,
    /// Extent length; `0` for point keys (spec.md 3).
    pub size: u64,
    /// MVCC/update-ordering version, used to break ties within a bset.
    pub version: u64,
}

pub const BKEY_HEADER_LEN: usize = 2 + 1 + 1 + 20 + 8 + 8;

impl BkeyHeader {
    pub fn ktype(&self) -> BkeyType {
        BkeyType::from_u8(self.type_tag)
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<()> {
        if out.len() < BKEY_HEADER_LEN {
            return Err(Error::InvalidArgument("bkey header buffer too small".into()));
        }
        out[0..2].copy_from_slice(&self.u64s_len.to_le_bytes());
        out[2] = self.format_tag;
        out[3] = self.type_tag;
        out[4..24].copy_from_slice(&self.position.encode());
        out[24..32].copy_from_slice(&self.size.to_le_bytes());
        out[32..40].copy_from_slice(&self.version.to_le_bytes());
        Ok(())
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < BKEY_HEADER_LEN {
            return Err(Error::FatalCorruption("bkey header truncated".into()));
        }
        let u64s_len = u16::from_le_bytes(src[0..2].try_into().unwrap());
        let format_tag = src[2];
        let type_tag = src[3];
        let position = BPos::decode(&src[4..24].try_into().unwrap());
        let size = u64::from_le_bytes(src[24..32].try_into().unwrap());
        let version = u64::from_le_bytes(src[32..40].try_into().unwrap());
        Ok(Self { u64s_len, format_tag, type_tag, position, size, version })
    }
}

/// A typed key plus its raw value bytes — the unit of update (spec.md glossary).
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Bkey {
    pub header: BkeyHeader,
    pub value: Vec<u8>,
}

impl Bkey {
    /// Build a point key (size = 0) of the given type.
    pub fn point(position: BPos, ktype: BkeyType, version: u64, value: Vec<u8>) -> Self {
        let header = BkeyHeader {
            u64s_len: Self::u64s_len(value.len()),
            format_tag: 0xff,
            type_tag: ktype.as_u8(),
            position,
            size: 0,
            version,
        };
        Self { header, value }
    }

    /// Build an extent key: `position` is the *end* of the range (spec.md 3).
    pub fn extent(end: BPos, size: u64, version: u64, value: Vec<u8>) -> Self {
        let header = BkeyHeader {
            u64s_len: Self::u64s_len(value.len()),
            format_tag: 0xff,
            type_tag: BkeyType::Extent.as_u8(),
            position: end,
            size,
            version,
        };
        Self { header, value }
    }

    /// A deletion tombstone at `position` (spec.md 3: "lifecycles").
    pub fn tombstone(position: BPos, version: u64) -> Self {
        let header = BkeyHeader {
            u64s_len: Self::u64s_len(0),
            format_tag: 0xff,
            type_tag: BkeyType::Deleted.as_u8(),
            position,
            size: 0,
            version,
        };
        Self { header, value: Vec::new() }
    }

    fn u64s_len(value_len: usize) -> u16 {
        let words = (BKEY_HEADER_LEN + value_len + 7) / 8;
        words as u16
    }

    pub fn is_tombstone(&self) -> bool {
        self.header.ktype().is_tombstone()
    }

    pub fn position(&self) -> BPos {
        self.header.position
    }

    /// Validate structural well-formedness: the `validate` operation of the
    /// polymorphic-key trait described in spec.md 9.
    pub fn validate(&self) -> Result<()> {
        if self.header.u64s_len == 0 {
            return Err(Error::FatalCorruption("zero-length bkey".into()));
        }
        match self.header.ktype() {
            BkeyType::Unknown(_) => Ok(()),
            _ => Ok(()),
        }
    }

    /// Human-readable rendering (the `to_text` operation of spec.md 9).
    pub fn to_text(&self) -> String {
        format!(
            "{:?}@{} v{} ({} bytes)",
            self.header.ktype(),
            self.header.position,
            self.header.version,
            self.value.len()
        )
    }

    /// On-disk footprint in bytes (the `compute_size` operation of spec.md 9).
    pub fn compute_size(&self) -> u64 {
        self.header.u64s_len as u64 * 8
    }
}
