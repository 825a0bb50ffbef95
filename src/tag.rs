use anyhow::anyhow;
use std::convert::TryFrom;
use std::fmt;

/// Type code stored in bits 6..2 of an allocated chunk's tag byte.
///
/// The tag byte is the sole source of truth for what a chunk holds:
/// bit 7 marks a free chunk (in which case bits 6..0 carry the free
/// size exponent instead), bits 6..2 carry the `Tag` and bits 1..0
/// carry log2(size/16) for allocated chunks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    /// Interned immutable atom; sharing copies the reference itself.
    NoRefCount = 0,
    /// Byte string stored inline in the chunk.
    InplaceAtom,
    /// Byte string in a heap buffer owned by the chunk.
    OwnedAtom,
    /// Byte string owned by the host, referenced by the chunk.
    ExtAtom,
    Cons,
    Error,
    /// Binary-reducer closure family.
    Func,
    /// Fixed-arity closure family, with argument counter.
    FuncCount,
    /// Closure family whose state lives outside the value graph.
    FuncExt,
}

impl Tag {
    /// Refcounted types carry a u24 count after the tag byte.
    pub const fn refcounted(self) -> bool {
        !matches!(self, Tag::NoRefCount)
    }
}

impl From<Tag> for u8 {
    fn from(val: Tag) -> Self {
        val as u8
    }
}

impl TryFrom<u8> for Tag {
    type Error = anyhow::Error;

    fn try_from(x: u8) -> Result<Self, anyhow::Error> {
        match x {
            f if f == Tag::NoRefCount as u8 => Ok(Tag::NoRefCount),
            f if f == Tag::InplaceAtom as u8 => Ok(Tag::InplaceAtom),
            f if f == Tag::OwnedAtom as u8 => Ok(Tag::OwnedAtom),
            f if f == Tag::ExtAtom as u8 => Ok(Tag::ExtAtom),
            f if f == Tag::Cons as u8 => Ok(Tag::Cons),
            f if f == Tag::Error as u8 => Ok(Tag::Error),
            f if f == Tag::Func as u8 => Ok(Tag::Func),
            f if f == Tag::FuncCount as u8 => Ok(Tag::FuncCount),
            f if f == Tag::FuncExt as u8 => Ok(Tag::FuncExt),
            f => Err(anyhow!("invalid tag code: {f}")),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::NoRefCount => write!(f, "norefcount"),
            Tag::InplaceAtom => write!(f, "atom"),
            Tag::OwnedAtom => write!(f, "atom.owned"),
            Tag::ExtAtom => write!(f, "atom.ext"),
            Tag::Cons => write!(f, "cons"),
            Tag::Error => write!(f, "error"),
            Tag::Func => write!(f, "func"),
            Tag::FuncCount => write!(f, "funcc"),
            Tag::FuncExt => write!(f, "funcext"),
        }
    }
}

/// Decoded form of a chunk's tag byte.
///
/// `sh` is the size exponent: the chunk spans `16 << sh` bytes. Free
/// chunks use the full exponent range up to a whole block; allocated
/// chunks are restricted to `sh <= 3` (16..128 bytes).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TagInfo {
    Free { sh: u8 },
    Allocated { tag: Tag, sh: u8 },
}

impl TagInfo {
    pub fn from_byte(b: u8) -> anyhow::Result<Self> {
        if b & 0x80 != 0 {
            Ok(TagInfo::Free { sh: b & 0x7f })
        } else {
            let tag = Tag::try_from((b >> 2) & 0x1f)?;
            Ok(TagInfo::Allocated { tag, sh: b & 0x03 })
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            TagInfo::Free { sh } => {
                debug_assert!(sh <= 0x7f);
                0x80 | sh
            }
            TagInfo::Allocated { tag, sh } => {
                debug_assert!(sh <= 0x03);
                ((tag as u8) << 2) | sh
            }
        }
    }

    /// Size exponent, for free and allocated chunks alike.
    pub fn sh(self) -> u8 {
        match self {
            TagInfo::Free { sh } => sh,
            TagInfo::Allocated { sh, .. } => sh,
        }
    }

    pub fn byte_size(self) -> usize {
        16usize << self.sh()
    }
}
