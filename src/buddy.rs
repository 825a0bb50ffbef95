//! Buddy allocator over fixed-size blocks of 16-byte chunks.
//!
//! Every block is 256 KiB, subdivided by recursive halving into chunks
//! of 16, 32, 64 or 128 bytes. All bookkeeping lives inside the chunks
//! themselves: the first byte of every chunk is its tag (see
//! [`crate::tag`]), and free chunks additionally thread a circular
//! doubly linked list per size class through their first nine bytes.

use std::fmt;

use tracing::trace;

use crate::tag::TagInfo;

/// Smallest chunk, in bytes.
pub const CHUNK: usize = 16;
/// Bytes per block.
pub const BLOCK_SIZE: usize = 256 * 1024;
/// Size exponent of a whole block: `16 << BLOCK_EXP == BLOCK_SIZE`.
pub const BLOCK_EXP: u8 = 14;
/// 16-byte chunks per block.
pub const CHUNK_COUNT: u16 = (BLOCK_SIZE / CHUNK) as u16;

const SIZE_CLASSES: usize = BLOCK_EXP as usize + 1;

// ShortRef packs the block index into 10 bits, so block 0x3ff is
// reserved for the null encoding.
const MAX_BLOCKS: usize = 0x3ff;

// Free-chunk layout: {tag, prev: Ref, next: Ref} in the first 9 bytes.
const FREE_PREV: usize = 1;
const FREE_NEXT: usize = 5;

/// A chunk address: (block index, chunk index), 32 bits total.
///
/// `Ref` is `Copy`; ownership semantics are a contract between the
/// allocator and its callers, not a property of the type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Ref {
    pub(crate) block: u16,
    pub(crate) chunk: u16,
}

/// The distinguished absent reference.
pub const NULL: Ref = Ref { block: 0xffff, chunk: 0xffff };

impl Ref {
    pub fn is_null(self) -> bool {
        self == NULL
    }

    /// The sibling this chunk coalesces with at size class `sh`.
    fn buddy(self, sh: u8) -> Ref {
        Ref { block: self.block, chunk: self.chunk ^ (1u16 << sh) }
    }

    fn to_bytes(self) -> [u8; 4] {
        let [b0, b1] = self.block.to_le_bytes();
        let [c0, c1] = self.chunk.to_le_bytes();
        [b0, b1, c0, c1]
    }

    fn from_bytes(b: [u8; 4]) -> Self {
        Ref {
            block: u16::from_le_bytes([b[0], b[1]]),
            chunk: u16::from_le_bytes([b[2], b[3]]),
        }
    }
}

/// The same address packed into 24 bits for in-chunk storage:
/// block in the top 10 bits, chunk in the low 14. Null is `0xffffff`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ShortRef([u8; 3]);

impl ShortRef {
    pub const NULL: ShortRef = ShortRef([0xff, 0xff, 0xff]);

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    pub(crate) fn to_bytes(self) -> [u8; 3] {
        self.0
    }

    pub(crate) fn from_bytes(b: [u8; 3]) -> Self {
        ShortRef(b)
    }
}

impl From<Ref> for ShortRef {
    fn from(r: Ref) -> Self {
        if r.is_null() {
            return ShortRef::NULL;
        }
        debug_assert!((r.block as usize) < MAX_BLOCKS);
        debug_assert!(r.chunk < CHUNK_COUNT);
        let packed = ((r.block as u32) << 14) | r.chunk as u32;
        let [a, b, c, _] = packed.to_le_bytes();
        ShortRef([a, b, c])
    }
}

impl From<ShortRef> for Ref {
    fn from(s: ShortRef) -> Self {
        if s.is_null() {
            return NULL;
        }
        let [a, b, c] = s.0;
        let packed = u32::from_le_bytes([a, b, c, 0]);
        Ref { block: (packed >> 14) as u16, chunk: (packed & 0x3fff) as u16 }
    }
}

#[repr(C, align(128))]
struct Block([u8; BLOCK_SIZE]);

impl Block {
    fn zeroed() -> Box<Self> {
        Box::new(Block([0; BLOCK_SIZE]))
    }
}

/// Per-size-class free-chunk counts, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub blocks: usize,
    /// `free[sh]` counts free chunks of byte size `16 << sh`.
    pub free: [usize; SIZE_CLASSES],
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} block(s);", self.blocks)?;
        for (sh, n) in self.free.iter().enumerate() {
            if *n > 0 {
                write!(f, " {}x{}B", n, 16usize << sh)?;
            }
        }
        Ok(())
    }
}

/// The buddy allocator: a growing sequence of blocks plus one circular
/// free list head per size class.
pub struct Allocator {
    blocks: Vec<Box<Block>>,
    free: [Ref; SIZE_CLASSES],
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator {
    pub fn new() -> Self {
        Allocator { blocks: Vec::new(), free: [NULL; SIZE_CLASSES] }
    }

    /// Raw bytes of the chunk at `r`, with an explicit length. Used by
    /// the value layer while a chunk's tag byte is not yet committed.
    pub(crate) fn bytes(&self, r: Ref, len: usize) -> &[u8] {
        let off = r.chunk as usize * CHUNK;
        &self.blocks[r.block as usize].0[off..off + len]
    }

    pub(crate) fn bytes_mut(&mut self, r: Ref, len: usize) -> &mut [u8] {
        let off = r.chunk as usize * CHUNK;
        &mut self.blocks[r.block as usize].0[off..off + len]
    }

    pub fn tag_byte(&self, r: Ref) -> u8 {
        self.bytes(r, 1)[0]
    }

    pub(crate) fn set_tag_byte(&mut self, r: Ref, b: u8) {
        self.bytes_mut(r, 1)[0] = b;
    }

    pub fn tag_info(&self, r: Ref) -> TagInfo {
        TagInfo::from_byte(self.tag_byte(r)).expect("corrupt tag byte")
    }

    /// The full payload of an allocated chunk, sized per its tag byte.
    pub fn chunk(&self, r: Ref) -> &[u8] {
        let info = self.tag_info(r);
        debug_assert!(matches!(info, TagInfo::Allocated { .. }));
        self.bytes(r, info.byte_size())
    }

    pub fn chunk_mut(&mut self, r: Ref) -> &mut [u8] {
        let info = self.tag_info(r);
        debug_assert!(matches!(info, TagInfo::Allocated { .. }));
        self.bytes_mut(r, info.byte_size())
    }

    fn read_ref(&self, r: Ref, off: usize) -> Ref {
        let b = self.bytes(r, off + 4);
        Ref::from_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
    }

    fn write_ref(&mut self, r: Ref, off: usize, v: Ref) {
        self.bytes_mut(r, off + 4)[off..off + 4].copy_from_slice(&v.to_bytes());
    }

    /// Links `r` into the circular free list for class `sh` as its new
    /// head, and writes the free tag byte.
    fn make_free(&mut self, r: Ref, sh: u8) {
        let head = self.free[sh as usize];
        if head.is_null() {
            self.write_ref(r, FREE_PREV, r);
            self.write_ref(r, FREE_NEXT, r);
        } else {
            let head_prev = self.read_ref(head, FREE_PREV);
            self.write_ref(r, FREE_PREV, head_prev);
            self.write_ref(r, FREE_NEXT, head);
            self.write_ref(head_prev, FREE_NEXT, r);
            self.write_ref(head, FREE_PREV, r);
        }
        self.set_tag_byte(r, TagInfo::Free { sh }.to_byte());
        self.free[sh as usize] = r;
    }

    /// Unlinks `r` from its circular list. Returns the next entry, or
    /// `NULL` if `r` was the only one. Does not touch `self.free`.
    fn take_free(&mut self, r: Ref) -> Ref {
        let next = self.read_ref(r, FREE_NEXT);
        if next == r {
            NULL
        } else {
            let prev = self.read_ref(r, FREE_PREV);
            self.write_ref(prev, FREE_NEXT, next);
            self.write_ref(next, FREE_PREV, prev);
            next
        }
    }

    fn new_block(&mut self) {
        assert!(self.blocks.len() < MAX_BLOCKS, "chunk address space exhausted");
        trace!(block = self.blocks.len(), "new block");
        self.blocks.push(Block::zeroed());
        let r = Ref { block: (self.blocks.len() - 1) as u16, chunk: 0 };
        self.make_free(r, BLOCK_EXP);
    }

    /// Takes a chunk of byte size `16 << sh` (`sh <= 3`) off the free
    /// lists, splitting a larger chunk or growing a block as needed.
    ///
    /// The returned chunk still carries a free tag byte; the caller
    /// must write the full tag before the chunk is used as a value.
    pub fn allocate(&mut self, sh: u8) -> Ref {
        debug_assert!(sh <= 3);
        let mut cls = sh;
        while (cls as usize) < SIZE_CLASSES && self.free[cls as usize].is_null() {
            cls += 1;
        }
        if cls as usize == SIZE_CLASSES {
            self.new_block();
            cls = BLOCK_EXP;
        }
        let r = self.free[cls as usize];
        let next = self.take_free(r);
        self.free[cls as usize] = next;
        // split down, parking the right-hand half of each level
        while cls > sh {
            cls -= 1;
            let half = Ref { block: r.block, chunk: r.chunk + (1u16 << cls) };
            self.make_free(half, cls);
        }
        r
    }

    /// Returns `r` to the free lists, coalescing with its buddy at
    /// each size class while possible.
    pub fn deallocate(&mut self, r: Ref) {
        let info = self.tag_info(r);
        let mut sh = info.sh();
        debug_assert!(matches!(info, TagInfo::Allocated { .. }));
        let mut r = r;
        while sh < BLOCK_EXP {
            let buddy = r.buddy(sh);
            match self.tag_info(buddy) {
                TagInfo::Free { sh: bsh } if bsh == sh => {
                    let bnext = self.take_free(buddy);
                    if self.free[sh as usize] == buddy {
                        self.free[sh as usize] = bnext;
                    }
                    if buddy.chunk < r.chunk {
                        r = buddy;
                    }
                    sh += 1;
                }
                _ => break,
            }
        }
        self.make_free(r, sh);
    }

    pub fn stats(&self) -> Stats {
        let mut free = [0usize; SIZE_CLASSES];
        for (sh, slot) in free.iter_mut().enumerate() {
            let head = self.free[sh];
            if head.is_null() {
                continue;
            }
            let mut cur = head;
            loop {
                *slot += 1;
                cur = self.read_ref(cur, FREE_NEXT);
                if cur == head {
                    break;
                }
            }
        }
        Stats { blocks: self.blocks.len(), free }
    }

    /// Count of 16-byte chunk units currently allocated.
    pub fn chunks_in_use(&self) -> usize {
        let stats = self.stats();
        let free_units: usize =
            stats.free.iter().enumerate().map(|(sh, n)| n << sh).sum();
        self.blocks.len() * CHUNK_COUNT as usize - free_units
    }

    #[cfg(test)]
    fn free_lists(&self) -> Vec<Vec<Ref>> {
        (0..SIZE_CLASSES)
            .map(|sh| {
                let mut out = Vec::new();
                let head = self.free[sh];
                if head.is_null() {
                    return out;
                }
                let mut cur = head;
                loop {
                    out.push(cur);
                    cur = self.read_ref(cur, FREE_NEXT);
                    if cur == head {
                        break;
                    }
                }
                out
            })
            .collect()
    }
}
