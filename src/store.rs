//! The typed value layer over the buddy allocator.
//!
//! A [`Store`] owns the allocator, the two interned atoms (`nil` and
//! `one`), and every live value. Values are created by the `create_*`
//! constructors, shared with [`Store::bumpref`], and released with
//! [`Store::deref`]; a chunk whose refcount reaches zero is freed,
//! recursively but without recursion (see `deref`).

use core::panic::Location;
use std::convert::TryFrom;

use sha2::Sha256;
use tracing::trace;

use crate::buddy::{Allocator, Ref, ShortRef, Stats, NULL};
use crate::error::ValueError;
use crate::func::{Func, FuncCount, FuncExt};
use crate::num;
use crate::tag::{Tag, TagInfo};

// Chunk layouts. Every refcounted type starts {tag: u8, rc: u24}.
const RC: usize = 1;
const ATOM_LEN: usize = 4; // inplace atoms: u8 payload length
const ATOM_DATA: usize = 5;
const SIZE32: usize = 4; // owned/ext atoms: u32 payload length
const PTR: usize = 8; // owned/ext payload, error origin, hash state
const CONS_LEFT: usize = 4;
const CONS_RIGHT: usize = 7;
const ERR_LINE: usize = 4;
const FUNC_ID: usize = 4; // u16 (u8 for the extended family)
const FUNC_ENV: usize = 6;
const FUNC_STATE: usize = 9;
const FUNC_COUNTER: usize = 12;
const EXT_ID: usize = 4;
const EXT_ENV: usize = 5;

/// Inline atom byte capacity at each of the four chunk sizes.
pub const INLINE_CAP: [usize; 4] = [11, 27, 59, 123];

/// Refcounts saturate here; a saturated value is pinned forever.
const RC_MAX: u32 = 0x00ff_ffff;

fn read_u24(chunk: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([chunk[off], chunk[off + 1], chunk[off + 2], 0])
}

fn write_u24(chunk: &mut [u8], off: usize, v: u32) {
    debug_assert!(v <= RC_MAX);
    chunk[off..off + 3].copy_from_slice(&v.to_le_bytes()[..3]);
}

fn read_u32(chunk: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(chunk[off..off + 4].try_into().expect("4 bytes"))
}

fn write_u32(chunk: &mut [u8], off: usize, v: u32) {
    chunk[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn read_u64(chunk: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(chunk[off..off + 8].try_into().expect("8 bytes"))
}

fn write_u64(chunk: &mut [u8], off: usize, v: u64) {
    chunk[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

fn read_u16(chunk: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([chunk[off], chunk[off + 1]])
}

fn write_u16(chunk: &mut [u8], off: usize, v: u16) {
    chunk[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn read_short(chunk: &[u8], off: usize) -> Ref {
    ShortRef::from_bytes([chunk[off], chunk[off + 1], chunk[off + 2]]).into()
}

fn write_short(chunk: &mut [u8], off: usize, r: Ref) {
    chunk[off..off + 3].copy_from_slice(&ShortRef::from(r).to_bytes());
}

/// A typed, read-only view of one chunk, as produced by
/// [`Store::fetch`]. The atom variants expose the payload bytes
/// regardless of where they are stored.
#[derive(Debug, Clone, Copy)]
pub enum Element<'a> {
    /// One of the interned refcount-free atoms (`nil`, `one`).
    NoRefAtom(&'a [u8]),
    InplaceAtom(&'a [u8]),
    OwnedAtom(&'a [u8]),
    ExtAtom(&'a [u8]),
    Cons { left: Ref, right: Ref },
    Error(&'static Location<'static>),
    Func { id: Func, env: Ref, state: Ref },
    FuncCount { id: FuncCount, env: Ref, state: Ref, counter: u32 },
    FuncExt { id: FuncExt, env: Ref },
}

impl<'a> Element<'a> {
    pub fn atom(&self) -> Option<&'a [u8]> {
        match *self {
            Element::NoRefAtom(b)
            | Element::InplaceAtom(b)
            | Element::OwnedAtom(b)
            | Element::ExtAtom(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        self.atom().is_some_and(|b| b.is_empty())
    }

    pub fn is_cons(&self) -> bool {
        matches!(self, Element::Cons { .. })
    }
}

/// Compact, `Copy` summary of a closure chunk, for the evaluator's
/// dispatch. The extended family keeps its native state out of view;
/// see [`Store::hash_state`].
#[derive(Debug, Copy, Clone)]
pub(crate) enum ClosureKind {
    Bin(Func),
    Fixed { id: FuncCount, counter: u32 },
    Ext(FuncExt),
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct Closure {
    pub kind: ClosureKind,
    pub env: Ref,
    pub state: Ref,
}

/// The value store. All operations go through `&mut Store`, which is
/// what makes handing references between host and evaluator safe: a
/// `Ref` only dies when its owner explicitly passes it back in.
pub struct Store {
    alloc: Allocator,
    nil: Ref,
    one: Ref,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        let mut alloc = Allocator::new();
        let nil = Self::intern_atom(&mut alloc, &[]);
        let one = Self::intern_atom(&mut alloc, &[0x01]);
        Store { alloc, nil, one }
    }

    fn intern_atom(alloc: &mut Allocator, bytes: &[u8]) -> Ref {
        debug_assert!(bytes.len() <= INLINE_CAP[0]);
        let r = alloc.allocate(0);
        let chunk = alloc.bytes_mut(r, 16);
        write_u24(chunk, RC, 1);
        chunk[ATOM_LEN] = bytes.len() as u8;
        chunk[ATOM_DATA..ATOM_DATA + bytes.len()].copy_from_slice(bytes);
        alloc.set_tag_byte(r, TagInfo::Allocated { tag: Tag::NoRefCount, sh: 0 }.to_byte());
        r
    }

    /// The empty atom; also the false value.
    pub fn nil(&self) -> Ref {
        self.nil
    }

    /// The one-byte atom `0x01`; the canonical truthy value.
    pub fn one(&self) -> Ref {
        self.one
    }

    pub fn stats(&self) -> Stats {
        self.alloc.stats()
    }

    /// 16-byte chunk units currently allocated, the interned atoms
    /// included.
    pub fn chunks_in_use(&self) -> usize {
        self.alloc.chunks_in_use()
    }

    fn seal(&mut self, r: Ref, tag: Tag, sh: u8) {
        self.alloc.set_tag_byte(r, TagInfo::Allocated { tag, sh }.to_byte());
    }

    /// Creates an atom holding `bytes`. Small payloads go inline at
    /// the smallest fitting chunk size; larger ones move to an owned
    /// heap buffer. The empty and `0x01` payloads return the interned
    /// `nil`/`one`.
    pub fn create_atom(&mut self, bytes: &[u8]) -> Ref {
        if bytes.is_empty() {
            return self.nil;
        }
        if bytes == [0x01] {
            return self.one;
        }
        match (0u8..4).find(|&sh| bytes.len() <= INLINE_CAP[sh as usize]) {
            Some(sh) => {
                let r = self.alloc.allocate(sh);
                let chunk = self.alloc.bytes_mut(r, 16 << sh);
                write_u24(chunk, RC, 1);
                chunk[ATOM_LEN] = bytes.len() as u8;
                chunk[ATOM_DATA..ATOM_DATA + bytes.len()].copy_from_slice(bytes);
                self.seal(r, Tag::InplaceAtom, sh);
                r
            }
            None => self.create_owned(bytes.into()),
        }
    }

    fn create_owned(&mut self, data: Box<[u8]>) -> Ref {
        assert!(data.len() <= u32::MAX as usize, "atom too large");
        let r = self.alloc.allocate(0);
        let len = data.len() as u32;
        let ptr = Box::into_raw(data) as *mut u8;
        let chunk = self.alloc.bytes_mut(r, 16);
        write_u24(chunk, RC, 1);
        write_u32(chunk, SIZE32, len);
        write_u64(chunk, PTR, ptr as u64);
        self.seal(r, Tag::OwnedAtom, 0);
        r
    }

    /// Creates an atom whose payload stays owned by the host.
    pub fn create_ext_atom(&mut self, bytes: &'static [u8]) -> Ref {
        assert!(bytes.len() <= u32::MAX as usize, "atom too large");
        let r = self.alloc.allocate(0);
        let chunk = self.alloc.bytes_mut(r, 16);
        write_u24(chunk, RC, 1);
        write_u32(chunk, SIZE32, bytes.len() as u32);
        write_u64(chunk, PTR, bytes.as_ptr() as u64);
        self.seal(r, Tag::ExtAtom, 0);
        r
    }

    /// Creates the atom carrying the canonical encoding of `n`.
    pub fn create_int(&mut self, n: i64) -> Ref {
        self.create_atom(&num::encode(n))
    }

    pub fn create_bool(&mut self, b: bool) -> Ref {
        if b {
            self.one
        } else {
            self.nil
        }
    }

    /// Creates a pair. Takes ownership of both references.
    pub fn create_cons(&mut self, left: Ref, right: Ref) -> Ref {
        debug_assert!(!left.is_null() && !right.is_null());
        let r = self.alloc.allocate(0);
        let chunk = self.alloc.bytes_mut(r, 16);
        write_u24(chunk, RC, 1);
        write_short(chunk, CONS_LEFT, left);
        write_short(chunk, CONS_RIGHT, right);
        self.seal(r, Tag::Cons, 0);
        r
    }

    /// Builds a right-nested nil-terminated list, consuming the item
    /// references.
    pub fn create_list(&mut self, items: Vec<Ref>) -> Ref {
        let mut tail = self.nil;
        for item in items.into_iter().rev() {
            tail = self.create_cons(item, tail);
        }
        tail
    }

    pub fn create_error(&mut self, origin: &'static Location<'static>) -> Ref {
        let r = self.alloc.allocate(0);
        let chunk = self.alloc.bytes_mut(r, 16);
        write_u24(chunk, RC, 1);
        write_u32(chunk, ERR_LINE, origin.line());
        write_u64(chunk, PTR, origin as *const Location as u64);
        self.seal(r, Tag::Error, 0);
        r
    }

    /// An error value carrying the caller's source location.
    #[track_caller]
    pub fn error_here(&mut self) -> Ref {
        self.create_error(Location::caller())
    }

    /// Creates a binary-reducer closure. Takes ownership of `env` and
    /// `state`; `state` may be `NULL` meaning "initial".
    pub fn create_func(&mut self, id: Func, env: Ref, state: Ref) -> Ref {
        let r = self.alloc.allocate(0);
        let chunk = self.alloc.bytes_mut(r, 16);
        write_u24(chunk, RC, 1);
        write_u16(chunk, FUNC_ID, id as u16);
        write_short(chunk, FUNC_ENV, env);
        write_short(chunk, FUNC_STATE, state);
        chunk[12..16].fill(0);
        self.seal(r, Tag::Func, 0);
        r
    }

    /// Creates a fixed-arity closure with its argument counter.
    pub fn create_func_count(&mut self, id: FuncCount, env: Ref, state: Ref, counter: u32) -> Ref {
        let r = self.alloc.allocate(0);
        let chunk = self.alloc.bytes_mut(r, 16);
        write_u24(chunk, RC, 1);
        write_u16(chunk, FUNC_ID, id as u16);
        write_short(chunk, FUNC_ENV, env);
        write_short(chunk, FUNC_STATE, state);
        write_u32(chunk, FUNC_COUNTER, counter);
        self.seal(r, Tag::FuncCount, 0);
        r
    }

    /// Creates an extended-state closure. The hash context, if any,
    /// moves onto the host heap and is dropped with the chunk.
    pub fn create_func_ext(&mut self, id: FuncExt, env: Ref, state: Option<Box<Sha256>>) -> Ref {
        let r = self.alloc.allocate(0);
        let ptr = state.map_or(std::ptr::null_mut(), Box::into_raw);
        let chunk = self.alloc.bytes_mut(r, 16);
        write_u24(chunk, RC, 1);
        chunk[EXT_ID] = id as u8;
        write_short(chunk, EXT_ENV, env);
        write_u64(chunk, PTR, ptr as u64);
        self.seal(r, Tag::FuncExt, 0);
        r
    }

    fn refcount(&self, r: Ref) -> u32 {
        read_u24(self.alloc.chunk(r), RC)
    }

    fn set_refcount(&mut self, r: Ref, rc: u32) {
        write_u24(self.alloc.chunk_mut(r), RC, rc);
    }

    fn tag_of(&self, r: Ref) -> Tag {
        match self.alloc.tag_info(r) {
            TagInfo::Allocated { tag, .. } => tag,
            TagInfo::Free { .. } => unreachable!("live reference to a free chunk"),
        }
    }

    /// Shares a value: +1 on its refcount, except for the interned
    /// refcount-free atoms, where the reference itself is the share.
    pub fn bumpref(&mut self, r: Ref) -> Ref {
        if r.is_null() || !self.tag_of(r).refcounted() {
            return r;
        }
        let rc = self.refcount(r);
        if rc < RC_MAX {
            self.set_refcount(r, rc + 1);
        }
        r
    }

    /// Releases one reference to `r`, freeing the chunk and the
    /// subgraph it solely owns once the count reaches zero.
    ///
    /// The walk is iterative: a dying chunk with two dying children is
    /// rewritten in place as a cons on a deferred-work chain whose
    /// backbone is exactly the freed parents, so arbitrarily deep
    /// structures drop in O(1) auxiliary space.
    pub fn deref(&mut self, r: Ref) {
        let mut work = r;
        let mut carry = NULL;
        loop {
            if work.is_null() {
                if carry.is_null() {
                    break;
                }
                work = carry;
                carry = NULL;
                continue;
            }
            if !self.tag_of(work).refcounted() {
                work = NULL;
                continue;
            }
            let rc = self.refcount(work);
            if rc == RC_MAX {
                // pinned
                work = NULL;
                continue;
            }
            if rc > 1 {
                self.set_refcount(work, rc - 1);
                work = NULL;
                continue;
            }
            trace!(block = work.block, chunk = work.chunk, "free");
            let (a, b) = self.release_payload(work);
            let mut a = self.keep_if_dying(a);
            let mut b = self.keep_if_dying(b);
            if a.is_null() {
                a = b;
                b = NULL;
            }
            if !a.is_null() && !b.is_null() {
                // park b: reuse this chunk as a cell of the carry chain
                self.rewrite_as_cons(work, b, carry);
                carry = work;
            } else {
                self.alloc.deallocate(work);
            }
            work = a;
        }
    }

    /// Frees any out-of-graph payload of a dying chunk and returns its
    /// child references (0, 1 or 2 of them; `NULL` where absent).
    fn release_payload(&mut self, r: Ref) -> (Ref, Ref) {
        match self.tag_of(r) {
            Tag::Cons => {
                let chunk = self.alloc.chunk(r);
                (read_short(chunk, CONS_LEFT), read_short(chunk, CONS_RIGHT))
            }
            Tag::Func | Tag::FuncCount => {
                let chunk = self.alloc.chunk(r);
                (read_short(chunk, FUNC_ENV), read_short(chunk, FUNC_STATE))
            }
            Tag::FuncExt => {
                let chunk = self.alloc.chunk(r);
                let env = read_short(chunk, EXT_ENV);
                let ptr = read_u64(chunk, PTR) as *mut Sha256;
                if !ptr.is_null() {
                    // SAFETY: produced by Box::into_raw in
                    // create_func_ext and owned solely by this chunk.
                    drop(unsafe { Box::from_raw(ptr) });
                }
                (env, NULL)
            }
            Tag::OwnedAtom => {
                let chunk = self.alloc.chunk(r);
                let len = read_u32(chunk, SIZE32) as usize;
                let ptr = read_u64(chunk, PTR) as *mut u8;
                // SAFETY: produced by Box::into_raw in create_owned
                // and owned solely by this chunk.
                drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len)) });
                (NULL, NULL)
            }
            Tag::InplaceAtom | Tag::ExtAtom | Tag::Error => (NULL, NULL),
            Tag::NoRefCount => unreachable!("interned atoms are never freed"),
        }
    }

    /// Drops the edge to `c`. Returns `c` only if this was its last
    /// reference, i.e. the child dies with its parent and must be
    /// walked; otherwise returns `NULL`.
    fn keep_if_dying(&mut self, c: Ref) -> Ref {
        if c.is_null() || !self.tag_of(c).refcounted() {
            return NULL;
        }
        let rc = self.refcount(c);
        if rc == RC_MAX {
            return NULL;
        }
        if rc > 1 {
            self.set_refcount(c, rc - 1);
            return NULL;
        }
        c
    }

    fn rewrite_as_cons(&mut self, r: Ref, left: Ref, right: Ref) {
        let chunk = self.alloc.chunk_mut(r);
        write_u24(chunk, RC, 1);
        write_short(chunk, CONS_LEFT, left);
        write_short(chunk, CONS_RIGHT, right);
        self.seal(r, Tag::Cons, 0);
    }

    /// Dispatch: the typed view of the chunk at `r`. This is the one
    /// place the type code is interpreted.
    pub fn fetch(&self, r: Ref) -> Element<'_> {
        debug_assert!(!r.is_null());
        let chunk = self.alloc.chunk(r);
        match self.tag_of(r) {
            Tag::NoRefCount => {
                let len = chunk[ATOM_LEN] as usize;
                Element::NoRefAtom(&chunk[ATOM_DATA..ATOM_DATA + len])
            }
            Tag::InplaceAtom => {
                let len = chunk[ATOM_LEN] as usize;
                Element::InplaceAtom(&chunk[ATOM_DATA..ATOM_DATA + len])
            }
            Tag::OwnedAtom => {
                let len = read_u32(chunk, SIZE32) as usize;
                let ptr = read_u64(chunk, PTR) as *const u8;
                // SAFETY: the buffer is owned by this chunk and lives
                // until the chunk is freed.
                Element::OwnedAtom(unsafe { std::slice::from_raw_parts(ptr, len) })
            }
            Tag::ExtAtom => {
                let len = read_u32(chunk, SIZE32) as usize;
                let ptr = read_u64(chunk, PTR) as *const u8;
                // SAFETY: the host handed us a 'static slice.
                Element::ExtAtom(unsafe { std::slice::from_raw_parts(ptr, len) })
            }
            Tag::Cons => Element::Cons {
                left: read_short(chunk, CONS_LEFT),
                right: read_short(chunk, CONS_RIGHT),
            },
            Tag::Error => {
                let ptr = read_u64(chunk, PTR) as *const Location<'static>;
                // SAFETY: the location was 'static when stored.
                Element::Error(unsafe { &*ptr })
            }
            Tag::Func => Element::Func {
                id: Func::try_from(read_u16(chunk, FUNC_ID)).expect("stored func id"),
                env: read_short(chunk, FUNC_ENV),
                state: read_short(chunk, FUNC_STATE),
            },
            Tag::FuncCount => Element::FuncCount {
                id: FuncCount::try_from(read_u16(chunk, FUNC_ID)).expect("stored func id"),
                env: read_short(chunk, FUNC_ENV),
                state: read_short(chunk, FUNC_STATE),
                counter: read_u32(chunk, FUNC_COUNTER),
            },
            Tag::FuncExt => Element::FuncExt {
                id: FuncExt::try_from(chunk[EXT_ID]).expect("stored func id"),
                env: read_short(chunk, EXT_ENV),
            },
        }
    }

    pub(crate) fn closure(&self, r: Ref) -> Option<Closure> {
        match self.fetch(r) {
            Element::Func { id, env, state } => {
                Some(Closure { kind: ClosureKind::Bin(id), env, state })
            }
            Element::FuncCount { id, env, state, counter } => {
                Some(Closure { kind: ClosureKind::Fixed { id, counter }, env, state })
            }
            Element::FuncExt { id, env } => {
                Some(Closure { kind: ClosureKind::Ext(id), env, state: NULL })
            }
            _ => None,
        }
    }

    /// The hash context of an extended closure, if it has started.
    pub(crate) fn hash_state(&self, r: Ref) -> Option<&Sha256> {
        match self.fetch(r) {
            Element::FuncExt { .. } => {
                let ptr = read_u64(self.alloc.chunk(r), PTR) as *const Sha256;
                // SAFETY: produced by Box::into_raw in create_func_ext
                // and freed only with the chunk.
                unsafe { ptr.as_ref() }
            }
            _ => None,
        }
    }

    pub fn atom_bytes(&self, r: Ref) -> Option<&[u8]> {
        if r.is_null() {
            return None;
        }
        self.fetch(r).atom()
    }

    /// Decodes `r` as a canonical small integer.
    pub fn small_int(&self, r: Ref) -> Option<i64> {
        self.atom_bytes(r).and_then(num::decode)
    }

    /// Any empty atom is nil.
    pub fn is_nil(&self, r: Ref) -> bool {
        self.atom_bytes(r).is_some_and(|b| b.is_empty())
    }

    pub fn is_error(&self, r: Ref) -> bool {
        !r.is_null() && matches!(self.fetch(r), Element::Error(_))
    }

    /// Typed extraction for hosts: the atom payload of a result.
    pub fn expect_atom(&self, r: Ref) -> Result<&[u8], ValueError> {
        if r.is_null() {
            return Err(ValueError::Null);
        }
        match self.fetch(r) {
            Element::Error(_) => Err(ValueError::ErrorValue),
            el => el.atom().ok_or(ValueError::NotAnAtom),
        }
    }

    /// Typed extraction for hosts: the integer value of a result.
    pub fn expect_int(&self, r: Ref) -> Result<i64, ValueError> {
        let bytes = self.expect_atom(r)?;
        num::decode(bytes).ok_or(ValueError::NotAnInt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::Digest;

    #[test]
    fn interned_atoms() {
        let mut store = Store::new();
        assert_eq!(store.chunks_in_use(), 2);
        assert_eq!(store.atom_bytes(store.nil()), Some(&[][..]));
        assert_eq!(store.atom_bytes(store.one()), Some(&[0x01][..]));
        assert!(store.is_nil(store.nil()));
        assert!(!store.is_nil(store.one()));

        // creating the interned payloads allocates nothing
        let nil = store.create_atom(&[]);
        let one = store.create_atom(&[0x01]);
        assert_eq!(nil, store.nil());
        assert_eq!(one, store.one());
        assert_eq!(store.chunks_in_use(), 2);

        // sharing and releasing them is free
        let nil2 = store.bumpref(nil);
        store.deref(nil2);
        store.deref(nil);
        assert_eq!(store.chunks_in_use(), 2);
    }

    #[test]
    fn atom_size_classes() {
        let mut store = Store::new();
        let base = store.chunks_in_use();

        let small = store.create_atom(&[7u8; 11]);
        assert!(matches!(store.fetch(small), Element::InplaceAtom(b) if b == [7u8; 11]));
        assert_eq!(store.chunks_in_use(), base + 1);

        let medium = store.create_atom(&[8u8; 12]);
        assert_eq!(store.chunks_in_use(), base + 1 + 2);

        let large = store.create_atom(&[9u8; 123]);
        assert_eq!(store.chunks_in_use(), base + 1 + 2 + 8);

        let owned = store.create_atom(&[10u8; 124]);
        assert!(matches!(store.fetch(owned), Element::OwnedAtom(b) if b.len() == 124));
        assert_eq!(store.chunks_in_use(), base + 1 + 2 + 8 + 1);

        for r in [small, medium, large, owned] {
            store.deref(r);
        }
        assert_eq!(store.chunks_in_use(), base);
    }

    #[test]
    fn int_round_trip() {
        let mut store = Store::new();
        for n in [0i64, 1, -1, 127, 128, -128, 300, i64::MAX, -i64::MAX] {
            let r = store.create_int(n);
            assert_eq!(store.small_int(r), Some(n), "{n}");
            store.deref(r);
        }
        let zero = store.create_int(0);
        assert_eq!(zero, store.nil());
    }

    #[test]
    fn ext_atom_payload_stays_external() {
        static PAYLOAD: [u8; 5] = *b"hello";
        let mut store = Store::new();
        let base = store.chunks_in_use();
        let r = store.create_ext_atom(&PAYLOAD);
        assert!(matches!(store.fetch(r), Element::ExtAtom(b) if b == b"hello"));
        assert_eq!(store.chunks_in_use(), base + 1);
        store.deref(r);
        assert_eq!(store.chunks_in_use(), base);
    }

    #[test]
    fn cons_drop_releases_children() {
        let mut store = Store::new();
        let base = store.chunks_in_use();
        let a = store.create_int(13);
        let b = store.create_int(17);
        let pair = store.create_cons(a, b);
        assert_eq!(store.chunks_in_use(), base + 3);
        store.deref(pair);
        assert_eq!(store.chunks_in_use(), base);
    }

    #[test]
    fn shared_child_survives_one_parent() {
        let mut store = Store::new();
        let base = store.chunks_in_use();
        let shared = store.create_int(42);
        let shared2 = store.bumpref(shared);
        let nil = store.nil();
        let p1 = store.create_cons(shared, nil);
        let p2 = store.create_cons(shared2, nil);
        assert_eq!(store.chunks_in_use(), base + 3);

        store.deref(p1);
        // shared atom still reachable through p2
        assert_eq!(store.chunks_in_use(), base + 2);
        let Element::Cons { left, .. } = store.fetch(p2) else {
            panic!("expected cons")
        };
        assert_eq!(store.small_int(left), Some(42));

        store.deref(p2);
        assert_eq!(store.chunks_in_use(), base);
    }

    #[test]
    fn diamond_sharing_drops_once() {
        let mut store = Store::new();
        let base = store.chunks_in_use();
        let x = store.create_int(7);
        let x2 = store.bumpref(x);
        let inner = store.create_cons(x, x2);
        let inner2 = store.bumpref(inner);
        let outer = store.create_cons(inner, inner2);
        store.deref(outer);
        assert_eq!(store.chunks_in_use(), base);
    }

    #[test]
    fn func_drop_releases_env_and_state() {
        let mut store = Store::new();
        let base = store.chunks_in_use();
        let env = store.create_int(99);
        let state = store.create_int(100);
        let f = store.create_func(Func::Add, env, state);
        assert_eq!(store.chunks_in_use(), base + 3);
        store.deref(f);
        assert_eq!(store.chunks_in_use(), base);
    }

    #[test]
    fn func_ext_drop_releases_context() {
        let mut store = Store::new();
        let base = store.chunks_in_use();
        let nil = store.nil();
        let ctx = Box::new(Sha256::new());
        let f = store.create_func_ext(FuncExt::Sha256, nil, Some(ctx));
        assert!(store.hash_state(f).is_some());
        store.deref(f);
        assert_eq!(store.chunks_in_use(), base);
    }

    #[test]
    fn long_chain_drop_is_iterative() {
        let mut store = Store::new();
        let base = store.chunks_in_use();
        let mut list = store.nil();
        for i in 0..100_000i64 {
            let item = store.create_int(i);
            list = store.create_cons(item, list);
        }
        store.deref(list);
        assert_eq!(store.chunks_in_use(), base);
    }

    #[test]
    fn bushy_tree_drop_is_iterative() {
        // both children dying at every level exercises the in-place
        // cons rewrite and the carry chain
        let mut store = Store::new();
        let base = store.chunks_in_use();
        let mut layer: Vec<Ref> = (0..1024).map(|i| store.create_int(i)).collect();
        while layer.len() > 1 {
            layer = layer
                .chunks(2)
                .map(|pair| store.create_cons(pair[0], pair[1]))
                .collect();
        }
        store.deref(layer[0]);
        assert_eq!(store.chunks_in_use(), base);
    }

    #[test]
    fn error_carries_origin() {
        let mut store = Store::new();
        let e = store.error_here();
        assert!(store.is_error(e));
        let Element::Error(origin) = store.fetch(e) else {
            panic!("expected error")
        };
        assert!(origin.file().ends_with("store.rs"));
        store.deref(e);
    }

    #[test]
    fn typed_extraction() {
        let mut store = Store::new();
        let n = store.create_int(1234);
        assert_eq!(store.expect_int(n), Ok(1234));
        let s = store.create_atom(b"raw bytes here");
        assert_eq!(store.expect_atom(s), Ok(&b"raw bytes here"[..]));
        assert_eq!(store.expect_int(s), Err(ValueError::NotAnInt));
        let nil = store.nil();
        let pair = store.create_cons(n, nil);
        assert_eq!(store.expect_atom(pair), Err(ValueError::NotAnAtom));
        let e = store.error_here();
        assert_eq!(store.expect_int(e), Err(ValueError::ErrorValue));
        assert_eq!(store.expect_int(NULL), Err(ValueError::Null));
        store.deref(pair);
        store.deref(e);
        store.deref(s);
    }
}
