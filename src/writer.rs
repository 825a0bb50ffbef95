//! Debug rendering of values, for hosts and test oracles.

use std::io;

use crate::buddy::Ref;
use crate::num;
use crate::store::{Element, Store};

/// Renders a value. Atoms print as `nil`, a decimal integer, a quoted
/// string (printable, at least five bytes) or hex, in that order of
/// preference; pairs print as lists with a dotted-pair fallback.
pub trait Write {
    fn fmt<W: io::Write>(&self, store: &Store, w: &mut W) -> io::Result<()>;

    fn fmt_to_string(&self, store: &Store) -> String {
        let mut out = Vec::new();
        self.fmt(store, &mut out).expect("writing to a Vec cannot fail");
        String::from_utf8(out).expect("rendered output is utf-8")
    }
}

impl Write for Ref {
    fn fmt<W: io::Write>(&self, store: &Store, w: &mut W) -> io::Result<()> {
        if self.is_null() {
            return write!(w, "<null>");
        }
        match store.fetch(*self) {
            Element::NoRefAtom(b)
            | Element::InplaceAtom(b)
            | Element::OwnedAtom(b)
            | Element::ExtAtom(b) => write_atom(b, w),
            Element::Cons { left, right } => {
                write!(w, "(")?;
                left.fmt(store, w)?;
                write_tail(store, right, w)
            }
            Element::Error(origin) => write!(w, "ERROR({}:{})", origin.file(), origin.line()),
            Element::Func { id, .. } => write!(w, "FUNC({id})"),
            Element::FuncCount { id, counter, .. } => write!(w, "FUNCC({id}, {counter})"),
            Element::FuncExt { id, .. } => write!(w, "FUNCEXT({id})"),
        }
    }
}

fn write_atom<W: io::Write>(bytes: &[u8], w: &mut W) -> io::Result<()> {
    if bytes.is_empty() {
        return write!(w, "nil");
    }
    if let Some(n) = num::decode(bytes) {
        return write!(w, "{n}");
    }
    if bytes.len() >= 5 && bytes.iter().all(|b| (0x20..0x7f).contains(b)) {
        let text = std::str::from_utf8(bytes).unwrap_or("");
        return write!(w, "\"{text}\"");
    }
    write!(w, "0x")?;
    for b in bytes {
        write!(w, "{b:02x}")?;
    }
    Ok(())
}

fn write_tail<W: io::Write>(store: &Store, mut r: Ref, w: &mut W) -> io::Result<()> {
    loop {
        match store.fetch(r) {
            Element::Cons { left, right } => {
                write!(w, " ")?;
                left.fmt(store, w)?;
                r = right;
            }
            el if el.is_nil() => return write!(w, ")"),
            _ => {
                write!(w, " . ")?;
                r.fmt(store, w)?;
                return write!(w, ")");
            }
        }
    }
}
