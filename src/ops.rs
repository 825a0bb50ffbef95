//! Operator bodies behind the three closure schemas.
//!
//! Binary reducers fold evaluated arguments into the closure's state
//! one at a time via [`reduce`] and produce the result via [`finish`].
//! Fixed-arity operators collect up to [`MAX_ARITY`] evaluated
//! arguments and finish in one shot via [`fixop`]. The extended-state
//! SHA256 operator is driven directly by the evaluator, since its
//! working state is a native hash context rather than a value.

use crate::buddy::Ref;
use crate::func::{Func, FuncCount};
use crate::store::{Element, Store};

/// Outcome of feeding one evaluated argument to a binary reducer.
pub(crate) enum Reduce {
    /// The argument was idempotent for the current state; the closure
    /// is reused unchanged.
    Retain,
    /// A replacement closure should carry this new state.
    Advance(Ref),
    /// Reduction failed; the error becomes the feedback.
    Fail(Ref),
}

/// Outcome of finalising a fixed-arity operator.
pub(crate) enum Finalise {
    Value(Ref),
    /// Re-enter the meta-evaluator (APPLY).
    Eval { expr: Ref, env: Ref },
}

/// Widest fixed-arity argument tuple.
pub(crate) const MAX_ARITY: usize = 3;

/// (minimum, maximum) argument counts for a fixed-arity operator.
pub(crate) const fn arity(id: FuncCount) -> (usize, usize) {
    match id {
        FuncCount::Apply => (1, 2),
        FuncCount::If => (1, 3),
        FuncCount::Head | FuncCount::Tail | FuncCount::List => (1, 1),
        FuncCount::SubStr => (1, 3),
    }
}

/// Folds one evaluated argument into a binary reducer's state.
/// `state` is a view owned by the current closure; `arg` is owned by
/// the caller and is consumed on every path.
pub(crate) fn reduce(store: &mut Store, id: Func, state: Ref, arg: Ref) -> Reduce {
    match id {
        // dispatched by the evaluator before reaching here
        Func::BllEval | Func::Quote => {
            store.deref(arg);
            Reduce::Fail(store.error_here())
        }
        // no settled reduction contract
        Func::Partial | Func::X => {
            store.deref(arg);
            Reduce::Fail(store.error_here())
        }
        Func::Rc => {
            if state.is_null() {
                Reduce::Advance(arg)
            } else {
                let prev = store.bumpref(state);
                Reduce::Advance(store.create_cons(arg, prev))
            }
        }
        Func::NotAll => {
            let hit = state.is_null() && store.is_nil(arg);
            store.deref(arg);
            if hit {
                Reduce::Advance(store.one())
            } else {
                Reduce::Retain
            }
        }
        Func::All => {
            let hit = state.is_null() && store.is_nil(arg);
            store.deref(arg);
            if hit {
                Reduce::Advance(store.nil())
            } else {
                Reduce::Retain
            }
        }
        Func::Any => {
            let hit = state.is_null() && !store.is_nil(arg);
            store.deref(arg);
            if hit {
                Reduce::Advance(store.one())
            } else {
                Reduce::Retain
            }
        }
        Func::LtStr => reduce_lt_str(store, state, arg),
        Func::StrLen => reduce_str_len(store, state, arg),
        Func::Cat => reduce_cat(store, state, arg),
        Func::Add => reduce_add(store, state, arg),
    }
}

/// Produces a binary reducer's result from its final state. A `NULL`
/// state means no argument ever advanced it.
pub(crate) fn finish(store: &mut Store, id: Func, state: Ref) -> Ref {
    match id {
        Func::BllEval | Func::Quote => store.error_here(),
        Func::Partial | Func::X => store.error_here(),
        Func::Rc | Func::NotAll | Func::Any | Func::StrLen | Func::Cat | Func::Add => {
            if state.is_null() {
                store.nil()
            } else {
                store.bumpref(state)
            }
        }
        Func::All => {
            if state.is_null() {
                store.one()
            } else {
                store.bumpref(state)
            }
        }
        Func::LtStr => {
            // an atom state means the chain never broke
            let ascending = state.is_null() || store.atom_bytes(state).is_some();
            store.create_bool(ascending)
        }
    }
}

fn strictly_ascending(prev: &[u8], next: &[u8]) -> bool {
    let n = prev.len().min(next.len());
    match prev[..n].cmp(&next[..n]) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => prev.len() < next.len(),
    }
}

// state: NULL before the first argument; then the last atom seen, or a
// cons marker once the ordering has failed (sticky).
fn reduce_lt_str(store: &mut Store, state: Ref, arg: Ref) -> Reduce {
    if store.atom_bytes(arg).is_none() {
        store.deref(arg);
        return Reduce::Fail(store.error_here());
    }
    if state.is_null() {
        return Reduce::Advance(arg);
    }
    if store.atom_bytes(state).is_none() {
        store.deref(arg);
        return Reduce::Retain;
    }
    let ascending = {
        let prev = store.atom_bytes(state).unwrap_or(&[]);
        let next = store.atom_bytes(arg).unwrap_or(&[]);
        strictly_ascending(prev, next)
    };
    if ascending {
        Reduce::Advance(arg)
    } else {
        store.deref(arg);
        let left = store.nil();
        let right = store.nil();
        Reduce::Advance(store.create_cons(left, right))
    }
}

fn reduce_str_len(store: &mut Store, state: Ref, arg: Ref) -> Reduce {
    let Some(grow) = store.atom_bytes(arg).map(|b| b.len() as i64) else {
        store.deref(arg);
        return Reduce::Fail(store.error_here());
    };
    store.deref(arg);
    if grow == 0 {
        // empty bytes leave the running total untouched
        return Reduce::Retain;
    }
    let total = if state.is_null() { Some(0) } else { store.small_int(state) };
    let Some(total) = total else {
        return Reduce::Fail(store.error_here());
    };
    match total.checked_add(grow) {
        Some(sum) => Reduce::Advance(store.create_int(sum)),
        None => Reduce::Fail(store.error_here()),
    }
}

fn reduce_cat(store: &mut Store, state: Ref, arg: Ref) -> Reduce {
    if store.atom_bytes(arg).is_none() {
        store.deref(arg);
        return Reduce::Fail(store.error_here());
    }
    if !state.is_null() && store.atom_bytes(state).is_none() {
        store.deref(arg);
        return Reduce::Fail(store.error_here());
    }
    if store.atom_bytes(arg).is_some_and(|b| b.is_empty()) {
        // appending nothing: reuse the closure
        store.deref(arg);
        return Reduce::Retain;
    }
    if state.is_null() || store.atom_bytes(state).is_some_and(|b| b.is_empty()) {
        return Reduce::Advance(arg);
    }
    let joined = {
        let prev = store.atom_bytes(state).unwrap_or(&[]);
        let next = store.atom_bytes(arg).unwrap_or(&[]);
        [prev, next].concat()
    };
    store.deref(arg);
    Reduce::Advance(store.create_atom(&joined))
}

fn reduce_add(store: &mut Store, state: Ref, arg: Ref) -> Reduce {
    let Some(n) = store.small_int(arg) else {
        store.deref(arg);
        return Reduce::Fail(store.error_here());
    };
    store.deref(arg);
    if n == 0 {
        // adding zero: reuse the closure
        return Reduce::Retain;
    }
    let total = if state.is_null() { Some(0) } else { store.small_int(state) };
    let Some(total) = total else {
        return Reduce::Fail(store.error_here());
    };
    // i64::MIN has no canonical encoding, so reaching it is overflow
    match total.checked_add(n) {
        Some(sum) if sum != i64::MIN => Reduce::Advance(store.create_int(sum)),
        _ => Reduce::Fail(store.error_here()),
    }
}

/// Finalises a fixed-arity operator. `args` holds views of the
/// evaluated arguments in evaluation order, `NULL`-padded; the
/// operator bumps whatever it keeps.
pub(crate) fn fixop(
    store: &mut Store,
    id: FuncCount,
    args: [Ref; MAX_ARITY],
    closure_env: Ref,
) -> Finalise {
    match id {
        FuncCount::Apply => {
            let expr = store.bumpref(args[0]);
            let env = if args[1].is_null() {
                store.bumpref(closure_env)
            } else {
                store.bumpref(args[1])
            };
            Finalise::Eval { expr, env }
        }
        FuncCount::If => {
            let [cond, yes, no] = args;
            let v = if store.is_nil(cond) {
                if no.is_null() {
                    store.nil()
                } else {
                    store.bumpref(no)
                }
            } else if yes.is_null() {
                store.one()
            } else {
                store.bumpref(yes)
            };
            Finalise::Value(v)
        }
        FuncCount::Head | FuncCount::Tail => {
            let pair = match store.fetch(args[0]) {
                Element::Cons { left, right } => Some((left, right)),
                _ => None,
            };
            Finalise::Value(match pair {
                Some((left, right)) => {
                    let pick = if matches!(id, FuncCount::Head) { left } else { right };
                    store.bumpref(pick)
                }
                None => store.error_here(),
            })
        }
        FuncCount::List => {
            let is_pair = store.fetch(args[0]).is_cons();
            Finalise::Value(store.create_bool(is_pair))
        }
        FuncCount::SubStr => Finalise::Value(substr(store, args)),
    }
}

// [first, last) byte window, clamped to the atom; index positions
// holding non-integer atoms default to len / 0 respectively.
fn substr(store: &mut Store, args: [Ref; MAX_ARITY]) -> Ref {
    let [src, first, last] = args;
    let Some(len) = store.atom_bytes(src).map(<[u8]>::len) else {
        return store.error_here();
    };
    if !first.is_null() && store.atom_bytes(first).is_none() {
        return store.error_here();
    }
    if !last.is_null() && store.atom_bytes(last).is_none() {
        return store.error_here();
    }
    let size = len as i64;
    let lo = if first.is_null() { 0 } else { store.small_int(first).unwrap_or(size) };
    let hi = if last.is_null() { size } else { store.small_int(last).unwrap_or(0) };
    if lo >= hi || lo >= size || hi <= 0 {
        return store.nil();
    }
    let lo = lo.max(0) as usize;
    let hi = hi.min(size) as usize;
    if lo == 0 && hi == len {
        return store.bumpref(src);
    }
    let window = store.atom_bytes(src).map(|b| b[lo..hi].to_vec()).unwrap_or_default();
    store.create_atom(&window)
}
