//! A deterministic, embeddable Lisp-family expression engine.
//!
//! Programs are symbolic expressions over atoms (byte strings,
//! interpreted as little-endian signed integers when short), pairs,
//! errors and partially-applied operator closures. A [`Program`]
//! reduces such an expression against an environment one step at a
//! time, through a continuation stack and a single feedback register,
//! so hosts can interleave work or impose step budgets.
//!
//! All values live in a [`Store`]: a buddy allocator handing out
//! 16/32/64/128-byte chunks whose only metadata is one in-band tag
//! byte, with reference-counted sharing and an iterative, stack-free
//! drop for arbitrarily deep structures.
//!
//! ```
//! use bll::writer::Write;
//!
//! let mut store = bll::Store::new();
//! // (QUOTE 1 2 3)
//! let quote = store.create_int(0);
//! let args = {
//!     let items = (1..=3).map(|n| store.create_int(n)).collect();
//!     store.create_list(items)
//! };
//! let expr = store.create_cons(quote, args);
//! let env = store.nil();
//!
//! let mut program = bll::Program::new(&mut store, expr, env);
//! program.run();
//! let result = program.inspect_feedback();
//! assert_eq!(result.fmt_to_string(program.store()), "(1 2 3)");
//! ```

pub mod buddy;
pub mod error;
pub mod eval;
pub mod func;
pub mod num;
mod ops;
pub mod store;
pub mod tag;
pub mod writer;

pub use buddy::{Ref, NULL};
pub use error::ValueError;
pub use eval::{Continuation, Program};
pub use store::{Element, Store};
