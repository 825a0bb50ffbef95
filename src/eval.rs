//! The step-driven continuation machine.
//!
//! A [`Program`] holds a stack of continuations and a single feedback
//! slot. Each [`Program::step`] pops one continuation and lets its
//! closure either delegate (push sub-continuations), advance (push a
//! replacement closure carrying updated state) or finalise (write the
//! feedback). An error value in the feedback slot is terminal: the
//! next step flushes the whole stack and leaves the error as the
//! result.

use tracing::trace;

use crate::buddy::{Ref, NULL};
use crate::func::{lookup_opcode, Func, FuncCount, FuncExt, FuncId};
use crate::num;
use crate::ops;
use crate::store::{ClosureKind, Element, Store};

/// One pending piece of work: a closure and its remaining arguments.
pub struct Continuation {
    pub(crate) func: Ref,
    pub(crate) args: Ref,
}

impl Continuation {
    /// The closure driving this continuation.
    pub fn func(&self) -> Ref {
        self.func
    }

    /// The unprocessed argument list.
    pub fn args(&self) -> Ref {
        self.args
    }
}

/// A running evaluation. Single-threaded and synchronous; `step()` is
/// the only suspension point, so hosts interleave their own work or
/// impose budgets between steps.
pub struct Program<'s> {
    store: &'s mut Store,
    conts: Vec<Continuation>,
    feedback: Ref,
}

impl<'s> Program<'s> {
    /// Starts evaluating `sexpr` against `env`. Takes ownership of
    /// both references.
    pub fn new(store: &'s mut Store, sexpr: Ref, env: Ref) -> Self {
        assert!(!sexpr.is_null() && !env.is_null());
        let mut program = Program { store, conts: Vec::with_capacity(1024), feedback: NULL };
        program.eval_sexpr(sexpr, env);
        program
    }

    /// Pushes a fresh meta-evaluation of `sexpr` against `env`.
    fn eval_sexpr(&mut self, sexpr: Ref, env: Ref) {
        let func = self.store.create_func(Func::BllEval, env, NULL);
        self.push(func, sexpr);
    }

    pub fn finished(&self) -> bool {
        self.conts.is_empty()
    }

    /// The current feedback value, `NULL` while the next continuation
    /// has not yet received a sub-result. The program keeps ownership.
    pub fn inspect_feedback(&self) -> Ref {
        self.feedback
    }

    /// The pending continuation stack, bottom first.
    pub fn continuations(&self) -> &[Continuation] {
        &self.conts
    }

    pub fn store(&self) -> &Store {
        self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        self.store
    }

    /// Steps until the continuation stack drains. The host owns any
    /// step budget: call [`Program::step`] in a loop to enforce one.
    pub fn run(&mut self) {
        while !self.finished() {
            self.step();
        }
    }

    fn push(&mut self, func: Ref, args: Ref) {
        self.conts.push(Continuation { func, args });
    }

    pub(crate) fn fin_value(&mut self, v: Ref) {
        debug_assert!(self.feedback.is_null(), "feedback slot already occupied");
        self.feedback = v;
    }

    #[track_caller]
    fn error(&mut self) {
        let e = self.store.error_here();
        self.fin_value(e);
    }

    /// Performs one step of the machine.
    pub fn step(&mut self) {
        if self.conts.is_empty() {
            return;
        }
        let feedback = std::mem::replace(&mut self.feedback, NULL);
        if self.store.is_error(feedback) {
            // terminal: flush every pending continuation
            while let Some(c) = self.conts.pop() {
                self.store.deref(c.func);
                self.store.deref(c.args);
            }
            self.fin_value(feedback);
            return;
        }
        let Some(Continuation { func, args }) = self.conts.pop() else {
            return;
        };
        match self.store.closure(func) {
            Some(c) => {
                trace!(depth = self.conts.len(), kind = ?c.kind, "step");
                match c.kind {
                    ClosureKind::Bin(id) => {
                        self.func_step(id, func, c.env, c.state, feedback, args)
                    }
                    ClosureKind::Fixed { id, counter } => {
                        self.fixed_step(id, func, c.env, c.state, counter, feedback, args)
                    }
                    ClosureKind::Ext(id) => self.ext_step(id, func, c.env, feedback, args),
                }
            }
            None => {
                // a continuation must hold a closure
                self.store.deref(feedback);
                self.store.deref(args);
                self.error();
            }
        }
        self.store.deref(func);
    }

    /// The shared argument-consumption step: schedules evaluation of
    /// the next argument (re-pushing the current closure to resume
    /// after it), or reports the list exhausted by returning `false`,
    /// in which case the caller finalises. Consumes `args` on every
    /// path.
    fn eval_args_step(&mut self, func: Ref, env: Ref, args: Ref) -> bool {
        enum Shape {
            Pair(Ref, Ref),
            Exhausted,
            Bad,
        }
        let shape = match self.store.fetch(args) {
            Element::Cons { left, right } => Shape::Pair(left, right),
            el if el.is_nil() => Shape::Exhausted,
            _ => Shape::Bad,
        };
        match shape {
            Shape::Pair(left, right) => {
                let resume = self.store.bumpref(func);
                let tail = self.store.bumpref(right);
                self.push(resume, tail);
                let head = self.store.bumpref(left);
                let env2 = self.store.bumpref(env);
                self.eval_sexpr(head, env2);
                self.store.deref(args);
                true
            }
            Shape::Exhausted => {
                self.store.deref(args);
                false
            }
            Shape::Bad => {
                self.store.deref(args);
                self.error();
                true
            }
        }
    }

    /// The meta-evaluator: interprets `args` as an expression.
    fn blleval_step(&mut self, env: Ref, feedback: Ref, args: Ref) {
        if !feedback.is_null() {
            // BLLEVAL never delegates; feedback here is an internal
            // fault
            self.store.deref(feedback);
            self.store.deref(args);
            return self.error();
        }
        enum Shape {
            Int(Option<i64>),
            Pair(Ref, Ref),
            Bad,
        }
        let shape = match self.store.fetch(args) {
            el if el.atom().is_some() => Shape::Int(el.atom().and_then(num::decode)),
            Element::Cons { left, right } => Shape::Pair(left, right),
            _ => Shape::Bad,
        };
        match shape {
            Shape::Int(Some(0)) => {
                self.store.deref(args);
                let nil = self.store.nil();
                self.fin_value(nil);
            }
            Shape::Int(Some(n)) if n > 0 => match self.env_index(env, n) {
                Some(found) => {
                    let v = self.store.bumpref(found);
                    self.store.deref(args);
                    self.fin_value(v);
                }
                None => {
                    self.store.deref(args);
                    self.error();
                }
            },
            Shape::Int(_) => {
                // negative or not a canonical integer
                self.store.deref(args);
                self.error();
            }
            Shape::Pair(op, tail) => {
                let id = self.store.small_int(op).and_then(lookup_opcode);
                match id {
                    Some(id) => {
                        let env2 = self.store.bumpref(env);
                        let closure = match id {
                            FuncId::Func(f) => self.store.create_func(f, env2, NULL),
                            FuncId::Count(f) => self.store.create_func_count(f, env2, NULL, 0),
                            FuncId::Ext(f) => self.store.create_func_ext(f, env2, None),
                        };
                        let rest = self.store.bumpref(tail);
                        self.push(closure, rest);
                        self.store.deref(args);
                    }
                    None => {
                        self.store.deref(args);
                        self.error();
                    }
                }
            }
            Shape::Bad => {
                self.store.deref(args);
                self.error();
            }
        }
    }

    /// Walks `env` by the bits of `n` below its most significant bit,
    /// highest first: 0 selects left, 1 selects right. `n == 1`
    /// denotes the whole environment.
    fn env_index(&self, env: Ref, n: i64) -> Option<Ref> {
        debug_assert!(n > 0);
        let mut cur = env;
        let msb = 63 - n.leading_zeros();
        for i in (0..msb).rev() {
            let Element::Cons { left, right } = self.store.fetch(cur) else {
                return None;
            };
            cur = if (n >> i) & 1 == 0 { left } else { right };
        }
        Some(cur)
    }

    fn func_step(&mut self, id: Func, func: Ref, env: Ref, state: Ref, feedback: Ref, args: Ref) {
        match id {
            Func::BllEval => self.blleval_step(env, feedback, args),
            Func::Quote => {
                if !feedback.is_null() {
                    self.store.deref(feedback);
                    self.store.deref(args);
                    return self.error();
                }
                // the whole argument list, unevaluated
                self.fin_value(args);
            }
            _ => self.reducer_step(id, func, env, state, feedback, args),
        }
    }

    /// Driver for the binary-reducer schema.
    fn reducer_step(
        &mut self,
        id: Func,
        func: Ref,
        env: Ref,
        state: Ref,
        feedback: Ref,
        args: Ref,
    ) {
        if feedback.is_null() {
            if self.eval_args_step(func, env, args) {
                return;
            }
            let v = ops::finish(self.store, id, state);
            self.fin_value(v);
            return;
        }
        match ops::reduce(self.store, id, state, feedback) {
            ops::Reduce::Retain => {
                // idempotent argument: reuse the closure as is
                let resume = self.store.bumpref(func);
                self.push(resume, args);
            }
            ops::Reduce::Advance(next) => {
                let env2 = self.store.bumpref(env);
                let resume = self.store.create_func(id, env2, next);
                self.push(resume, args);
            }
            ops::Reduce::Fail(e) => {
                self.store.deref(args);
                self.fin_value(e);
            }
        }
    }

    /// Driver for the fixed-arity schema.
    #[allow(clippy::too_many_arguments)]
    fn fixed_step(
        &mut self,
        id: FuncCount,
        func: Ref,
        env: Ref,
        state: Ref,
        counter: u32,
        feedback: Ref,
        args: Ref,
    ) {
        let (min, max) = ops::arity(id);
        if !feedback.is_null() {
            if counter as usize >= max {
                self.store.deref(feedback);
                self.store.deref(args);
                return self.error();
            }
            let next = if counter == 0 {
                feedback
            } else {
                let prev = self.store.bumpref(state);
                self.store.create_cons(feedback, prev)
            };
            let env2 = self.store.bumpref(env);
            let resume = self.store.create_func_count(id, env2, next, counter + 1);
            self.push(resume, args);
            return;
        }
        if self.eval_args_step(func, env, args) {
            return;
        }
        if (counter as usize) < min {
            return self.error();
        }
        let Some(slots) = self.unwind_state(state, counter) else {
            // state/counter mismatch
            return self.error();
        };
        match ops::fixop(self.store, id, slots, env) {
            ops::Finalise::Value(v) => self.fin_value(v),
            ops::Finalise::Eval { expr, env } => self.eval_sexpr(expr, env),
        }
    }

    /// Unwinds the newest-first argument state into evaluation order.
    /// The returned references are views into `state`.
    fn unwind_state(&self, state: Ref, counter: u32) -> Option<[Ref; ops::MAX_ARITY]> {
        let mut slots = [NULL; ops::MAX_ARITY];
        if counter == 0 {
            return Some(slots);
        }
        if state.is_null() {
            return None;
        }
        let mut remaining = counter as usize;
        let mut cur = state;
        while remaining > 0 {
            if remaining == 1 {
                slots[0] = cur;
                break;
            }
            let Element::Cons { left, right } = self.store.fetch(cur) else {
                return None;
            };
            slots[remaining - 1] = left;
            cur = right;
            remaining -= 1;
        }
        Some(slots)
    }

    /// Driver for the extended-state schema (SHA256).
    fn ext_step(&mut self, id: FuncExt, func: Ref, env: Ref, feedback: Ref, args: Ref) {
        if !feedback.is_null() {
            let Some(bytes) = self.store.atom_bytes(feedback).map(<[u8]>::to_vec) else {
                self.store.deref(feedback);
                self.store.deref(args);
                return self.error();
            };
            // duplicate-and-update: the closure may be shared
            let mut ctx = self.store.hash_state(func).cloned().unwrap_or_default();
            sha2::Digest::update(&mut ctx, &bytes);
            self.store.deref(feedback);
            let env2 = self.store.bumpref(env);
            let resume = self.store.create_func_ext(id, env2, Some(Box::new(ctx)));
            self.push(resume, args);
            return;
        }
        if self.eval_args_step(func, env, args) {
            return;
        }
        let ctx = self.store.hash_state(func).cloned().unwrap_or_default();
        let digest = sha2::Digest::finalize(ctx);
        let v = self.store.create_atom(&digest);
        self.fin_value(v);
    }
}

impl Drop for Program<'_> {
    fn drop(&mut self) {
        while let Some(c) = self.conts.pop() {
            self.store.deref(c.func);
            self.store.deref(c.args);
        }
        let feedback = std::mem::replace(&mut self.feedback, NULL);
        self.store.deref(feedback);
    }
}
