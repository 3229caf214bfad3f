// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

//! The per-transaction call stack of currently open segment ids.
//!
//! The stack assigns parent ids to newly started segments. Push/pop pairs
//! are LIFO within one execution context, but execution contexts diverge
//! when work hops threads: each context gets its own stack view keyed by the
//! context's id, while all contexts keep appending to the same transaction's
//! segment list. After [`attach_to_async`](CallStackManager::attach_to_async)
//! a context that has never touched the transaction inherits the
//! attach-point's current segment as its parent, so continuations parent
//! correctly instead of producing orphaned roots.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::context::current_context_id;
use crate::segment::SegmentId;

pub(crate) struct CallStackManager {
    stacks: Mutex<Stacks>,
}

struct Stacks {
    by_context: HashMap<u64, Vec<SegmentId>>,
    // Parent seeded into contexts that first touch the transaction after an
    // async attach.
    async_seed: Option<Seed>,
}

#[derive(Clone, Copy)]
struct Seed {
    parent: Option<SegmentId>,
}

impl CallStackManager {
    pub fn new() -> Self {
        CallStackManager {
            stacks: Mutex::new(Stacks {
                by_context: HashMap::new(),
                async_seed: None,
            }),
        }
    }

    /// Pushes a freshly assigned segment id onto the current context's
    /// stack.
    pub fn push(&self, id: SegmentId) {
        let context = current_context_id();
        let mut stacks = self.stacks.lock();
        let seed = stacks.async_seed;
        stacks
            .by_context
            .entry(context)
            .or_insert_with(|| seed_stack(seed))
            .push(id);
    }

    /// Pops `id` off the current context's stack if it is on top. A mismatch
    /// means the segment was ended from a context that never pushed it (an
    /// async detach); that is tolerated and leaves the stack untouched.
    pub fn try_pop(&self, id: SegmentId) {
        let context = current_context_id();
        let mut stacks = self.stacks.lock();
        if let Some(stack) = stacks.by_context.get_mut(&context) {
            if stack.last() == Some(&id) {
                stack.pop();
            }
        }
    }

    /// The segment id a new segment should adopt as its parent, from the
    /// current context's point of view.
    pub fn try_peek(&self) -> Option<SegmentId> {
        let context = current_context_id();
        let stacks = self.stacks.lock();
        match stacks.by_context.get(&context) {
            Some(stack) => stack.last().copied(),
            None => stacks.async_seed.and_then(|seed| seed.parent),
        }
    }

    /// Marks the transaction as continuing asynchronously. The current
    /// context's deepest open segment becomes the inherited parent for every
    /// context that first touches the transaction from now on.
    pub fn attach_to_async(&self) {
        let context = current_context_id();
        let mut stacks = self.stacks.lock();
        let parent = stacks
            .by_context
            .get(&context)
            .and_then(|stack| stack.last().copied());
        stacks.async_seed = Some(Seed { parent });
    }

    /// Stops seeding new contexts. Contexts that already hold a stack keep
    /// it; fresh contexts start parentless again.
    pub fn detach(&self) {
        self.stacks.lock().async_seed = None;
    }

    pub fn is_attached_to_async(&self) -> bool {
        self.stacks.lock().async_seed.is_some()
    }
}

fn seed_stack(seed: Option<Seed>) -> Vec<SegmentId> {
    match seed.and_then(|seed| seed.parent) {
        Some(parent) => vec![parent],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_peek_pop_is_lifo() {
        let manager = CallStackManager::new();
        assert_eq!(manager.try_peek(), None);

        manager.push(SegmentId(0));
        manager.push(SegmentId(1));
        assert_eq!(manager.try_peek(), Some(SegmentId(1)));

        manager.try_pop(SegmentId(1));
        assert_eq!(manager.try_peek(), Some(SegmentId(0)));
        manager.try_pop(SegmentId(0));
        assert_eq!(manager.try_peek(), None);
    }

    #[test]
    fn mismatched_pop_is_tolerated() {
        let manager = CallStackManager::new();
        manager.push(SegmentId(0));
        manager.push(SegmentId(1));

        // Popping out of order leaves the stack untouched.
        manager.try_pop(SegmentId(0));
        assert_eq!(manager.try_peek(), Some(SegmentId(1)));
    }

    #[test]
    fn contexts_have_independent_stacks() {
        let manager = CallStackManager::new();
        manager.push(SegmentId(0));

        std::thread::scope(|scope| {
            scope.spawn(|| {
                // Without an async attach this thread sees an empty stack.
                assert_eq!(manager.try_peek(), None);
                manager.push(SegmentId(1));
                assert_eq!(manager.try_peek(), Some(SegmentId(1)));
                manager.try_pop(SegmentId(1));
            });
        });

        assert_eq!(manager.try_peek(), Some(SegmentId(0)));
    }

    #[test]
    fn async_attach_seeds_new_contexts() {
        let manager = CallStackManager::new();
        manager.push(SegmentId(0));
        manager.attach_to_async();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                assert_eq!(manager.try_peek(), Some(SegmentId(0)));
                manager.push(SegmentId(1));
                assert_eq!(manager.try_peek(), Some(SegmentId(1)));
                manager.try_pop(SegmentId(1));
                assert_eq!(manager.try_peek(), Some(SegmentId(0)));
            });
        });

        // The primary context's stack is not corrupted by the async branch.
        assert_eq!(manager.try_peek(), Some(SegmentId(0)));
    }

    #[test]
    fn detach_stops_seeding() {
        let manager = CallStackManager::new();
        manager.push(SegmentId(0));
        manager.attach_to_async();
        manager.detach();
        assert!(!manager.is_attached_to_async());

        std::thread::scope(|scope| {
            scope.spawn(|| {
                assert_eq!(manager.try_peek(), None);
            });
        });
    }
}
