//! Sessions: FIFO of command blocks separated by barriers.
//!
//! Commands inside a block may be in flight together. Block `k + 1` is not
//! handed out until every command of block `k` has been released, whatever
//! the outcome of its reply.

use std::collections::{BTreeSet, VecDeque};

use thiserror::Error;

use super::{Command, CommandId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("cannot append a session whose last block is still open")]
    NotClosed,

    #[error("cannot append a session that has already dispatched commands")]
    AlreadyStarted,
}

#[derive(Debug, Clone)]
struct Block {
    commands: Vec<Command>,
    /// Index of the next command to hand out.
    cursor: usize,
    unresolved: BTreeSet<CommandId>,
}

impl Block {
    fn new(commands: Vec<Command>) -> Self {
        let unresolved = commands.iter().map(|c| c.id).collect();
        Block {
            commands,
            cursor: 0,
            unresolved,
        }
    }

    fn is_resolved(&self) -> bool {
        self.unresolved.is_empty()
    }

    fn is_pristine(&self) -> bool {
        self.cursor == 0 && self.unresolved.len() == self.commands.len()
    }
}

/// An ordered queue of command blocks.
#[derive(Debug, Clone, Default)]
pub struct Session {
    blocks: VecDeque<Block>,
    open: Vec<Command>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `cmd` to the open block.
    ///
    /// Returns `false` if the open block already holds a command with the
    /// same token.
    pub fn push(&mut self, cmd: Command) -> bool {
        if self.open.iter().any(|c| c.id == cmd.id) {
            return false;
        }
        self.open.push(cmd);
        true
    }

    /// Close the open block. Returns `false` if it was empty.
    pub fn block(&mut self) -> bool {
        if self.open.is_empty() {
            return false;
        }
        let commands = std::mem::take(&mut self.open);
        self.blocks.push_back(Block::new(commands));
        true
    }

    /// Next command ready for dispatch, if the front block has one left.
    pub fn pop(&mut self) -> Option<Command> {
        loop {
            let front = self.blocks.front_mut()?;
            if front.is_resolved() {
                self.blocks.pop_front();
                continue;
            }
            while front.cursor < front.commands.len() {
                let cmd = &front.commands[front.cursor];
                front.cursor += 1;
                if front.unresolved.contains(&cmd.id) {
                    return Some(cmd.clone());
                }
            }
            return None;
        }
    }

    /// Mark `id` of the front block as resolved.
    ///
    /// Returns `false` if `id` is not an unresolved member of that block.
    pub fn release(&mut self, id: CommandId) -> bool {
        let Some(front) = self.blocks.front_mut() else {
            return false;
        };
        if !front.unresolved.remove(&id) {
            return false;
        }
        if front.is_resolved() {
            self.blocks.pop_front();
        }
        true
    }

    /// `true` once every block has resolved and nothing is left open.
    pub fn finished(&self) -> bool {
        self.blocks.iter().all(Block::is_resolved) && self.open.is_empty()
    }

    /// `true` if the open block is empty.
    pub fn is_closed(&self) -> bool {
        self.open.is_empty()
    }

    /// `true` if nothing has been handed out or released yet.
    pub fn is_pristine(&self) -> bool {
        self.blocks.iter().all(Block::is_pristine)
    }

    /// Commands not yet acknowledged, open block included.
    pub fn len(&self) -> usize {
        self.blocks.iter().map(|b| b.unresolved.len()).sum::<usize>() + self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of closed blocks still queued.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Every queued command, dispatched or not, in block order.
    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.blocks
            .iter()
            .flat_map(|b| b.commands.iter())
            .chain(self.open.iter())
    }

    /// Queue `other`'s blocks after ours.
    ///
    /// `other` must be closed and untouched. Our own open block is closed
    /// first so the barrier between the two survives.
    pub fn append(&mut self, other: Session) -> Result<(), SessionError> {
        if !other.is_closed() {
            return Err(SessionError::NotClosed);
        }
        if !other.is_pristine() {
            return Err(SessionError::AlreadyStarted);
        }
        self.block();
        self.blocks.extend(other.blocks);
        Ok(())
    }
}

impl Extend<Command> for Session {
    fn extend<T: IntoIterator<Item = Command>>(&mut self, iter: T) {
        for cmd in iter {
            self.push(cmd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandIdGen, Operation, Resource, ResourcePath};
    use crate::node::testing::node;
    use proptest::prelude::*;

    fn cmd(gen: &mut CommandIdGen) -> Command {
        Command::new(
            gen.next_id(),
            Operation::Get,
            node(1),
            ResourcePath::new(Resource::RplChildren),
        )
    }

    #[test]
    fn test_barrier_holds_until_block_released() {
        let mut gen = CommandIdGen::new();
        let (c1, c2, c3) = (cmd(&mut gen), cmd(&mut gen), cmd(&mut gen));
        let mut s = Session::new();
        s.push(c1.clone());
        s.push(c2.clone());
        s.block();
        s.push(c3.clone());
        s.block();

        assert_eq!(s.pop().map(|c| c.id), Some(c1.id));
        assert_eq!(s.pop().map(|c| c.id), Some(c2.id));
        assert!(s.pop().is_none());

        assert!(s.release(c1.id));
        assert!(s.pop().is_none());
        assert!(s.release(c2.id));
        assert_eq!(s.pop().map(|c| c.id), Some(c3.id));
        assert!(s.release(c3.id));
        assert!(s.finished());
    }

    #[test]
    fn test_push_rejects_duplicate_in_open_block() {
        let mut gen = CommandIdGen::new();
        let c = cmd(&mut gen);
        let mut s = Session::new();
        assert!(s.push(c.clone()));
        assert!(!s.push(c.clone()));
        s.block();
        // A fresh open block accepts it again.
        assert!(s.push(c));
    }

    #[test]
    fn test_block_on_empty_is_noop() {
        let mut s = Session::new();
        assert!(!s.block());
        assert_eq!(s.block_count(), 0);
        assert!(s.finished());
    }

    #[test]
    fn test_open_block_is_not_dispatched() {
        let mut gen = CommandIdGen::new();
        let mut s = Session::new();
        s.push(cmd(&mut gen));
        assert!(s.pop().is_none());
        assert!(!s.finished());
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_release_outside_front_block() {
        let mut gen = CommandIdGen::new();
        let (c1, c2) = (cmd(&mut gen), cmd(&mut gen));
        let mut s = Session::new();
        s.push(c1.clone());
        s.block();
        s.push(c2.clone());
        s.block();
        assert!(!s.release(c2.id));
        assert_eq!(s.len(), 2);
        assert!(s.release(c1.id));
        assert!(!s.release(c1.id));
    }

    #[test]
    fn test_release_before_dispatch_skips_command() {
        let mut gen = CommandIdGen::new();
        let (c1, c2) = (cmd(&mut gen), cmd(&mut gen));
        let mut s = Session::new();
        s.push(c1.clone());
        s.push(c2.clone());
        s.block();
        assert!(s.release(c1.id));
        assert_eq!(s.pop().map(|c| c.id), Some(c2.id));
    }

    #[test]
    fn test_append() {
        let mut gen = CommandIdGen::new();
        let mut a = Session::new();
        a.push(cmd(&mut gen));
        let mut b = Session::new();
        b.push(cmd(&mut gen));
        b.block();
        b.push(cmd(&mut gen));
        b.block();

        a.append(b).unwrap();
        assert_eq!(a.block_count(), 3);
        assert_eq!(a.len(), 3);

        let mut open = Session::new();
        open.push(cmd(&mut gen));
        assert_eq!(a.append(open), Err(SessionError::NotClosed));

        let mut started = Session::new();
        started.push(cmd(&mut gen));
        started.block();
        started.pop();
        assert_eq!(a.append(started), Err(SessionError::AlreadyStarted));
    }

    #[test]
    fn test_commands_iterates_everything() {
        let mut gen = CommandIdGen::new();
        let mut s = Session::new();
        s.extend([cmd(&mut gen), cmd(&mut gen)]);
        s.block();
        s.push(cmd(&mut gen));
        assert_eq!(s.commands().count(), 3);
    }

    proptest! {
        /// Random release order never lets a later block overtake an earlier one.
        #[test]
        fn prop_barrier_invariant(
            widths in prop::collection::vec(1usize..5, 1..8),
            picks in prop::collection::vec(any::<prop::sample::Index>(), 64),
        ) {
            let mut gen = CommandIdGen::new();
            let mut s = Session::new();
            let mut block_of = std::collections::BTreeMap::new();
            for (k, width) in widths.iter().enumerate() {
                for _ in 0..*width {
                    let c = cmd(&mut gen);
                    block_of.insert(c.id, k);
                    s.push(c);
                }
                s.block();
            }
            let total: usize = widths.iter().sum();

            let mut in_flight: Vec<CommandId> = Vec::new();
            let mut released = 0usize;
            let mut released_per_block = vec![0usize; widths.len()];
            let mut picks = picks.into_iter().cycle();

            while released < total {
                while let Some(c) = s.pop() {
                    let k = block_of[&c.id];
                    for earlier in 0..k {
                        prop_assert_eq!(released_per_block[earlier], widths[earlier]);
                    }
                    in_flight.push(c.id);
                }
                prop_assert!(!in_flight.is_empty());
                let idx = picks.next().map(|i| i.index(in_flight.len())).unwrap_or(0);
                let id = in_flight.swap_remove(idx);
                prop_assert!(s.release(id));
                released_per_block[block_of[&id]] += 1;
                released += 1;
            }
            prop_assert!(s.finished());
            prop_assert!(s.pop().is_none());
        }
    }
}
