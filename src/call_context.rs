//! Per-flow stack of nested units of work.
//!
//! One context belongs to exactly one logical flow (its
//! [`UnitOfWorkManager`](crate::UnitOfWorkManager)); nothing is stored in
//! globals or thread-locals, so sibling flows never observe each other.

use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{UnitOfWorkError, UowResult};
use crate::unit_of_work::UnitOfWork;

struct Node {
    unit_of_work: Arc<UnitOfWork>,
    /// Nested `Required` calls that joined this node instead of pushing.
    joins: usize,
}

#[derive(Default)]
pub struct UnitOfWorkCallContext {
    nodes: Mutex<Vec<Node>>,
}

impl UnitOfWorkCallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<UnitOfWork>> {
        self.nodes
            .lock()
            .last()
            .map(|node| node.unit_of_work.clone())
    }

    /// Makes `unit_of_work` the current node; the previous current becomes
    /// its parent.
    pub fn push(&self, unit_of_work: Arc<UnitOfWork>) {
        self.nodes.lock().push(Node {
            unit_of_work,
            joins: 0,
        });
    }

    /// Removes the current node and returns the new current unit of work.
    /// The root is never popped.
    pub fn pop(&self) -> UowResult<Arc<UnitOfWork>> {
        let mut nodes = self.nodes.lock();
        match nodes.len() {
            0 => Err(UnitOfWorkError::CallContext("pop on an empty context".to_string())),
            1 => Err(UnitOfWorkError::CallContext(
                "pop on the root unit of work".to_string(),
            )),
            _ => {
                nodes.pop();
                nodes
                    .last()
                    .map(|node| node.unit_of_work.clone())
                    .ok_or(UnitOfWorkError::NoActiveUnitOfWork)
            }
        }
    }

    /// Records a nested call joining the current node.
    pub fn join(&self) -> Option<Arc<UnitOfWork>> {
        let mut nodes = self.nodes.lock();
        nodes.last_mut().map(|node| {
            node.joins += 1;
            node.unit_of_work.clone()
        })
    }

    /// Undoes one `join` on the current node. Returns `false` when no call
    /// is joined, i.e. the node's creator is the one leaving.
    pub fn leave(&self) -> bool {
        let mut nodes = self.nodes.lock();
        match nodes.last_mut() {
            Some(node) if node.joins > 0 => {
                node.joins -= 1;
                true
            }
            _ => false,
        }
    }

    /// Removes the root once it is the only node left.
    pub fn clear_root(&self) -> UowResult<Arc<UnitOfWork>> {
        let mut nodes = self.nodes.lock();
        if nodes.len() != 1 {
            return Err(UnitOfWorkError::CallContext(format!(
                "cannot clear the root while {} nodes are active",
                nodes.len()
            )));
        }
        nodes
            .pop()
            .map(|node| node.unit_of_work)
            .ok_or(UnitOfWorkError::NoActiveUnitOfWork)
    }

    /// Removes and returns the innermost node regardless of depth.
    pub(crate) fn take_innermost(&self) -> Option<Arc<UnitOfWork>> {
        self.nodes.lock().pop().map(|node| node.unit_of_work)
    }

    pub fn find(&self, id: Uuid) -> Option<Arc<UnitOfWork>> {
        self.nodes
            .lock()
            .iter()
            .find(|node| node.unit_of_work.id() == id)
            .map(|node| node.unit_of_work.clone())
    }

    pub fn depth(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }
}
