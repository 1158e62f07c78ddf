//! Execution nodes and the node graph.
//!
//! A node is one entry of a flat table. Its operation reports a [`Flow`],
//! and [`Node::step`] resolves that flow against the indices wired by the
//! dispatcher into the id of the node to run next.

use super::context::ExecutionContext;
use super::instruction::AcceleratorInstruction;
use crate::error::{RuntimeError, VmResult};
use std::fmt;

/// Index of a node in the graph; equals the reordered instruction address.
pub type NodeId = usize;

/// Control transfer requested by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the successor.
    Next,
    /// Continue with the landing node.
    Branch,
    /// Continue with an explicit node.
    Goto(NodeId),
    /// Stop the program.
    Halt,
}

/// Operation bound into a node at dispatch.
pub trait Execute {
    /// Perform the operation.
    fn execute(&self, ctx: &mut ExecutionContext<'_>) -> VmResult<Flow>;

    /// Name of the concrete node type.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// One entry of the node table.
pub struct Node {
    op: Box<dyn Execute>,
    next: Option<NodeId>,
    landing: Option<NodeId>,
}

impl Node {
    pub(crate) fn new(op: Box<dyn Execute>, next: Option<NodeId>) -> Self {
        Self {
            op,
            next,
            landing: None,
        }
    }

    /// Successor in program order.
    #[inline]
    pub fn next(&self) -> Option<NodeId> {
        self.next
    }

    /// Branch or call target.
    #[inline]
    pub fn landing(&self) -> Option<NodeId> {
        self.landing
    }

    /// Name of the bound operation's node type.
    pub fn name(&self) -> &'static str {
        self.op.name()
    }

    pub(crate) fn bind_landing(&mut self, landing: NodeId) {
        self.landing = Some(landing);
    }

    /// Execute the operation and return the node to run next.
    #[inline(always)]
    pub fn step(&self, ctx: &mut ExecutionContext<'_>) -> VmResult<Option<NodeId>> {
        match self.op.execute(ctx)? {
            Flow::Next => Ok(self.next),
            Flow::Branch => self
                .landing
                .map(Some)
                .ok_or_else(|| {
                    RuntimeError::internal("branch taken on a node without a landing point")
                }),
            Flow::Goto(id) => Ok(Some(id)),
            Flow::Halt => Ok(None),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("next", &self.next)
            .field("landing", &self.landing)
            .finish_non_exhaustive()
    }
}

/// Dispatched program: nodes aligned with their scheduled instructions.
#[derive(Debug)]
pub struct NodeGraph {
    nodes: Vec<Node>,
    instructions: Vec<AcceleratorInstruction>,
}

impl NodeGraph {
    pub(crate) fn new(nodes: Vec<Node>, instructions: Vec<AcceleratorInstruction>) -> Self {
        debug_assert_eq!(nodes.len(), instructions.len());
        Self { nodes, instructions }
    }

    /// Number of nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First node to run.
    #[inline]
    pub fn entry(&self) -> Option<NodeId> {
        if self.nodes.is_empty() { None } else { Some(0) }
    }

    /// Node `id`.
    #[inline(always)]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Source instruction of node `id`.
    #[inline]
    pub fn instruction(&self, id: NodeId) -> Option<&AcceleratorInstruction> {
        self.instructions.get(id)
    }

    /// All scheduled instructions.
    pub fn instructions(&self) -> &[AcceleratorInstruction] {
        &self.instructions
    }
}

impl fmt::Display for NodeGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (node, instruction) in self.nodes.iter().zip(&self.instructions) {
            write!(
                f,
                "[{} <- {}]\t{}",
                instruction.reordered_address(),
                instruction.unreordered_address(),
                instruction
            )?;
            if let Some(landing) = node.landing {
                write!(f, "\t-> {landing}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
