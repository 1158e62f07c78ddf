//! Per-run execution state.

use super::node::NodeId;
use crate::error::{RuntimeError, VmResult};
use crate::interconnect::Interconnect;
use crate::processor::Processor;
use nano_core::{ContainerRef, DataError, Memory};

/// Address and data stacks of script function calls.
///
/// Both stacks start at a configured capacity and double whenever they are
/// full. They never shrink and impose no depth limit.
#[derive(Debug)]
pub struct CallStacks {
    addresses: Vec<NodeId>,
    data: Vec<ContainerRef>,
    node_count: usize,
}

#[inline]
fn grow<T>(stack: &mut Vec<T>) {
    if stack.len() == stack.capacity() {
        let additional = stack.capacity().max(1);
        stack.reserve_exact(additional);
    }
}

impl CallStacks {
    /// Empty stacks with room for `capacity` entries each.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            addresses: Vec::with_capacity(capacity),
            data: Vec::with_capacity(capacity),
            node_count: 0,
        }
    }

    /// Record the node table size used to validate return addresses.
    pub fn bind_node_table(&mut self, node_count: usize) {
        self.node_count = node_count;
    }

    /// Push a return address.
    #[inline]
    pub fn push_address(&mut self, address: NodeId) {
        grow(&mut self.addresses);
        self.addresses.push(address);
    }

    /// Pop a return address, checking it names a node.
    #[inline]
    pub fn pop_address(&mut self) -> VmResult<NodeId> {
        let address = self.addresses.pop().ok_or(DataError::StackUnderflow)?;
        if address >= self.node_count {
            return Err(RuntimeError::internal(format!(
                "return address {} is outside the node table (size {})",
                address, self.node_count
            )));
        }
        Ok(address)
    }

    /// Push a container onto the data stack.
    #[inline]
    pub fn push_data(&mut self, container: ContainerRef) {
        grow(&mut self.data);
        self.data.push(container);
    }

    /// Pop the top of the data stack.
    #[inline]
    pub fn pop_data(&mut self) -> VmResult<ContainerRef> {
        Ok(self.data.pop().ok_or(DataError::StackUnderflow)?)
    }

    /// Top of the data stack.
    #[inline]
    pub fn peek_data(&self) -> VmResult<&ContainerRef> {
        Ok(self.data.last().ok_or(DataError::StackUnderflow)?)
    }

    /// Depth of the address stack.
    #[inline]
    pub fn address_depth(&self) -> usize {
        self.addresses.len()
    }

    /// Depth of the data stack.
    #[inline]
    pub fn data_depth(&self) -> usize {
        self.data.len()
    }

    /// Current capacity of the address stack.
    #[inline]
    pub fn address_capacity(&self) -> usize {
        self.addresses.capacity()
    }

    /// Current capacity of the data stack.
    #[inline]
    pub fn data_capacity(&self) -> usize {
        self.data.capacity()
    }
}

/// Everything a node may touch while it executes.
pub struct ExecutionContext<'a> {
    /// Program memory.
    pub memory: &'a Memory,
    /// Host function table.
    pub interconnect: &'a Interconnect,
    /// Fallback for bypassed instructions.
    pub processor: &'a dyn Processor,
    /// Script call stacks.
    pub stacks: CallStacks,
}

impl<'a> ExecutionContext<'a> {
    /// Create a context with stacks of `stack_capacity`.
    pub fn new(
        memory: &'a Memory,
        interconnect: &'a Interconnect,
        processor: &'a dyn Processor,
        stack_capacity: usize,
    ) -> Self {
        Self {
            memory,
            interconnect,
            processor,
            stacks: CallStacks::with_capacity(stack_capacity),
        }
    }
}
