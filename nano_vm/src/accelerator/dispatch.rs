//! Node graph construction.
//!
//! Nodes are built from the last scheduled instruction to the first, so
//! each node's successor already exists when it is created. A second pass
//! binds the landing node of every branch and call. Return targets are
//! dynamic and are resolved through the call stacks instead.

use super::data_manager::DataManager;
use super::function::{external, internal};
use super::instruction::{AccelerationType, AcceleratorInstruction, Category, ElementType};
use super::node::{Node, NodeGraph};
use super::operand::OperandInfo;
use super::units::{
    BoxedOp, allocation, arithmetic, branch, bypass, comparison, logical, nop, subscript, transfer,
};
use crate::error::{RuntimeError, VmResult};
use crate::interconnect::Interconnect;
use nano_core::{Memory, Opcode};
use smallvec::SmallVec;
use tracing::{debug, trace};

/// Build the node graph of a scheduled program.
///
/// Any failure is fatal and reported as a dispatch failure at the
/// offending instruction.
pub fn dispatch(
    instructions: Vec<AcceleratorInstruction>,
    memory: &Memory,
    interconnect: &Interconnect,
    data: &DataManager,
) -> VmResult<NodeGraph> {
    let count = instructions.len();
    let mut nodes = Vec::with_capacity(count);
    for (id, instruction) in instructions.iter().enumerate().rev() {
        let op = build(instruction, memory, interconnect, data)
            .map_err(|cause| RuntimeError::dispatch_failed(cause, instruction.error_location()))?;
        trace!(id, node = op.name(), %instruction, "dispatched");
        let next = (id + 1 < count).then_some(id + 1);
        nodes.push(Node::new(op, next));
    }
    nodes.reverse();

    for (node, instruction) in nodes.iter_mut().zip(&instructions) {
        let jumps = matches!(instruction.opcode(), Opcode::Jmp | Opcode::Jmpn | Opcode::Call);
        if !jumps || instruction.is_fused() {
            continue;
        }
        let landing = instruction
            .reordered_label_address()
            .filter(|&landing| landing < count)
            .ok_or_else(|| {
                RuntimeError::dispatch_failed(
                    RuntimeError::internal("branch or call without a resolvable landing node"),
                    instruction.error_location(),
                )
            })?;
        node.bind_landing(landing);
    }

    debug!(nodes = count, "dispatch finished");
    Ok(NodeGraph::new(nodes, instructions))
}

fn build(
    instruction: &AcceleratorInstruction,
    memory: &Memory,
    interconnect: &Interconnect,
    data: &DataManager,
) -> VmResult<BoxedOp> {
    let operands = instruction
        .operands()
        .iter()
        .map(|&operand| data.operand(operand, memory))
        .collect::<VmResult<SmallVec<[OperandInfo; 4]>>>()?;
    generate(instruction, &operands, interconnect)
}

/// Call the generator of the unit named by the instruction's acceleration type.
pub fn generate(
    instruction: &AcceleratorInstruction,
    operands: &[OperandInfo],
    interconnect: &Interconnect,
) -> VmResult<BoxedOp> {
    use Category::*;
    use ElementType::{Bool, Float64, Int64};

    let acceleration = instruction.acceleration();
    match acceleration {
        AccelerationType::Unit {
            category,
            element,
            shape,
        } => match (category, element) {
            (Arithmetic, Int64) => arithmetic::generate::<i64>(instruction, shape, operands),
            (Arithmetic, Float64) => arithmetic::generate::<f64>(instruction, shape, operands),
            (DualArithmetic, Int64) => {
                arithmetic::generate_dual::<i64>(instruction, shape, operands)
            }
            (DualArithmetic, Float64) => {
                arithmetic::generate_dual::<f64>(instruction, shape, operands)
            }
            (Comparison, Int64) => comparison::generate::<i64>(instruction, shape, operands),
            (Comparison, Float64) => comparison::generate::<f64>(instruction, shape, operands),
            (Logical, Bool) => logical::generate(instruction, shape, operands),
            (Transfer, _) => transfer::generate(instruction, shape, operands),
            (MultipleTransfer, Int64) => transfer::generate_multiple::<i64>(instruction, operands),
            (MultipleTransfer, Float64) => {
                transfer::generate_multiple::<f64>(instruction, operands)
            }
            (MultipleTransfer, Bool) => transfer::generate_multiple::<bool>(instruction, operands),
            (Subscript, Int64) => subscript::generate::<i64>(instruction, shape, operands),
            (Subscript, Float64) => subscript::generate::<f64>(instruction, shape, operands),
            (Subscript, Bool) => subscript::generate::<bool>(instruction, shape, operands),
            (Branch, Bool) => branch::generate(instruction, shape, operands),
            (Allocation, Int64) => allocation::generate::<i64>(instruction, shape, operands),
            (Allocation, Float64) => allocation::generate::<f64>(instruction, shape, operands),
            (Allocation, Bool) => allocation::generate::<bool>(instruction, shape, operands),
            _ => Err(RuntimeError::unsupported_acceleration_type(acceleration)),
        },
        AccelerationType::FunctionControl => internal::generate(instruction, operands),
        AccelerationType::ExternalFunctionControl => {
            external::generate(instruction, operands, interconnect)
        }
        AccelerationType::Nop => nop::generate(),
        AccelerationType::Bypass => bypass::generate(instruction, operands),
    }
}
