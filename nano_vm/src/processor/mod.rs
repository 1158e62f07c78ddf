//! Generic processor.
//!
//! Interprets instructions one at a time, resolving operands from memory
//! and dispatching on the data type at run time. It runs programs when the
//! accelerator is disabled, executes the instructions the accelerator
//! bypasses, and serves as the reference the accelerated units are
//! checked against.

pub mod execution;

use crate::error::{ErrorLocation, RuntimeError, VmResult};
use crate::interconnect::Interconnect;
use crate::monitor::{Monitor, RunOutcome, RunReport};
use nano_core::{ContainerRef, DataContainer, DataError, DataType, Instruction, Memory, Opcode};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info};

/// Executes single instructions.
pub trait Processor {
    /// Execute `instruction` found at `pc`.
    ///
    /// Returns the address of the next instruction, or `None` once the
    /// program has ended.
    fn process(
        &self,
        instruction: &Instruction,
        memory: &Memory,
        interconnect: &Interconnect,
        pc: usize,
    ) -> VmResult<Option<usize>>;
}

type Containers = SmallVec<[ContainerRef; 4]>;

#[derive(Debug, Default)]
struct Stacks {
    addresses: Vec<usize>,
    data: Vec<ContainerRef>,
}

impl Stacks {
    fn pop_data(&mut self) -> VmResult<ContainerRef> {
        Ok(self.data.pop().ok_or(DataError::StackUnderflow)?)
    }

    fn peek_data(&self) -> VmResult<ContainerRef> {
        Ok(self.data.last().cloned().ok_or(DataError::StackUnderflow)?)
    }
}

/// Processor covering the whole instruction set with dynamic typing.
///
/// Script function calls use the processor's own stacks.
#[derive(Debug, Default)]
pub struct GenericProcessor {
    stacks: RefCell<Stacks>,
}

impl GenericProcessor {
    /// Create a processor with empty stacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a whole program from address 0.
    pub fn run(
        &self,
        instructions: &[Instruction],
        memory: &Memory,
        interconnect: &Interconnect,
    ) -> VmResult<RunReport> {
        self.run_monitored(instructions, memory, interconnect, &Monitor::default())
    }

    /// Run a whole program, reporting progress to `monitor` and honouring
    /// its termination requests.
    pub fn run_monitored(
        &self,
        instructions: &[Instruction],
        memory: &Memory,
        interconnect: &Interconnect,
        monitor: &Monitor,
    ) -> VmResult<RunReport> {
        *self.stacks.borrow_mut() = Stacks::default();
        monitor.begin_run();
        info!(instructions = instructions.len(), "generic processor run started");

        let mut pc = 0;
        let mut outcome = RunOutcome::Completed;
        while let Some(instruction) = instructions.get(pc) {
            let next = self
                .process(instruction, memory, interconnect, pc)
                .map_err(|err| err.enrich(location(instruction, pc)))?;
            monitor.record(pc);
            match next {
                Some(next) => pc = next,
                None => break,
            }
            if monitor.is_termination_requested() {
                outcome = RunOutcome::Terminated;
                break;
            }
        }

        let executed_nodes = monitor.executed_count();
        info!(executed = executed_nodes, ?outcome, "generic processor run finished");
        Ok(RunReport {
            outcome,
            executed_nodes,
        })
    }
}

fn location(instruction: &Instruction, pc: usize) -> ErrorLocation {
    ErrorLocation {
        address: pc,
        reordered_address: pc,
        instruction: instruction.to_string().into(),
        source: instruction.location().cloned(),
    }
}

fn resolve(instruction: &Instruction, memory: &Memory) -> VmResult<Containers> {
    instruction
        .operands()
        .iter()
        .map(|operand| Ok(memory.container(operand.partition, operand.address)?))
        .collect()
}

fn exactly(opcode: Opcode, operands: &[ContainerRef], expected: usize) -> VmResult<()> {
    if operands.len() == expected {
        Ok(())
    } else {
        Err(RuntimeError::invalid_operand_count(opcode, expected, operands.len()))
    }
}

fn at_least(opcode: Opcode, operands: &[ContainerRef], expected: usize) -> VmResult<()> {
    if operands.len() >= expected {
        Ok(())
    } else {
        Err(RuntimeError::invalid_operand_count(opcode, expected, operands.len()))
    }
}

/// Instruction address held by a label operand.
fn address(container: &DataContainer) -> VmResult<usize> {
    let value = container.get::<i64>()?;
    usize::try_from(value)
        .map_err(|_| RuntimeError::internal(format!("invalid instruction address {value}")))
}

impl Processor for GenericProcessor {
    fn process(
        &self,
        instruction: &Instruction,
        memory: &Memory,
        interconnect: &Interconnect,
        pc: usize,
    ) -> VmResult<Option<usize>> {
        let opcode = instruction.opcode();
        let data_type = instruction.data_type();
        let ops = resolve(instruction, memory)?;
        let next = Some(pc + 1);

        match opcode {
            // =================================================================
            // Arithmetic, Comparison, Logical
            // =================================================================
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Rem => {
                exactly(opcode, &ops, 3)?;
                execution::arithmetic(opcode, data_type, &ops[0], &ops[1], &ops[2])?;
            }
            Opcode::Neg => {
                exactly(opcode, &ops, 2)?;
                execution::neg(data_type, &ops[0], &ops[1])?;
            }
            Opcode::Eq | Opcode::Neq | Opcode::Gt | Opcode::Lt | Opcode::Geq | Opcode::Leq => {
                exactly(opcode, &ops, 3)?;
                execution::compare(opcode, data_type, &ops[0], &ops[1], &ops[2])?;
            }
            Opcode::Andm | Opcode::Orm => {
                exactly(opcode, &ops, 3)?;
                execution::logical(opcode, &ops[0], &ops[1], &ops[2])?;
            }
            Opcode::Not => {
                exactly(opcode, &ops, 2)?;
                execution::not(&ops[0], &ops[1])?;
            }

            // =================================================================
            // Transfer
            // =================================================================
            Opcode::Mov => {
                exactly(opcode, &ops, 2)?;
                execution::mov(data_type, &ops[0], &ops[1])?;
            }
            Opcode::Ref => {
                exactly(opcode, &ops, 2)?;
                execution::refer(&ops[0], &ops[1]);
            }
            Opcode::Cast => {
                exactly(opcode, &ops, 2)?;
                let src_type = instruction.data_types().get(1).copied().unwrap_or(data_type);
                execution::cast(data_type, src_type, &ops[0], &ops[1])?;
            }
            Opcode::Fill => {
                exactly(opcode, &ops, 2)?;
                execution::fill(data_type, &ops[0], &ops[1])?;
            }
            Opcode::Movelm => {
                at_least(opcode, &ops, 3)?;
                execution::move_element(data_type, &ops[0], &ops[1], &ops[2..])?;
            }
            Opcode::Refelm => {
                at_least(opcode, &ops, 3)?;
                execution::refer_element(&ops[0], &ops[1], &ops[2..])?;
            }

            // =================================================================
            // Allocation
            // =================================================================
            Opcode::Alloc => {
                at_least(opcode, &ops, 1)?;
                if ops.len() == 1 {
                    execution::alloc_scalar(data_type, &ops[0])?;
                } else {
                    execution::alloc_vector(data_type, &ops[0], &ops[1..])?;
                }
            }
            Opcode::Allocr => {
                exactly(opcode, &ops, 2)?;
                execution::alloc_same_lengths(data_type, &ops[0], &ops[1])?;
            }
            Opcode::Allocp => {
                exactly(opcode, &ops, 1)?;
                let top = self.stacks.borrow().peek_data()?;
                execution::alloc_same_lengths(data_type, &ops[0], &top)?;
            }
            Opcode::Free => {
                exactly(opcode, &ops, 1)?;
                ops[0].initialize();
            }
            Opcode::Alloct | Opcode::Nop | Opcode::Label | Opcode::Endprm => {}

            // =================================================================
            // Stack
            // =================================================================
            Opcode::Pop => {
                self.stacks.borrow_mut().pop_data()?;
            }
            Opcode::Movpop => {
                exactly(opcode, &ops, 1)?;
                let src = self.stacks.borrow_mut().pop_data()?;
                execution::mov(data_type, &ops[0], &src)?;
            }
            Opcode::Refpop => {
                exactly(opcode, &ops, 1)?;
                let src = self.stacks.borrow_mut().pop_data()?;
                execution::refer(&ops[0], &src);
            }

            // =================================================================
            // Control
            // =================================================================
            Opcode::Jmp | Opcode::Jmpn => {
                exactly(opcode, &ops, 3)?;
                if execution::jump_taken(&ops[2], opcode == Opcode::Jmp)? {
                    return Ok(Some(address(&ops[1])?));
                }
            }
            Opcode::Call => {
                at_least(opcode, &ops, 2)?;
                let entry = address(&ops[1])?;
                let mut stacks = self.stacks.borrow_mut();
                stacks.addresses.push(pc + 1);
                stacks.data.extend(ops[2..].iter().cloned());
                return Ok(Some(entry));
            }
            Opcode::Ret => {
                at_least(opcode, &ops, 2)?;
                let mut stacks = self.stacks.borrow_mut();
                let target = stacks.addresses.pop().ok_or(DataError::StackUnderflow)?;
                let value = ops.get(2).cloned().unwrap_or_else(|| DataContainer::new().shared());
                stacks.data.push(value);
                return Ok(Some(target));
            }
            Opcode::Callx => {
                at_least(opcode, &ops, 2)?;
                let index = ops[1].get::<i64>()?;
                let function = usize::try_from(index)
                    .ok()
                    .and_then(|index| interconnect.function(index))
                    .ok_or_else(|| {
                        RuntimeError::internal(format!("no external function at index {index}"))
                    })?;
                let return_type = function.return_type();
                if return_type != DataType::Void && function.return_rank() == Some(0) {
                    ops[0].reallocate(return_type, &[])?;
                }
                function
                    .invoke(&ops[2..], &ops[0])
                    .map_err(|err| RuntimeError::external(function.name(), err.to_string()))?;
            }
            Opcode::Endfun => {
                let name = ops
                    .first()
                    .and_then(|container| container.get_string().ok())
                    .unwrap_or_default();
                return Err(RuntimeError::function_ended_without_return(name));
            }
            Opcode::End => {
                if ops.len() == 2 && ops[1].is_allocated() {
                    let result = DataContainer::new();
                    execution::alloc_same_lengths(data_type, &result, &ops[1])?;
                    execution::mov(data_type, &result, &ops[1])?;
                    memory.set_result(Some(Rc::new(result)));
                }
                debug!(pc, "program ended");
                return Ok(None);
            }
            Opcode::Reord | Opcode::Ex => {
                return Err(RuntimeError::invalid_opcode(opcode, "generic processor"));
            }
        }
        Ok(next)
    }
}
