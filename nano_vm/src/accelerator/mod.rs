//! Accelerator: runs a program as a graph of specialized nodes.
//!
//! A run goes through four stages:
//!
//! ```text
//! instructions ─► DataManager ─► scheduler ─► dispatch ─► trampoline
//!                 (scalars,      (acceleration  (NodeGraph)  (node.step
//!                  caches)        types, fusion)              until halt)
//! ```
//!
//! Instructions without a specialized unit are bypassed to the
//! [`GenericProcessor`](crate::processor::GenericProcessor), with their
//! cached operands synchronized around the call.

pub mod cache;
pub mod context;
pub mod data_manager;
pub mod dispatch;
pub mod function;
pub mod instruction;
pub mod node;
pub mod operand;
pub mod scheduler;
pub mod units;

pub use cache::{Cache, CachedElement, ScalarCache};
pub use context::{CallStacks, ExecutionContext};
pub use data_manager::DataManager;
pub use instruction::{
    AccelerationType, AcceleratorInstruction, Category, ElementType, ExtendedOpcode, Shape,
};
pub use node::{Execute, Flow, Node, NodeGraph, NodeId};
pub use operand::{Operand, OperandInfo, Synchronizer};

use crate::config::{AcceleratorConfig, DumpStream, DumpTarget};
use crate::error::{ErrorClass, RuntimeError, VmResult};
use crate::interconnect::Interconnect;
use crate::monitor::{Monitor, RunOutcome, RunReport};
use crate::processor::GenericProcessor;
use nano_core::{Instruction, Memory, Partition};
use std::io::{self, Write};
use tracing::{info, warn};

/// Accelerated execution engine.
#[derive(Debug, Default)]
pub struct Accelerator {
    config: AcceleratorConfig,
    processor: GenericProcessor,
}

impl Accelerator {
    /// Create an accelerator with `config`.
    pub fn new(config: AcceleratorConfig) -> Self {
        Self {
            config,
            processor: GenericProcessor::new(),
        }
    }

    /// Active configuration.
    #[inline]
    pub fn config(&self) -> &AcceleratorConfig {
        &self.config
    }

    /// Analyze, schedule, and dispatch `instructions` without running them.
    pub fn build(
        &self,
        instructions: &[Instruction],
        memory: &Memory,
        interconnect: &Interconnect,
    ) -> VmResult<(DataManager, NodeGraph)> {
        let caches = self.config.caches_enabled();
        let data = DataManager::analyze(instructions, memory, interconnect, caches)?;
        let fusion = self.config.fusion_enabled();
        let scheduled = scheduler::schedule(instructions, memory, &data, fusion)?;
        let graph = dispatch::dispatch(scheduled, memory, interconnect, &data)?;
        Ok((data, graph))
    }

    /// Run `instructions` against `memory`.
    pub fn process(
        &self,
        instructions: &[Instruction],
        memory: &Memory,
        interconnect: &Interconnect,
        monitor: &Monitor,
    ) -> VmResult<RunReport> {
        info!(
            instructions = instructions.len(),
            optimization_level = self.config.optimization_level,
            "accelerator run started"
        );
        let (data, graph) = self.build(instructions, memory, interconnect)?;

        let capacity = self.config.initial_stack_capacity;
        let mut ctx = ExecutionContext::new(memory, interconnect, &self.processor, capacity);
        ctx.stacks.bind_node_table(graph.len());
        data.to_cache(Partition::Constant, memory)?;
        data.to_cache(Partition::Global, memory)?;

        if self.config.dump_enabled {
            self.dump(instructions, &graph)
                .map_err(|err| RuntimeError::internal(format!("dump failed: {err}")))?;
        }

        monitor.begin_run();
        if !self.config.run_enabled {
            info!(nodes = graph.len(), "dispatch-only run finished");
            return Ok(RunReport {
                outcome: RunOutcome::DispatchOnly,
                executed_nodes: 0,
            });
        }

        let outcome = run(&graph, &mut ctx, monitor);
        let written_back = data.to_memory(Partition::Global, memory);
        let outcome = outcome?;
        written_back?;

        let executed_nodes = monitor.executed_count();
        info!(nodes = graph.len(), executed = executed_nodes, ?outcome, "accelerator run finished");
        Ok(RunReport {
            outcome,
            executed_nodes,
        })
    }

    fn dump(&self, instructions: &[Instruction], graph: &NodeGraph) -> io::Result<()> {
        let target = self.config.dump_target;
        match self.config.dump_stream {
            DumpStream::Stdout => write_dump(&mut io::stdout().lock(), target, instructions, graph),
            DumpStream::Stderr => write_dump(&mut io::stderr().lock(), target, instructions, graph),
        }
    }
}

/// Drive the graph from its entry node until it halts or is terminated.
fn run(
    graph: &NodeGraph,
    ctx: &mut ExecutionContext<'_>,
    monitor: &Monitor,
) -> VmResult<RunOutcome> {
    let mut current = graph.entry();
    while let Some(id) = current {
        let node = graph
            .node(id)
            .ok_or_else(|| RuntimeError::internal(format!("node {id} is outside the graph")))?;
        current = node.step(ctx).map_err(|err| enrich(graph, id, err))?;

        let address = graph.instruction(id).map_or(id, AcceleratorInstruction::unreordered_address);
        monitor.record(address);
        if monitor.is_termination_requested() {
            warn!(address, "termination requested");
            return Ok(RunOutcome::Terminated);
        }
    }
    Ok(RunOutcome::Completed)
}

fn enrich(graph: &NodeGraph, id: NodeId, err: RuntimeError) -> RuntimeError {
    let Some(instruction) = graph.instruction(id) else {
        return err;
    };
    let location = instruction.error_location();
    if err.kind.class() != ErrorClass::Structured {
        warn!(
            address = location.address,
            reordered_address = location.reordered_address,
            cause = %err.kind,
            "unexpected crash"
        );
    }
    err.enrich(location)
}

const RULE: &str =
    "================================================================================";

fn heading(out: &mut impl Write, title: &str) -> io::Result<()> {
    writeln!(out, "{RULE}")?;
    writeln!(out, "= {title}")?;
    writeln!(out, "{RULE}")
}

/// Write the dump sections selected by `target`.
pub fn write_dump(
    out: &mut impl Write,
    target: DumpTarget,
    instructions: &[Instruction],
    graph: &NodeGraph,
) -> io::Result<()> {
    let all = target == DumpTarget::All;
    if all || target == DumpTarget::InputCode {
        heading(out, "Input Code")?;
        for (address, instruction) in instructions.iter().enumerate() {
            writeln!(out, "[{address}]\t{instruction}")?;
        }
    }
    if all || target == DumpTarget::AcceleratorCode {
        heading(out, "Accelerator Code")?;
        for instruction in graph.instructions() {
            writeln!(out, "[{}]\t{}", instruction.reordered_address(), instruction)?;
        }
    }
    if all || target == DumpTarget::AcceleratorState {
        heading(out, "Accelerator State")?;
        write!(out, "{graph}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeErrorKind;
    use nano_core::{DataContainer, DataType, Opcode, OperandRef};

    /// `R0 = 0; do { R0 = R0 + 1 } while (R0 < limit)`
    fn counting_loop(memory: &mut Memory, limit: i64) -> Vec<Instruction> {
        memory.allocate(Partition::Register, 2).unwrap();
        let zero = memory.push(Partition::Constant, DataContainer::scalar(0_i64)).unwrap();
        let one = memory.push(Partition::Constant, DataContainer::scalar(1_i64)).unwrap();
        let limit = memory.push(Partition::Constant, DataContainer::scalar(limit)).unwrap();
        let body = memory.push(Partition::Constant, DataContainer::scalar(3_i64)).unwrap();
        let (r0, r1) = (OperandRef::register(0), OperandRef::register(1));
        let i64s = &[DataType::Int64];
        vec![
            Instruction::new(Opcode::Alloc, i64s, &[r0]),
            Instruction::new(Opcode::Alloc, &[DataType::Bool], &[r1]),
            Instruction::new(Opcode::Mov, i64s, &[r0, OperandRef::constant(zero)]),
            Instruction::new(Opcode::Add, i64s, &[r0, r0, OperandRef::constant(one)]),
            Instruction::new(Opcode::Lt, i64s, &[r1, r0, OperandRef::constant(limit)]),
            Instruction::new(
                Opcode::Jmp,
                &[DataType::Bool],
                &[OperandRef::placeholder(), OperandRef::constant(body), r1],
            ),
            Instruction::new(Opcode::End, i64s, &[OperandRef::placeholder(), r0]),
        ]
    }

    /// `f(_, n) = n == 0 ? 0 : f(0, n - 1) + 1`, called with `depth`.
    ///
    /// Each frame pops its first argument only after the nested call has
    /// returned, so both stacks grow with the depth.
    fn nested_calls(memory: &mut Memory, depth: i64) -> Vec<Instruction> {
        memory.allocate(Partition::Register, 1).unwrap();
        memory.allocate(Partition::Local, 3).unwrap();
        let mut constant = |value: i64| {
            let address = memory.push(Partition::Constant, DataContainer::scalar(value)).unwrap();
            OperandRef::constant(address)
        };
        let (depth, zero, one) = (constant(depth), constant(0), constant(1));
        let (entry, base) = (constant(5), constant(18));
        let r0 = OperandRef::register(0);
        let (l0, l1, l2) = (OperandRef::local(0), OperandRef::local(1), OperandRef::local(2));
        let none = OperandRef::placeholder();
        let (i64s, bools, void) = (&[DataType::Int64], &[DataType::Bool], &[DataType::Void]);
        vec![
            Instruction::new(Opcode::Alloc, i64s, &[r0]),
            Instruction::new(Opcode::Call, i64s, &[none, entry, zero, depth]),
            Instruction::new(Opcode::Nop, void, &[]),
            Instruction::new(Opcode::Movpop, i64s, &[r0]),
            Instruction::new(Opcode::End, i64s, &[none, r0]),
            // f
            Instruction::new(Opcode::Alloc, i64s, &[l0]),
            Instruction::new(Opcode::Movpop, i64s, &[l0]),
            Instruction::new(Opcode::Alloc, bools, &[l1]),
            Instruction::new(Opcode::Eq, i64s, &[l1, l0, zero]),
            Instruction::new(Opcode::Jmp, bools, &[none, base, l1]),
            Instruction::new(Opcode::Alloc, i64s, &[l2]),
            Instruction::new(Opcode::Sub, i64s, &[l2, l0, one]),
            Instruction::new(Opcode::Call, i64s, &[none, entry, zero, l2]),
            Instruction::new(Opcode::Nop, void, &[]),
            Instruction::new(Opcode::Movpop, i64s, &[l2]),
            Instruction::new(Opcode::Pop, void, &[none]),
            Instruction::new(Opcode::Add, i64s, &[l2, l2, one]),
            Instruction::new(Opcode::Ret, i64s, &[none, entry, l2]),
            // base
            Instruction::new(Opcode::Pop, void, &[none]),
            Instruction::new(Opcode::Ret, i64s, &[none, entry, l0]),
        ]
    }

    #[test]
    fn test_nested_calls_unwind_stacks() {
        const DEPTH: usize = 1500;
        let mut memory = Memory::new();
        let code = nested_calls(&mut memory, DEPTH as i64);
        let interconnect = Interconnect::new();
        let accelerator = Accelerator::default();
        let (data, graph) = accelerator.build(&code, &memory, &interconnect).unwrap();

        let mut ctx = ExecutionContext::new(&memory, &interconnect, &accelerator.processor, 4);
        ctx.stacks.bind_node_table(graph.len());
        data.to_cache(Partition::Constant, &memory).unwrap();
        let addresses = ctx.stacks.address_depth();
        let values = ctx.stacks.data_depth();

        let outcome = run(&graph, &mut ctx, &Monitor::default()).unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(memory.result().unwrap().get::<i64>(), Ok(DEPTH as i64));
        assert_eq!(ctx.stacks.address_depth(), addresses);
        assert_eq!(ctx.stacks.data_depth(), values);
        assert!(ctx.stacks.address_capacity() > DEPTH);
        assert!(ctx.stacks.data_capacity() > DEPTH);
    }

    #[test]
    fn test_run_writes_result() {
        let mut memory = Memory::new();
        let code = counting_loop(&mut memory, 50);
        let report = Accelerator::default()
            .process(&code, &memory, &Interconnect::new(), &Monitor::default())
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(memory.result().unwrap().get::<i64>(), Ok(50));
        assert_eq!(report.executed_nodes, 3 + 50 * 3 + 1);
    }

    #[test]
    fn test_dispatch_only() {
        let mut memory = Memory::new();
        let code = counting_loop(&mut memory, 5);
        let accelerator = Accelerator::new(AcceleratorConfig::dispatch_only());
        let report = accelerator
            .process(&code, &memory, &Interconnect::new(), &Monitor::default())
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::DispatchOnly);
        assert!(memory.result().is_none());
    }

    #[test]
    fn test_error_carries_location() {
        let mut memory = Memory::new();
        memory.allocate(Partition::Register, 1).unwrap();
        let zero = memory.push(Partition::Constant, DataContainer::scalar(0_i64)).unwrap();
        let r0 = OperandRef::register(0);
        let code = [
            Instruction::new(Opcode::Alloc, &[DataType::Int64], &[r0]),
            Instruction::new(
                Opcode::Div,
                &[DataType::Int64],
                &[r0, r0, OperandRef::constant(zero)],
            ),
        ];
        let err = Accelerator::default()
            .process(&code, &memory, &Interconnect::new(), &Monitor::default())
            .unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::UnexpectedCrash { .. }));
        let location = err.location.unwrap();
        assert_eq!(location.address, 1);
        assert!(location.instruction.starts_with("DIV"));
    }

    #[test]
    fn test_dump_sections() {
        let mut memory = Memory::new();
        let code = counting_loop(&mut memory, 1);
        let (_, graph) = Accelerator::default()
            .build(&code, &memory, &Interconnect::new())
            .unwrap();

        let mut out = Vec::new();
        write_dump(&mut out, DumpTarget::All, &code, &graph).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("= Input Code"));
        assert!(text.contains("I64CS_ARITHMETIC"));
        assert!(text.contains("[3 <- 3]"));

        let mut out = Vec::new();
        write_dump(&mut out, DumpTarget::InputCode, &code, &graph).unwrap();
        assert!(!String::from_utf8(out).unwrap().contains("= Accelerator State"));
    }
}
