//! Instruction scheduling.
//!
//! Turns the compiled instructions into [`AcceleratorInstruction`]s:
//!
//! 1. The NOP placed after each CALL becomes an `EX`/RETURNED carrying the
//!    call's arguments, so argument caches are reloaded after the callee.
//! 2. Each instruction gets the acceleration type of the unit that will
//!    run it, chosen from its opcode, types, and the operand facts of the
//!    [`DataManager`].
//! 3. With fusion enabled, adjacent cached-scalar arithmetic pairs and runs
//!    of cached MOVs are merged into single instructions.
//! 4. Reordered addresses are assigned and branch and call labels are
//!    resolved through the reordering map.

use super::data_manager::{DataManager, label_address};
use super::instruction::{
    AccelerationType, AcceleratorInstruction, Category, ElementType, ExtendedOpcode, Shape,
};
use super::units::subscript::MAX_RANK;
use crate::error::{RuntimeError, VmResult};
use nano_core::{DataType, Instruction, Memory, Opcode, OperandRef};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

/// Schedule `instructions` for dispatch.
pub fn schedule(
    instructions: &[Instruction],
    memory: &Memory,
    data: &DataManager,
    fusion_enabled: bool,
) -> VmResult<Vec<AcceleratorInstruction>> {
    let mut scheduled = wrap(instructions);
    for instruction in &mut scheduled {
        let acceleration = Classifier { data }.classify(instruction);
        instruction.set_acceleration(acceleration);
    }

    if fusion_enabled {
        let targets = jump_targets(instructions, memory)?;
        scheduled = fuse_arithmetic(scheduled, &targets);
        scheduled = fuse_transfers(scheduled, &targets);
    }

    let reordering = reorder(&mut scheduled);
    resolve_labels(&mut scheduled, memory, &reordering)?;

    debug!(
        instructions = instructions.len(),
        scheduled = scheduled.len(),
        fused = scheduled.iter().filter(|i| i.is_fused()).count(),
        bypassed = scheduled
            .iter()
            .filter(|i| i.acceleration() == AccelerationType::Bypass)
            .count(),
        "scheduling finished"
    );
    Ok(scheduled)
}

fn wrap(instructions: &[Instruction]) -> Vec<AcceleratorInstruction> {
    let mut wrapped = Vec::with_capacity(instructions.len());
    for (address, instruction) in instructions.iter().enumerate() {
        let follows_call = address > 0 && instructions[address - 1].opcode() == Opcode::Call;
        if follows_call && instruction.opcode() == Opcode::Nop {
            let call = &instructions[address - 1];
            let arguments = call.operands().get(2..).unwrap_or(&[]);
            wrapped.push(AcceleratorInstruction::extended(
                ExtendedOpcode::Returned,
                arguments,
                address,
                instruction.location().cloned(),
            ));
        } else {
            wrapped.push(AcceleratorInstruction::new(instruction.clone(), address));
        }
    }
    wrapped
}

// =============================================================================
// Acceleration Types
// =============================================================================

struct Classifier<'a> {
    data: &'a DataManager,
}

impl Classifier<'_> {
    fn cached_as(&self, operand: OperandRef, data_type: DataType) -> bool {
        self.data.is_scalar(operand)
            && self.data.cache(operand).is_some_and(|c| c.data_type() == data_type)
    }

    /// Common shape of operands that must all agree.
    fn uniform(&self, operands: &[(OperandRef, DataType)]) -> Option<Shape> {
        if operands.iter().all(|&(op, dt)| self.cached_as(op, dt)) {
            Some(Shape::CachedScalar)
        } else if operands.iter().all(|&(op, _)| self.data.is_scalar(op)) {
            Some(Shape::Scalar)
        } else if operands.iter().all(|&(op, _)| !self.data.is_scalar(op)) {
            Some(Shape::Vector)
        } else {
            None
        }
    }

    fn classify(&self, instruction: &AcceleratorInstruction) -> AccelerationType {
        use AccelerationType::{Bypass, ExternalFunctionControl, FunctionControl, Nop};

        let opcode = instruction.opcode();
        let operands = instruction.operands();
        let data_type = instruction.data_type();
        let typed = |types: &[DataType]| -> Vec<(OperandRef, DataType)> {
            operands.iter().copied().zip(types.iter().copied()).collect()
        };
        let unit = |category, element: Option<ElementType>, shape: Option<Shape>| {
            match (element, shape) {
                (Some(element), Some(shape)) => AccelerationType::unit(category, element, shape),
                _ => Bypass,
            }
        };
        let numeric = match data_type {
            DataType::Int64 | DataType::Float64 => ElementType::of(data_type),
            _ => None,
        };

        match opcode {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Rem
                if operands.len() == 3 =>
            {
                let shape = self.uniform(&typed(&[data_type; 3]));
                unit(Category::Arithmetic, numeric, shape)
            }
            Opcode::Neg if operands.len() == 2 => {
                let shape = self.uniform(&typed(&[data_type; 2]));
                unit(Category::Arithmetic, numeric, shape)
            }
            Opcode::Eq | Opcode::Neq | Opcode::Gt | Opcode::Lt | Opcode::Geq | Opcode::Leq
                if operands.len() == 3 =>
            {
                let shape = self.uniform(&typed(&[DataType::Bool, data_type, data_type]));
                unit(Category::Comparison, numeric, shape)
            }
            Opcode::Andm | Opcode::Orm if operands.len() == 3 => {
                let shape = self.uniform(&typed(&[DataType::Bool; 3]));
                unit(Category::Logical, Some(ElementType::Bool), shape)
            }
            Opcode::Not if operands.len() == 2 => {
                let shape = self.uniform(&typed(&[DataType::Bool; 2]));
                unit(Category::Logical, Some(ElementType::Bool), shape)
            }
            Opcode::Mov | Opcode::Cast | Opcode::Fill if operands.len() == 2 => {
                let src_type = match opcode {
                    Opcode::Cast => instruction.data_types().get(1).copied().unwrap_or(data_type),
                    _ => data_type,
                };
                let convertible = matches!(
                    (data_type, src_type),
                    (DataType::Int64 | DataType::Float64, DataType::Int64 | DataType::Float64)
                ) || (data_type == DataType::Bool && src_type == DataType::Bool);
                if !convertible {
                    return Bypass;
                }
                let shape =
                    self.transfer_shape(opcode, (operands[0], data_type), (operands[1], src_type));
                unit(Category::Transfer, ElementType::of(data_type), shape)
            }
            Opcode::Movelm | Opcode::Refelm if operands.len() >= 3 => {
                if operands.len() - 2 > MAX_RANK {
                    return Bypass;
                }
                let dest = operands[0];
                if !self.data.is_scalar(dest) {
                    return Bypass;
                }
                let indices_cached =
                    operands[2..].iter().all(|&op| self.cached_as(op, DataType::Int64));
                let dest_ready = opcode == Opcode::Refelm || self.cached_as(dest, data_type);
                let shape = if indices_cached && dest_ready {
                    Shape::CachedScalar
                } else {
                    Shape::Scalar
                };
                unit(Category::Subscript, ElementType::of(data_type), Some(shape))
            }
            Opcode::Jmp | Opcode::Jmpn if operands.len() == 3 => {
                let condition = operands[2];
                let shape = if self.cached_as(condition, DataType::Bool) {
                    Shape::CachedScalar
                } else if self.data.is_scalar(condition) {
                    Shape::Scalar
                } else {
                    Shape::Vector
                };
                AccelerationType::unit(Category::Branch, ElementType::Bool, shape)
            }
            Opcode::Alloc if !operands.is_empty() => {
                let dest = operands[0];
                let shape = match operands.len() {
                    1 if self.cached_as(dest, data_type) => Shape::CachedScalar,
                    1 => Shape::Scalar,
                    _ => Shape::Vector,
                };
                unit(Category::Allocation, ElementType::of(data_type), Some(shape))
            }
            Opcode::Allocr if operands.len() == 2 => {
                let shape = if self.data.is_scalar(operands[0]) {
                    Shape::Scalar
                } else {
                    Shape::Vector
                };
                unit(Category::Allocation, ElementType::of(data_type), Some(shape))
            }
            Opcode::Call
            | Opcode::Ret
            | Opcode::Pop
            | Opcode::Movpop
            | Opcode::Refpop
            | Opcode::Allocp => FunctionControl,
            Opcode::Ex if instruction.extended_opcode().is_some() => FunctionControl,
            Opcode::Callx => ExternalFunctionControl,
            Opcode::Nop | Opcode::Label | Opcode::Endprm | Opcode::Alloct => Nop,
            _ => Bypass,
        }
    }

    fn transfer_shape(
        &self,
        opcode: Opcode,
        dest: (OperandRef, DataType),
        src: (OperandRef, DataType),
    ) -> Option<Shape> {
        let (dest_scalar, src_scalar) = (self.data.is_scalar(dest.0), self.data.is_scalar(src.0));
        match (dest_scalar, src_scalar) {
            (true, true) if self.cached_as(dest.0, dest.1) && self.cached_as(src.0, src.1) => {
                Some(Shape::CachedScalar)
            }
            (true, true) => Some(Shape::Scalar),
            (false, true) => Some(Shape::VectorScalar),
            (false, false) if opcode != Opcode::Fill => Some(Shape::Vector),
            (true, false) if opcode != Opcode::Fill => Some(Shape::ScalarVector),
            _ => None,
        }
    }
}

// =============================================================================
// Fusion
// =============================================================================

/// Original addresses control may arrive at other than by falling through.
fn jump_targets(instructions: &[Instruction], memory: &Memory) -> VmResult<FxHashSet<usize>> {
    let mut targets = FxHashSet::default();
    for (address, instruction) in instructions.iter().enumerate() {
        match instruction.opcode() {
            Opcode::Jmp | Opcode::Jmpn => {
                targets.insert(label_address(instruction, memory)?);
            }
            Opcode::Call => {
                targets.insert(label_address(instruction, memory)?);
                targets.insert(address + 1);
            }
            _ => {}
        }
    }
    Ok(targets)
}

fn fuses_arithmetic(first: &AcceleratorInstruction, second: &AcceleratorInstruction) -> bool {
    let (a, b) = (first.acceleration(), second.acceleration());
    if !a.is_cached(Category::Arithmetic) || a != b || first.is_fused() || second.is_fused() {
        return false;
    }
    let Some(&intermediate) = first.operands().first() else {
        return false;
    };
    let reads = second.operands()[1..].iter().filter(|&&op| op == intermediate).count();
    reads == 1
}

fn fuse_arithmetic(
    instructions: Vec<AcceleratorInstruction>,
    targets: &FxHashSet<usize>,
) -> Vec<AcceleratorInstruction> {
    let mut fused = Vec::with_capacity(instructions.len());
    let mut rest = instructions.into_iter().peekable();
    while let Some(first) = rest.next() {
        let pair = rest.peek().is_some_and(|second| {
            !targets.contains(&second.unreordered_address()) && fuses_arithmetic(&first, second)
        });
        if !pair {
            fused.push(first);
            continue;
        }
        let Some(second) = rest.next() else {
            fused.push(first);
            continue;
        };
        let AccelerationType::Unit { element, .. } = first.acceleration() else {
            fused.push(first);
            fused.push(second);
            continue;
        };
        let tag = AccelerationType::unit(Category::DualArithmetic, element, Shape::CachedScalar);
        match AcceleratorInstruction::fuse(&[first.clone(), second.clone()], tag) {
            Some(dual) => fused.push(dual),
            None => fused.extend([first, second]),
        }
    }
    fused
}

fn fuse_transfers(
    instructions: Vec<AcceleratorInstruction>,
    targets: &FxHashSet<usize>,
) -> Vec<AcceleratorInstruction> {
    let is_cached_mov = |instruction: &AcceleratorInstruction| {
        instruction.opcode() == Opcode::Mov
            && !instruction.is_fused()
            && instruction.acceleration().is_cached(Category::Transfer)
    };

    let mut fused = Vec::with_capacity(instructions.len());
    let mut run: Vec<AcceleratorInstruction> = Vec::new();
    let flush = |run: &mut Vec<AcceleratorInstruction>, out: &mut Vec<AcceleratorInstruction>| {
        if run.len() < 2 {
            out.append(run);
            return;
        }
        let element = match run[0].acceleration() {
            AccelerationType::Unit { element, .. } => element,
            _ => {
                out.append(run);
                return;
            }
        };
        let tag = AccelerationType::unit(Category::MultipleTransfer, element, Shape::CachedScalar);
        match AcceleratorInstruction::fuse(run, tag) {
            Some(multiple) => {
                out.push(multiple);
                run.clear();
            }
            None => out.append(run),
        }
    };

    for instruction in instructions {
        let extends = run.first().is_some_and(|head| {
            is_cached_mov(&instruction)
                && head.acceleration() == instruction.acceleration()
                && !targets.contains(&instruction.unreordered_address())
        });
        if !extends {
            flush(&mut run, &mut fused);
        }
        if is_cached_mov(&instruction) {
            run.push(instruction);
        } else {
            fused.push(instruction);
        }
    }
    flush(&mut run, &mut fused);
    fused
}

// =============================================================================
// Reordering
// =============================================================================

/// Number the scheduled instructions and map original addresses onto them.
fn reorder(instructions: &mut [AcceleratorInstruction]) -> FxHashMap<usize, usize> {
    let mut reordering = FxHashMap::default();
    for (reordered, instruction) in instructions.iter_mut().enumerate() {
        instruction.set_reordered_address(reordered);
        let parts = instruction.fused_opcodes().len().max(1);
        let first = instruction.unreordered_address();
        for original in first..first + parts {
            reordering.entry(original).or_insert(reordered);
        }
    }
    reordering
}

fn resolve_labels(
    instructions: &mut [AcceleratorInstruction],
    memory: &Memory,
    reordering: &FxHashMap<usize, usize>,
) -> VmResult<()> {
    for instruction in instructions.iter_mut() {
        let jumps = matches!(instruction.opcode(), Opcode::Jmp | Opcode::Jmpn | Opcode::Call);
        if !jumps || instruction.is_fused() {
            continue;
        }
        let label = label_address(instruction.instruction(), memory)?;
        let reordered = reordering.get(&label).copied().ok_or_else(|| {
            RuntimeError::internal(format!(
                "label {label} of the instruction at {} names no instruction",
                instruction.unreordered_address()
            ))
        })?;
        instruction.set_reordered_label_address(reordered);
    }
    Ok(())
}
