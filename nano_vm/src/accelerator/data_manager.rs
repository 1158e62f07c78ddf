//! Scalar and cache analysis of a program's operands.
//!
//! Before scheduling, every addressable cell gets two facts:
//!
//! - whether it stays scalar for the whole run
//! - whether it is mirrored by a [`ScalarCache`]
//!
//! CONSTANT and GLOBAL cells are judged from their current containers.
//! LOCAL and REGISTER cells are judged from the instructions writing them,
//! and any cell that may be aliased through a reference loses its cache.

use super::cache::ScalarCache;
use super::operand::{Operand, OperandInfo};
use crate::error::{RuntimeError, VmResult};
use crate::interconnect::{ExternalFunction, Interconnect};
use nano_core::{
    DataContainer, DataError, DataResult, DataType, Instruction, Memory, Opcode, OperandRef,
    Partition,
};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::rc::Rc;
use tracing::debug;

/// Facts about the cells of one partition.
#[derive(Debug, Default)]
struct PartitionTable {
    scalar: Vec<bool>,
    caches: Vec<Option<ScalarCache>>,
}

impl PartitionTable {
    fn with_size(size: usize) -> Self {
        Self {
            scalar: vec![false; size],
            caches: vec![None; size],
        }
    }

    fn mark_scalar(&mut self, address: usize, data_type: DataType) {
        if let Some(scalar) = self.scalar.get_mut(address) {
            *scalar = true;
        }
        if let Some(cache) = self.caches.get_mut(address) {
            *cache = ScalarCache::new(data_type);
        }
    }

    fn disable_cache(&mut self, address: usize) {
        if let Some(cache) = self.caches.get_mut(address) {
            *cache = None;
        }
    }
}

/// Per-cell scalar and cache facts for one program.
#[derive(Debug)]
pub struct DataManager {
    tables: [PartitionTable; Partition::COUNT],
}

impl DataManager {
    /// Analyze `instructions` against the current contents of `memory`.
    ///
    /// With `caches_enabled` false every operand goes through memory.
    pub fn analyze(
        instructions: &[Instruction],
        memory: &Memory,
        interconnect: &Interconnect,
        caches_enabled: bool,
    ) -> VmResult<Self> {
        let mut tables: [PartitionTable; Partition::COUNT] = Default::default();
        for partition in Partition::ALL {
            tables[partition.index()] = PartitionTable::with_size(memory.size(partition));
        }
        let mut manager = Self { tables };

        manager.analyze_stored(memory, Partition::Constant);
        manager.analyze_stored(memory, Partition::Global);
        let none = manager.table_mut(Partition::None);
        none.scalar.fill(true);
        none.caches.fill(Some(ScalarCache::Void));

        for instruction in instructions {
            manager.analyze_destination(instruction, memory, interconnect)?;
        }
        let parameter_references = internal_parameter_references(instructions, memory)?;
        for instruction in instructions {
            manager.analyze_references(instruction, memory, interconnect, &parameter_references)?;
        }

        if !caches_enabled {
            for table in &mut manager.tables {
                table.caches.iter_mut().for_each(|cache| *cache = None);
            }
        }

        let scalars: usize = manager
            .tables
            .iter()
            .map(|t| t.scalar.iter().filter(|&&s| s).count())
            .sum();
        debug!(
            scalars,
            cached = manager.cached_count(),
            caches_enabled,
            "data analysis finished"
        );
        Ok(manager)
    }

    fn table(&self, partition: Partition) -> &PartitionTable {
        &self.tables[partition.index()]
    }

    fn table_mut(&mut self, partition: Partition) -> &mut PartitionTable {
        &mut self.tables[partition.index()]
    }

    fn analyze_stored(&mut self, memory: &Memory, partition: Partition) {
        let table = self.table_mut(partition);
        for (address, container) in memory.containers(partition).iter().enumerate() {
            if container.rank() == 0 {
                table.mark_scalar(address, container.data_type());
            }
        }
    }

    /// Scalar writes into LOCAL and REGISTER cells.
    fn analyze_destination(
        &mut self,
        instruction: &Instruction,
        memory: &Memory,
        interconnect: &Interconnect,
    ) -> VmResult<()> {
        let Some(&dest) = instruction.operands().first() else {
            return Ok(());
        };
        if !matches!(dest.partition, Partition::Local | Partition::Register) {
            return Ok(());
        }
        self.check_address(dest)?;
        let data_type = instruction.data_type();
        let scalar = match instruction.opcode() {
            Opcode::Alloc | Opcode::Alloct => instruction.operand_count() == 1,
            Opcode::Allocr => instruction.operands().get(1).is_some_and(|&src| self.is_scalar(src)),
            Opcode::Movelm | Opcode::Refelm => true,
            Opcode::Callx => {
                external_function(instruction, memory, interconnect)?.return_rank() == Some(0)
            }
            _ => false,
        };
        if scalar {
            let table = self.table_mut(dest.partition);
            table.mark_scalar(dest.address, data_type);
            if instruction.opcode() == Opcode::Refelm {
                table.disable_cache(dest.address);
            }
        }
        Ok(())
    }

    /// Cells that may be aliased lose their cache.
    fn analyze_references(
        &mut self,
        instruction: &Instruction,
        memory: &Memory,
        interconnect: &Interconnect,
        parameter_references: &FxHashMap<usize, SmallVec<[bool; 4]>>,
    ) -> VmResult<()> {
        let operands = instruction.operands();
        match instruction.opcode() {
            Opcode::Ref | Opcode::Refpop => {
                if let Some(&dest) = operands.first() {
                    self.table_mut(dest.partition).disable_cache(dest.address);
                }
            }
            Opcode::Call => {
                let entry = label_address(instruction, memory)?;
                let references =
                    parameter_references.get(&entry).map(SmallVec::as_slice).unwrap_or(&[]);
                for (argument, &by_reference) in operands.iter().skip(2).zip(references) {
                    if by_reference {
                        self.table_mut(argument.partition).disable_cache(argument.address);
                    }
                }
            }
            Opcode::Callx => {
                let function = external_function(instruction, memory, interconnect)?;
                let references = function.parameter_references();
                let constants = function.parameter_constants();
                for (i, argument) in operands.iter().skip(2).enumerate() {
                    let by_reference = references.get(i).copied().unwrap_or(false);
                    let constant = constants.get(i).copied().unwrap_or(false);
                    if by_reference && !constant {
                        self.table_mut(argument.partition).disable_cache(argument.address);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn check_address(&self, operand: OperandRef) -> VmResult<()> {
        let size = self.table(operand.partition).scalar.len();
        if operand.address < size {
            Ok(())
        } else {
            Err(DataError::AddressOutOfRange {
                partition: operand.partition,
                address: operand.address,
                size,
            }
            .into())
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Whether the cell stays scalar.
    #[inline]
    pub fn is_scalar(&self, operand: OperandRef) -> bool {
        self.table(operand.partition)
            .scalar
            .get(operand.address)
            .copied()
            .unwrap_or(false)
    }

    /// Cache of the cell, if it has one.
    #[inline]
    pub fn cache(&self, operand: OperandRef) -> Option<&ScalarCache> {
        self.table(operand.partition)
            .caches
            .get(operand.address)
            .and_then(Option::as_ref)
    }

    /// Number of cells mirrored by a real cache.
    pub fn cached_count(&self) -> usize {
        self.tables
            .iter()
            .flat_map(|table| &table.caches)
            .filter(|cache| matches!(cache, Some(c) if !c.is_void()))
            .count()
    }

    /// Resolve `operand` against `memory` into a handle for node construction.
    pub fn operand(&self, operand: OperandRef, memory: &Memory) -> VmResult<OperandInfo> {
        let container = memory.container(operand.partition, operand.address)?;
        let handle = match self.cache(operand) {
            Some(cache) => Operand::Cached(container, cache.clone()),
            None => Operand::Memory(container),
        };
        Ok(OperandInfo {
            handle,
            scalar: self.is_scalar(operand),
            constant: operand.partition == Partition::Constant,
        })
    }

    // =========================================================================
    // Bulk Synchronization
    // =========================================================================

    /// Write every cache of `partition` into memory.
    pub fn to_memory(&self, partition: Partition, memory: &Memory) -> DataResult<()> {
        self.for_each_cached(partition, memory, |cache, container| cache.to_memory(container))
    }

    /// Reload every cache of `partition` from memory.
    pub fn to_cache(&self, partition: Partition, memory: &Memory) -> DataResult<()> {
        self.for_each_cached(partition, memory, |cache, container| cache.to_cache(container))
    }

    fn for_each_cached(
        &self,
        partition: Partition,
        memory: &Memory,
        mut sync: impl FnMut(&ScalarCache, &DataContainer) -> DataResult<()>,
    ) -> DataResult<()> {
        let caches = &self.table(partition).caches;
        for (cache, container) in caches.iter().zip(memory.containers(partition)) {
            if let Some(cache) = cache {
                sync(cache, container)?;
            }
        }
        Ok(())
    }
}

/// Label, entry address, or function index held by the constant operand 1.
pub(crate) fn label_address(instruction: &Instruction, memory: &Memory) -> VmResult<usize> {
    let (opcode, count) = (instruction.opcode(), instruction.operand_count());
    let operand = instruction
        .operands()
        .get(1)
        .ok_or_else(|| RuntimeError::invalid_operand_count(opcode, 2, count))?;
    let address = memory.container(operand.partition, operand.address)?.get::<i64>()?;
    usize::try_from(address)
        .map_err(|_| RuntimeError::internal(format!("negative label address {address}")))
}

fn external_function<'a>(
    instruction: &Instruction,
    memory: &Memory,
    interconnect: &'a Interconnect,
) -> VmResult<&'a Rc<dyn ExternalFunction>> {
    let index = label_address(instruction, memory)?;
    interconnect
        .function(index)
        .ok_or_else(|| RuntimeError::internal(format!("no external function at index {index}")))
}

/// By-reference flags of each called script function's parameters, keyed by entry address.
///
/// Parameters are popped at the head of the function body, last argument
/// first: MOVPOP takes one by value, REFPOP by reference.
fn internal_parameter_references(
    instructions: &[Instruction],
    memory: &Memory,
) -> VmResult<FxHashMap<usize, SmallVec<[bool; 4]>>> {
    let mut references = FxHashMap::default();
    for call in instructions.iter().filter(|i| i.opcode() == Opcode::Call) {
        let entry = label_address(call, memory)?;
        let count = call.operand_count().saturating_sub(2);
        if references.contains_key(&entry) {
            continue;
        }
        let mut flags = SmallVec::new();
        let mut address = entry;
        while flags.len() < count {
            let instruction = instructions.get(address).ok_or_else(|| {
                RuntimeError::internal(format!(
                    "parameters of the function at {entry} run past the code"
                ))
            })?;
            match instruction.opcode() {
                Opcode::Pop | Opcode::Movpop => flags.push(false),
                Opcode::Refpop => flags.push(true),
                Opcode::Endfun => {
                    return Err(RuntimeError::internal(format!(
                        "function at {entry} ended before popping {count} parameters"
                    )));
                }
                _ => {}
            }
            address += 1;
        }
        flags.reverse();
        references.insert(entry, flags);
    }
    Ok(references)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interconnect::ExternalFunctionError;
    use nano_core::ContainerRef;

    fn memory(registers: usize, locals: usize) -> Memory {
        let mut memory = Memory::new();
        memory.allocate(Partition::Register, registers).unwrap();
        memory.allocate(Partition::Local, locals).unwrap();
        memory
    }

    fn alloc(dest: OperandRef, data_type: DataType) -> Instruction {
        Instruction::new(Opcode::Alloc, &[data_type], &[dest])
    }

    #[test]
    fn test_constants_and_globals_by_content() {
        let mut memory = memory(0, 0);
        memory.push(Partition::Constant, DataContainer::scalar(1_i64)).unwrap();
        memory.push(Partition::Constant, DataContainer::string("s")).unwrap();
        memory.push(Partition::Global, DataContainer::vector(vec![1.0_f64, 2.0])).unwrap();
        memory.push(Partition::Global, DataContainer::scalar(true)).unwrap();
        let manager = DataManager::analyze(&[], &memory, &Interconnect::new(), true).unwrap();

        assert!(manager.cache(OperandRef::constant(0)).is_some());
        assert!(manager.is_scalar(OperandRef::constant(1)));
        assert!(manager.cache(OperandRef::constant(1)).is_none());
        assert!(!manager.is_scalar(OperandRef::global(0)));
        assert!(manager.cache(OperandRef::global(1)).is_some());
        assert_eq!(manager.cached_count(), 2);

        let info = manager.operand(OperandRef::constant(0), &memory).unwrap();
        assert!(info.constant && info.is_cached_scalar());
    }

    #[test]
    fn test_scalar_destinations() {
        let memory = memory(4, 2);
        let code = [
            alloc(OperandRef::register(0), DataType::Int64),
            Instruction::new(
                Opcode::Alloc,
                &[DataType::Float64],
                &[OperandRef::register(1), OperandRef::constant(0)],
            ),
            Instruction::new(
                Opcode::Movelm,
                &[DataType::Float64],
                &[OperandRef::register(2), OperandRef::register(1), OperandRef::register(0)],
            ),
            Instruction::new(
                Opcode::Refelm,
                &[DataType::Float64],
                &[OperandRef::register(3), OperandRef::register(1), OperandRef::register(0)],
            ),
            Instruction::new(
                Opcode::Allocr,
                &[DataType::Int64],
                &[OperandRef::local(0), OperandRef::register(0)],
            ),
            Instruction::new(
                Opcode::Allocr,
                &[DataType::Float64],
                &[OperandRef::local(1), OperandRef::register(1)],
            ),
        ];
        let manager = DataManager::analyze(&code, &memory, &Interconnect::new(), true).unwrap();

        assert!(manager.cache(OperandRef::register(0)).is_some());
        assert!(!manager.is_scalar(OperandRef::register(1)));
        assert!(manager.cache(OperandRef::register(2)).is_some());
        assert!(manager.is_scalar(OperandRef::register(3)));
        assert!(manager.cache(OperandRef::register(3)).is_none());
        assert!(manager.cache(OperandRef::local(0)).is_some());
        assert!(!manager.is_scalar(OperandRef::local(1)));
    }

    #[test]
    fn test_string_scalar_not_cached() {
        let memory = memory(1, 0);
        let code = [alloc(OperandRef::register(0), DataType::String)];
        let manager = DataManager::analyze(&code, &memory, &Interconnect::new(), true).unwrap();
        assert!(manager.is_scalar(OperandRef::register(0)));
        assert!(manager.cache(OperandRef::register(0)).is_none());
    }

    #[test]
    fn test_references_disable_caches() {
        let mut memory = memory(2, 3);
        let entry = memory.push(Partition::Constant, DataContainer::scalar(7_i64)).unwrap();
        let code = [
            alloc(OperandRef::register(0), DataType::Int64),
            alloc(OperandRef::register(1), DataType::Int64),
            alloc(OperandRef::local(0), DataType::Int64),
            Instruction::new(
                Opcode::Ref,
                &[DataType::Int64],
                &[OperandRef::register(1), OperandRef::register(0)],
            ),
            Instruction::new(
                Opcode::Call,
                &[DataType::Void],
                &[
                    OperandRef::placeholder(),
                    OperandRef::constant(entry),
                    OperandRef::register(0),
                    OperandRef::local(0),
                ],
            ),
            Instruction::new(Opcode::Nop, &[DataType::Void], &[]),
            Instruction::new(Opcode::End, &[DataType::Void], &[]),
            // Second argument is popped first.
            Instruction::new(Opcode::Refpop, &[DataType::Int64], &[OperandRef::local(2)]),
            Instruction::new(Opcode::Movpop, &[DataType::Int64], &[OperandRef::local(1)]),
            Instruction::new(Opcode::Ret, &[DataType::Void], &[]),
        ];
        let manager = DataManager::analyze(&code, &memory, &Interconnect::new(), true).unwrap();

        assert!(manager.cache(OperandRef::register(1)).is_none());
        assert!(manager.cache(OperandRef::register(0)).is_some());
        assert!(manager.cache(OperandRef::local(0)).is_none());
        assert!(manager.cache(OperandRef::local(2)).is_none());
    }

    struct Swap;

    impl ExternalFunction for Swap {
        fn name(&self) -> &str {
            "swap"
        }

        fn parameter_references(&self) -> &[bool] {
            &[true, true]
        }

        fn parameter_constants(&self) -> &[bool] {
            &[false, true]
        }

        fn return_type(&self) -> DataType {
            DataType::Int64
        }

        fn invoke(
            &self,
            _arguments: &[ContainerRef],
            _result: &DataContainer,
        ) -> Result<(), ExternalFunctionError> {
            Ok(())
        }
    }

    #[test]
    fn test_external_call() {
        let mut memory = memory(3, 0);
        let index = memory.push(Partition::Constant, DataContainer::scalar(0_i64)).unwrap();
        let mut interconnect = Interconnect::new();
        interconnect.register(Swap);
        let code = [
            alloc(OperandRef::register(1), DataType::Int64),
            alloc(OperandRef::register(2), DataType::Int64),
            Instruction::new(
                Opcode::Callx,
                &[DataType::Int64],
                &[
                    OperandRef::register(0),
                    OperandRef::constant(index),
                    OperandRef::register(1),
                    OperandRef::register(2),
                ],
            ),
        ];
        let manager = DataManager::analyze(&code, &memory, &interconnect, true).unwrap();
        assert!(manager.cache(OperandRef::register(0)).is_some());
        assert!(manager.cache(OperandRef::register(1)).is_none());
        assert!(manager.cache(OperandRef::register(2)).is_some());
    }

    #[test]
    fn test_function_without_enough_pops() {
        let mut memory = memory(1, 0);
        let entry = memory.push(Partition::Constant, DataContainer::scalar(1_i64)).unwrap();
        let code = [
            Instruction::new(
                Opcode::Call,
                &[DataType::Void],
                &[OperandRef::placeholder(), OperandRef::constant(entry), OperandRef::register(0)],
            ),
            Instruction::new(Opcode::Endfun, &[DataType::Void], &[]),
        ];
        assert!(DataManager::analyze(&code, &memory, &Interconnect::new(), true).is_err());
    }

    #[test]
    fn test_caches_disabled() {
        let mut memory = memory(1, 0);
        memory.push(Partition::Constant, DataContainer::scalar(1_i64)).unwrap();
        let code = [alloc(OperandRef::register(0), DataType::Int64)];
        let manager = DataManager::analyze(&code, &memory, &Interconnect::new(), false).unwrap();
        assert_eq!(manager.cached_count(), 0);
        assert!(manager.is_scalar(OperandRef::register(0)));
        assert!(manager.cache(OperandRef::placeholder()).is_none());
    }

    #[test]
    fn test_bulk_sync() {
        let mut memory = memory(0, 0);
        memory.push(Partition::Global, DataContainer::scalar(5_i64)).unwrap();
        let manager = DataManager::analyze(&[], &memory, &Interconnect::new(), true).unwrap();
        manager.to_cache(Partition::Global, &memory).unwrap();
        let cache = manager.cache(OperandRef::global(0)).unwrap().typed::<i64>().unwrap().clone();
        assert_eq!(cache.get(), 5);
        cache.set(9);
        manager.to_memory(Partition::Global, &memory).unwrap();
        assert_eq!(memory.container(Partition::Global, 0).unwrap().get::<i64>(), Ok(9));
    }
}
