//! Shared builders for the integration tests.

#![allow(dead_code)]

use nano_core::{
    ContainerRef, DataContainer, DataType, Element, Instruction, Memory, Opcode, OperandRef,
    Partition,
};
use nano_vm::{Interconnect, RunReport, VirtualMachine, VmConfig, VmResult};

pub const I64: &[DataType] = &[DataType::Int64];
pub const F64: &[DataType] = &[DataType::Float64];
pub const BOOL: &[DataType] = &[DataType::Bool];
pub const STRING: &[DataType] = &[DataType::String];
pub const VOID: &[DataType] = &[DataType::Void];

pub const NONE: OperandRef = OperandRef::placeholder();

pub const fn r(address: usize) -> OperandRef {
    OperandRef::register(address)
}

pub const fn l(address: usize) -> OperandRef {
    OperandRef::local(address)
}

/// Install a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A program together with the memory it runs against.
pub struct Program {
    pub memory: Memory,
    pub code: Vec<Instruction>,
}

impl Program {
    /// Empty program with `registers` registers and `locals` locals.
    pub fn new(registers: usize, locals: usize) -> Self {
        let mut memory = Memory::new();
        memory.allocate(Partition::Register, registers).unwrap();
        memory.allocate(Partition::Local, locals).unwrap();
        Self {
            memory,
            code: Vec::new(),
        }
    }

    pub fn constant<T: Element>(&mut self, value: T) -> OperandRef {
        self.constant_container(DataContainer::scalar(value))
    }

    pub fn string_constant(&mut self, value: &str) -> OperandRef {
        self.constant_container(DataContainer::string(value))
    }

    pub fn constant_container(&mut self, container: DataContainer) -> OperandRef {
        OperandRef::constant(self.memory.push(Partition::Constant, container).unwrap())
    }

    pub fn global(&mut self, container: DataContainer) -> OperandRef {
        OperandRef::global(self.memory.push(Partition::Global, container).unwrap())
    }

    /// Label constant pointing at `address`.
    pub fn label(&mut self, address: usize) -> OperandRef {
        self.constant(address as i64)
    }

    /// Point an existing label at `address`.
    pub fn set_label(&mut self, label: OperandRef, address: usize) {
        self.memory
            .store(Partition::Constant, label.address, DataContainer::scalar(address as i64))
            .unwrap();
    }

    /// Append an instruction and return its address.
    pub fn emit(
        &mut self,
        opcode: Opcode,
        data_types: &[DataType],
        operands: &[OperandRef],
    ) -> usize {
        self.code.push(Instruction::new(opcode, data_types, operands));
        self.code.len() - 1
    }

    /// Address the next emitted instruction will get.
    pub fn next_address(&self) -> usize {
        self.code.len()
    }

    pub fn run(&self, config: VmConfig) -> VmResult<RunReport> {
        self.run_with(config, &Interconnect::new())
    }

    pub fn run_with(&self, config: VmConfig, interconnect: &Interconnect) -> VmResult<RunReport> {
        VirtualMachine::new(config).execute(&self.code, &self.memory, interconnect)
    }

    /// Value left by END.
    pub fn result(&self) -> ContainerRef {
        self.memory.result().expect("program did not reach END")
    }

    pub fn container(&self, operand: OperandRef) -> ContainerRef {
        self.memory.container(operand.partition, operand.address).unwrap()
    }
}

/// Comparable contents of a container.
#[derive(Debug, PartialEq)]
pub enum Snapshot {
    Void,
    Int64(Vec<i64>, Vec<usize>),
    /// Bit patterns, with every NaN folded onto one.
    Float64(Vec<u64>, Vec<usize>),
    Bool(Vec<bool>, Vec<usize>),
    String(String),
}

pub fn snapshot(container: &DataContainer) -> Snapshot {
    let lengths = container.lengths().to_vec();
    match container.data_type() {
        DataType::Void => Snapshot::Void,
        DataType::Int64 => Snapshot::Int64(container.to_vec().unwrap(), lengths),
        DataType::Float64 => Snapshot::Float64(
            container
                .to_vec::<f64>()
                .unwrap()
                .into_iter()
                .map(|v| if v.is_nan() { f64::NAN.to_bits() } else { v.to_bits() })
                .collect(),
            lengths,
        ),
        DataType::Bool => Snapshot::Bool(container.to_vec().unwrap(), lengths),
        DataType::String => Snapshot::String(container.get_string().unwrap()),
    }
}
