//! Accelerator Execution Benchmarks
//!
//! Compares the accelerator at each optimization level against the generic
//! processor on the same programs.
//!
//! # Key Metrics
//!
//! - Cached scalar loop: level 2 well ahead of the processor
//! - Vector arithmetic: engines close, dominated by element work

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use nano_core::{DataContainer, DataType, Instruction, Memory, Opcode, OperandRef, Partition};
use nano_vm::{AcceleratorConfig, Interconnect, VirtualMachine, VmConfig};

const I64: &[DataType] = &[DataType::Int64];
const F64: &[DataType] = &[DataType::Float64];
const NONE: OperandRef = OperandRef::placeholder();

fn constant(memory: &mut Memory, container: DataContainer) -> OperandRef {
    OperandRef::constant(memory.push(Partition::Constant, container).unwrap())
}

/// `R0 = 0; do { R0 += 1 } while (R0 < limit)`
fn counting_loop(limit: i64) -> (Memory, Vec<Instruction>) {
    let mut memory = Memory::new();
    memory.allocate(Partition::Register, 2).unwrap();
    let zero = constant(&mut memory, DataContainer::scalar(0_i64));
    let one = constant(&mut memory, DataContainer::scalar(1_i64));
    let limit = constant(&mut memory, DataContainer::scalar(limit));
    let body = constant(&mut memory, DataContainer::scalar(3_i64));
    let (r0, r1) = (OperandRef::register(0), OperandRef::register(1));
    let code = vec![
        Instruction::new(Opcode::Alloc, I64, &[r0]),
        Instruction::new(Opcode::Alloc, &[DataType::Bool], &[r1]),
        Instruction::new(Opcode::Mov, I64, &[r0, zero]),
        Instruction::new(Opcode::Add, I64, &[r0, r0, one]),
        Instruction::new(Opcode::Lt, I64, &[r1, r0, limit]),
        Instruction::new(Opcode::Jmp, &[DataType::Bool], &[NONE, body, r1]),
        Instruction::new(Opcode::End, I64, &[NONE, r0]),
    ];
    (memory, code)
}

/// `R0 = G0 * G1 + G1` over float64 vectors.
fn vector_kernel(length: usize) -> (Memory, Vec<Instruction>) {
    let mut memory = Memory::new();
    memory.allocate(Partition::Register, 1).unwrap();
    let a = memory
        .push(Partition::Global, DataContainer::vector((0..length).map(|i| i as f64).collect()))
        .unwrap();
    let b = memory
        .push(Partition::Global, DataContainer::vector(vec![0.5; length]))
        .unwrap();
    let length = constant(&mut memory, DataContainer::scalar(length as i64));
    let (r0, a, b) = (OperandRef::register(0), OperandRef::global(a), OperandRef::global(b));
    let code = vec![
        Instruction::new(Opcode::Alloc, F64, &[r0, length]),
        Instruction::new(Opcode::Mul, F64, &[r0, a, b]),
        Instruction::new(Opcode::Add, F64, &[r0, r0, b]),
        Instruction::new(Opcode::End, F64, &[NONE, r0]),
    ];
    (memory, code)
}

fn engines() -> Vec<(String, VmConfig)> {
    let mut engines = vec![("processor".to_owned(), VmConfig::unaccelerated())];
    for level in 0..=2 {
        let config = VmConfig {
            accelerator: AcceleratorConfig {
                optimization_level: level,
                ..AcceleratorConfig::default()
            },
            ..VmConfig::default()
        };
        engines.push((format!("accelerator_o{level}"), config));
    }
    engines
}

// =============================================================================
// Scalar Loop
// =============================================================================

fn bench_counting_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("counting_loop");
    let (memory, code) = counting_loop(10_000);
    let interconnect = Interconnect::new();

    for (name, config) in engines() {
        let vm = VirtualMachine::new(config);
        group.bench_function(BenchmarkId::new(name, 10_000), |b| {
            b.iter(|| black_box(vm.execute(&code, &memory, &interconnect).unwrap()))
        });
    }

    group.finish();
}

// =============================================================================
// Vector Arithmetic
// =============================================================================

fn bench_vector_kernel(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_kernel");
    let interconnect = Interconnect::new();

    for length in [16, 1024] {
        let (memory, code) = vector_kernel(length);
        for (name, config) in engines() {
            let vm = VirtualMachine::new(config);
            group.bench_function(BenchmarkId::new(name, length), |b| {
                b.iter(|| black_box(vm.execute(&code, &memory, &interconnect).unwrap()))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_counting_loop, bench_vector_kernel);
criterion_main!(benches);
