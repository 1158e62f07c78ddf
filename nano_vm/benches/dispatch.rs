//! Dispatch Benchmarks
//!
//! Measures the cost of turning a program into a node graph: data
//! analysis, scheduling (with and without fusion), and node construction.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use nano_core::{DataContainer, DataType, Instruction, Memory, Opcode, OperandRef, Partition};
use nano_vm::{Accelerator, AcceleratorConfig, Interconnect};

/// Straight-line float64 code over `registers` cached scalars.
fn straight_line(registers: usize, repeats: usize) -> (Memory, Vec<Instruction>) {
    let types = &[DataType::Float64];
    let mut memory = Memory::new();
    memory.allocate(Partition::Register, registers).unwrap();
    let half = memory
        .push(Partition::Constant, DataContainer::scalar(0.5_f64))
        .unwrap();
    let half = OperandRef::constant(half);

    let mut code: Vec<Instruction> = (0..registers)
        .map(|i| Instruction::new(Opcode::Alloc, types, &[OperandRef::register(i)]))
        .collect();
    for _ in 0..repeats {
        for i in 1..registers {
            let (dest, src) = (OperandRef::register(i), OperandRef::register(i - 1));
            code.push(Instruction::new(Opcode::Mov, types, &[dest, half]));
            code.push(Instruction::new(Opcode::Mul, types, &[dest, src, half]));
            code.push(Instruction::new(Opcode::Add, types, &[dest, dest, src]));
        }
    }
    let result = OperandRef::register(0);
    code.push(Instruction::new(Opcode::End, types, &[OperandRef::placeholder(), result]));
    (memory, code)
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    let interconnect = Interconnect::new();

    for repeats in [10, 100] {
        let (memory, code) = straight_line(8, repeats);
        for level in [1, 2] {
            let accelerator = Accelerator::new(AcceleratorConfig {
                optimization_level: level,
                ..AcceleratorConfig::default()
            });
            group.bench_function(BenchmarkId::new(format!("o{level}"), code.len()), |b| {
                b.iter(|| black_box(accelerator.build(&code, &memory, &interconnect).unwrap()))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_build);
criterion_main!(benches);
