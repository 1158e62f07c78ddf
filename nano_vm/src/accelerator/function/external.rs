//! Host function calls (CALLX).
//!
//! Operands are `[result, function_index, arg0, arg1, ...]`. When the
//! callee needs no data conversion, every operand has a scalar cache, and
//! the callee accepts each of those caches, the caches are handed over
//! directly. Otherwise the call goes through memory.

use crate::accelerator::cache::ScalarCache;
use crate::accelerator::context::ExecutionContext;
use crate::accelerator::instruction::AcceleratorInstruction;
use crate::accelerator::node::{Execute, Flow};
use crate::accelerator::operand::{OperandInfo, Synchronizer};
use crate::accelerator::units::{BoxedOp, boxed};
use crate::error::{RuntimeError, VmResult};
use crate::interconnect::{ArgumentSlot, ExternalFunction, ExternalFunctionError, Interconnect};
use nano_core::{ContainerRef, DataType, Opcode};
use smallvec::SmallVec;
use std::rc::Rc;

const UNIT: &str = "external function control unit";

type Caches = SmallVec<[ScalarCache; 4]>;

/// Build the node for a CALLX.
pub fn generate(
    instruction: &AcceleratorInstruction,
    operands: &[OperandInfo],
    interconnect: &Interconnect,
) -> VmResult<BoxedOp> {
    let opcode = instruction.opcode();
    if opcode != Opcode::Callx {
        return Err(RuntimeError::invalid_opcode(opcode, UNIT));
    }
    if operands.len() < 2 {
        return Err(RuntimeError::invalid_operand_count(opcode, 2, operands.len()));
    }
    let function = resolve(interconnect, &operands[1])?;

    let result = &operands[0];
    let target = ResultTarget::new(result, instruction.data_type());

    if let Some(caches) = passable_caches(function.as_ref(), operands) {
        let by_reference = function.parameter_references().iter().all(|&r| r);
        return if by_reference {
            boxed(CachedReferenceCall {
                function,
                target,
                caches,
            })
        } else {
            let copied = (0..caches.len())
                .map(|slot| {
                    let references = function.parameter_references();
                    slot > 0 && !references.get(slot - 1).copied().unwrap_or(false)
                })
                .collect();
            boxed(CachedValueCall {
                function,
                target,
                caches,
                copied,
            })
        };
    }

    boxed(GeneralCall {
        function,
        target,
        result: Rc::clone(result.container()),
        arguments: operands[2..].iter().map(|operand| Rc::clone(operand.container())).collect(),
        sync: Synchronizer::new(operands),
    })
}

fn resolve(
    interconnect: &Interconnect,
    operand: &OperandInfo,
) -> VmResult<Rc<dyn ExternalFunction>> {
    let index = operand.container().get::<i64>()?;
    usize::try_from(index)
        .ok()
        .and_then(|index| interconnect.function(index))
        .cloned()
        .ok_or_else(|| RuntimeError::internal(format!("no external function at index {index}")))
}

/// Caches in call order (result first, then the arguments), if every one
/// of them may be passed to `function` as is.
fn passable_caches(function: &dyn ExternalFunction, operands: &[OperandInfo]) -> Option<Caches> {
    if function.is_data_conversion_necessary() {
        return None;
    }
    if !operands.iter().all(OperandInfo::is_cached_scalar) {
        return None;
    }
    let result = operands[0].cache()?;
    if !function.accepts_cache(ArgumentSlot::Return, result.data_type()) {
        return None;
    }
    let mut caches = Caches::new();
    caches.push(result.clone());
    for (i, operand) in operands[2..].iter().enumerate() {
        let cache = operand.cache()?;
        if !function.accepts_cache(ArgumentSlot::Parameter(i), cache.data_type()) {
            return None;
        }
        caches.push(cache.clone());
    }
    Some(caches)
}

/// Scalar result container that takes the return type on every call.
struct ResultTarget {
    container: Option<ContainerRef>,
    data_type: DataType,
}

impl ResultTarget {
    fn new(result: &OperandInfo, data_type: DataType) -> Self {
        let container = (result.scalar && data_type != DataType::Void)
            .then(|| Rc::clone(result.container()));
        Self {
            container,
            data_type,
        }
    }

    #[inline]
    fn prepare(&self) -> VmResult<()> {
        if let Some(container) = &self.container {
            container.reallocate(self.data_type, &[])?;
        }
        Ok(())
    }
}

fn failed(function: &dyn ExternalFunction, error: ExternalFunctionError) -> RuntimeError {
    RuntimeError::external(function.name(), error.to_string())
}

/// Every parameter is by reference: the engine's caches are passed as is.
struct CachedReferenceCall {
    function: Rc<dyn ExternalFunction>,
    target: ResultTarget,
    caches: Caches,
}

impl Execute for CachedReferenceCall {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.target.prepare()?;
        self.function
            .invoke_cached(&self.caches)
            .map_err(|error| failed(self.function.as_ref(), error))?;
        Ok(Flow::Next)
    }
}

/// By-value parameters get a fresh copy of their cache on every call.
struct CachedValueCall {
    function: Rc<dyn ExternalFunction>,
    target: ResultTarget,
    caches: Caches,
    copied: SmallVec<[bool; 4]>,
}

impl Execute for CachedValueCall {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.target.prepare()?;
        let passed: Caches = self
            .caches
            .iter()
            .zip(&self.copied)
            .map(|(cache, &copied)| if copied { cache.detached() } else { cache.clone() })
            .collect();
        self.function
            .invoke_cached(&passed)
            .map_err(|error| failed(self.function.as_ref(), error))?;
        Ok(Flow::Next)
    }
}

struct GeneralCall {
    function: Rc<dyn ExternalFunction>,
    target: ResultTarget,
    result: ContainerRef,
    arguments: SmallVec<[ContainerRef; 4]>,
    sync: Synchronizer,
}

impl Execute for GeneralCall {
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        self.target.prepare()?;
        self.sync.to_memory()?;
        self.function
            .invoke(&self.arguments, &self.result)
            .map_err(|error| failed(self.function.as_ref(), error))?;
        self.sync.to_cache()?;
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::units::tests::{cached_operand, memory_operand, run_op};
    use nano_core::{DataContainer, DataError, Instruction, OperandRef};
    use std::cell::Cell;

    /// `add(a, b) -> a + b` over float64, optionally cache-capable.
    struct Add {
        cached: bool,
        cached_calls: Rc<Cell<usize>>,
    }

    impl ExternalFunction for Add {
        fn name(&self) -> &str {
            "add"
        }

        fn parameter_references(&self) -> &[bool] {
            &[false, false]
        }

        fn return_type(&self) -> DataType {
            DataType::Float64
        }

        fn is_data_conversion_necessary(&self) -> bool {
            !self.cached
        }

        fn accepts_cache(&self, _slot: ArgumentSlot, data_type: DataType) -> bool {
            self.cached && data_type == DataType::Float64
        }

        fn invoke(
            &self,
            arguments: &[ContainerRef],
            result: &DataContainer,
        ) -> Result<(), ExternalFunctionError> {
            let sum = arguments
                .iter()
                .map(|a| a.get::<f64>())
                .sum::<Result<f64, DataError>>()
                .map_err(|e| ExternalFunctionError::Failed(e.to_string()))?;
            result.set(sum).map_err(|e| ExternalFunctionError::Failed(e.to_string()))
        }

        fn invoke_cached(&self, caches: &[ScalarCache]) -> Result<(), ExternalFunctionError> {
            self.cached_calls.set(self.cached_calls.get() + 1);
            let value = |i: usize| caches[i].typed::<f64>().map(|c| c.get()).unwrap_or_default();
            let sum = value(1) + value(2);
            // Writing into a by-value argument must not leak back.
            if let Some(arg) = caches[1].typed::<f64>() {
                arg.set(-1.0);
            }
            if let Some(result) = caches[0].typed::<f64>() {
                result.set(sum);
            }
            Ok(())
        }
    }

    struct Failing;

    impl ExternalFunction for Failing {
        fn name(&self) -> &str {
            "fail"
        }

        fn parameter_references(&self) -> &[bool] {
            &[]
        }

        fn return_type(&self) -> DataType {
            DataType::Void
        }

        fn invoke(
            &self,
            _arguments: &[ContainerRef],
            _result: &DataContainer,
        ) -> Result<(), ExternalFunctionError> {
            Err(ExternalFunctionError::Failed("boom".into()))
        }
    }

    fn callx(argument_count: usize, data_type: DataType) -> AcceleratorInstruction {
        let operands: Vec<OperandRef> = (0..argument_count + 2).map(OperandRef::register).collect();
        AcceleratorInstruction::new(Instruction::new(Opcode::Callx, &[data_type], &operands), 0)
    }

    #[test]
    fn test_cached_path_copies_by_value_arguments() {
        let calls = Rc::new(Cell::new(0));
        let mut interconnect = Interconnect::new();
        interconnect.register(Add {
            cached: true,
            cached_calls: Rc::clone(&calls),
        });
        let ops = [
            cached_operand(0.0_f64, false),
            cached_operand(0_i64, true),
            cached_operand(1.5_f64, false),
            cached_operand(2.0_f64, false),
        ];
        let node = generate(&callx(2, DataType::Float64), &ops, &interconnect).unwrap();
        run_op(&*node).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(ops[0].typed_cache::<f64>().unwrap().get(), 3.5);
        assert_eq!(ops[2].typed_cache::<f64>().unwrap().get(), 1.5);
    }

    #[test]
    fn test_general_path_syncs_through_memory() {
        let calls = Rc::new(Cell::new(0));
        let mut interconnect = Interconnect::new();
        interconnect.register(Add {
            cached: false,
            cached_calls: Rc::clone(&calls),
        });
        let ops = [
            cached_operand(0.0_f64, false),
            cached_operand(0_i64, true),
            cached_operand(1.5_f64, false),
            memory_operand(DataContainer::scalar(2.0_f64)),
        ];
        ops[2].typed_cache::<f64>().unwrap().set(4.0);
        let node = generate(&callx(2, DataType::Float64), &ops, &interconnect).unwrap();
        run_op(&*node).unwrap();
        assert_eq!(calls.get(), 0);
        assert_eq!(ops[0].typed_cache::<f64>().unwrap().get(), 6.0);
    }

    #[test]
    fn test_result_allocated_when_called() {
        let mut interconnect = Interconnect::new();
        interconnect.register(Add {
            cached: false,
            cached_calls: Rc::new(Cell::new(0)),
        });
        let mut result = memory_operand(DataContainer::new());
        result.scalar = true;
        let ops = [
            result,
            memory_operand(DataContainer::scalar(0_i64)),
            memory_operand(DataContainer::scalar(1.5_f64)),
            memory_operand(DataContainer::scalar(2.0_f64)),
        ];
        let node = generate(&callx(2, DataType::Float64), &ops, &interconnect).unwrap();
        assert_eq!(ops[0].container().data_type(), DataType::Void);
        assert!(!ops[0].container().is_allocated());

        run_op(&*node).unwrap();
        assert_eq!(ops[0].container().data_type(), DataType::Float64);
        assert_eq!(ops[0].container().get::<f64>(), Ok(3.5));
    }

    #[test]
    fn test_host_failure_propagates() {
        let mut interconnect = Interconnect::new();
        interconnect.register(Failing);
        let ops = [
            memory_operand(DataContainer::new()),
            memory_operand(DataContainer::scalar(0_i64)),
        ];
        let node = generate(&callx(0, DataType::Void), &ops, &interconnect).unwrap();
        let err = run_op(&*node).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_unknown_function_index() {
        let ops = [
            memory_operand(DataContainer::new()),
            memory_operand(DataContainer::scalar(9_i64)),
        ];
        assert!(generate(&callx(0, DataType::Void), &ops, &Interconnect::new()).is_err());
    }
}
