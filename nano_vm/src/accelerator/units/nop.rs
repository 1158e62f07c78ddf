//! Nop unit: NOP, LABEL, ENDPRM, ALLOCT and EX instructions with no
//! accelerator meaning.

use super::{BoxedOp, boxed};
use crate::accelerator::context::ExecutionContext;
use crate::accelerator::node::{Execute, Flow};
use crate::error::VmResult;

/// Build a node that only moves on.
pub fn generate() -> VmResult<BoxedOp> {
    boxed(Nop)
}

struct Nop;

impl Execute for Nop {
    #[inline(always)]
    fn execute(&self, _ctx: &mut ExecutionContext<'_>) -> VmResult<Flow> {
        Ok(Flow::Next)
    }
}
