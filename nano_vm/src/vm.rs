//! Virtual machine facade.
//!
//! The VirtualMachine selects the engine for a run: the accelerator, or the
//! generic processor when acceleration is disabled. It owns the monitor
//! through which other threads observe and stop a run.

use crate::accelerator::Accelerator;
use crate::config::VmConfig;
use crate::error::VmResult;
use crate::interconnect::Interconnect;
use crate::monitor::{Monitor, RunReport};
use crate::processor::GenericProcessor;
use nano_core::{Instruction, Memory};

/// The Nano virtual machine.
#[derive(Debug)]
pub struct VirtualMachine {
    config: VmConfig,
    accelerator: Accelerator,
    processor: GenericProcessor,
    monitor: Monitor,
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl VirtualMachine {
    /// Create a VM with `config`.
    pub fn new(config: VmConfig) -> Self {
        let monitor = Monitor::new(config.accelerator.terminator_enabled);
        Self {
            accelerator: Accelerator::new(config.accelerator.clone()),
            processor: GenericProcessor::new(),
            monitor,
            config,
        }
    }

    /// Active configuration.
    #[inline]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Run `instructions` against `memory`; the value passed to END is left
    /// in [`Memory::result`].
    pub fn execute(
        &self,
        instructions: &[Instruction],
        memory: &Memory,
        interconnect: &Interconnect,
    ) -> VmResult<RunReport> {
        if self.config.accelerator_enabled {
            self.accelerator.process(instructions, memory, interconnect, &self.monitor)
        } else {
            self.processor.run_monitored(instructions, memory, interconnect, &self.monitor)
        }
    }

    /// Handle for observing and stopping runs from another thread.
    pub fn monitor(&self) -> Monitor {
        self.monitor.clone()
    }

    /// Request the current run to stop.
    pub fn terminate(&self) -> VmResult<()> {
        self.monitor.terminate()
    }

    /// Clear a termination request so the next run starts normally.
    pub fn reset_terminator(&self) -> VmResult<()> {
        self.monitor.reset()
    }
}
