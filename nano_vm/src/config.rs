//! Engine configuration.

/// Optimization level at which every scalar cache is disabled.
pub const OPT_LEVEL_CACHE_DISABLED: u8 = 0;

/// Lowest optimization level that fuses arithmetic instructions.
pub const OPT_LEVEL_FUSION: u8 = 2;

/// Default initial capacity of the call stacks.
pub const DEFAULT_STACK_CAPACITY: usize = 1024;

/// What the dump writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpTarget {
    /// Every section below.
    All,
    /// Instructions as handed to the accelerator.
    InputCode,
    /// Scheduled instructions with their acceleration types.
    AcceleratorCode,
    /// Per-node listing of the dispatched graph.
    AcceleratorState,
}

/// Where the dump goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Accelerator configuration.
#[derive(Debug, Clone)]
pub struct AcceleratorConfig {
    /// Execute the graph after dispatch (false = dispatch only).
    pub run_enabled: bool,
    /// Write diagnostic dumps.
    pub dump_enabled: bool,
    /// Sections to dump.
    pub dump_target: DumpTarget,
    /// Destination of the dump.
    pub dump_stream: DumpStream,
    /// Honour cooperative termination requests.
    pub terminator_enabled: bool,
    /// 0 disables caches, 1 enables caches, 2+ also fuses instructions.
    pub optimization_level: u8,
    /// Initial capacity of the address and data stacks.
    pub initial_stack_capacity: usize,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            run_enabled: true,
            dump_enabled: false,
            dump_target: DumpTarget::All,
            dump_stream: DumpStream::Stdout,
            terminator_enabled: false,
            optimization_level: OPT_LEVEL_FUSION,
            initial_stack_capacity: DEFAULT_STACK_CAPACITY,
        }
    }
}

impl AcceleratorConfig {
    /// Build the graph without running it.
    #[inline]
    pub fn dispatch_only() -> Self {
        Self {
            run_enabled: false,
            ..Default::default()
        }
    }

    /// Configuration for tests (terminator on, small stacks to exercise growth).
    pub fn for_testing() -> Self {
        Self {
            terminator_enabled: true,
            initial_stack_capacity: 4,
            ..Default::default()
        }
    }

    /// Whether caches are allocated at all.
    #[inline]
    pub fn caches_enabled(&self) -> bool {
        self.optimization_level > OPT_LEVEL_CACHE_DISABLED
    }

    /// Whether the scheduler fuses instructions.
    #[inline]
    pub fn fusion_enabled(&self) -> bool {
        self.optimization_level >= OPT_LEVEL_FUSION
    }
}

/// Virtual machine configuration.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Run through the accelerator (false = generic processor).
    pub accelerator_enabled: bool,
    /// Accelerator settings.
    pub accelerator: AcceleratorConfig,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            accelerator_enabled: true,
            accelerator: AcceleratorConfig::default(),
        }
    }
}

impl VmConfig {
    /// Run on the generic processor only.
    #[inline]
    pub fn unaccelerated() -> Self {
        Self {
            accelerator_enabled: false,
            ..Default::default()
        }
    }

    /// Configuration for tests.
    pub fn for_testing() -> Self {
        Self {
            accelerator_enabled: true,
            accelerator: AcceleratorConfig::for_testing(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AcceleratorConfig::default();
        assert!(config.run_enabled);
        assert!(!config.terminator_enabled);
        assert!(config.caches_enabled());
        assert!(config.fusion_enabled());
        assert_eq!(config.initial_stack_capacity, 1024);
    }

    #[test]
    fn test_optimization_levels() {
        let mut config = AcceleratorConfig::default();
        config.optimization_level = 1;
        assert!(config.caches_enabled());
        assert!(!config.fusion_enabled());
        config.optimization_level = 0;
        assert!(!config.caches_enabled());
    }

    #[test]
    fn test_dispatch_only() {
        assert!(!AcceleratorConfig::dispatch_only().run_enabled);
        assert!(!VmConfig::unaccelerated().accelerator_enabled);
    }
}
