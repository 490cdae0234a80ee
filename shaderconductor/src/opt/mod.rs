//! IR-to-IR optimization.
//!
//! Passes implement [`Pass`] and run under a [`PassManager`] until none of
//! them reports a change. The pipeline grows with the optimization level:
//! level 0 only legalizes control flow, level 3 adds dead-code elimination.
//! Every pass preserves observable behavior; resources, interface
//! variables and constant-buffer members are never removed.

mod combine;
mod const_fold;
mod dce;
mod legalize;

pub use combine::InstCombine;
pub use const_fold::ConstantFolding;
pub use dce::DeadCodeElimination;
pub use legalize::Legalize;

use crate::desc::OptionsDesc;
use crate::ir::Module;
use std::fmt::Debug;

/// An optimization pass over a whole module.
pub trait Pass: Debug {
    fn name(&self) -> &str;

    /// Runs the pass; returns `true` if anything changed.
    fn run(&self, module: &mut Module) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptLevel {
    O0,
    O1,
    O2,
    O3,
}

impl OptLevel {
    /// Levels above 3 behave like 3.
    pub fn from_level(level: u32) -> Self {
        match level {
            0 => OptLevel::O0,
            1 => OptLevel::O1,
            2 => OptLevel::O2,
            _ => OptLevel::O3,
        }
    }
}

const MAX_ITERATIONS: usize = 16;

#[derive(Debug, Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_level(level: OptLevel) -> Self {
        let mut pm = Self::new();
        pm.add_pass(Box::new(Legalize));
        if level >= OptLevel::O1 {
            pm.add_pass(Box::new(ConstantFolding));
        }
        if level >= OptLevel::O2 {
            pm.add_pass(Box::new(InstCombine));
        }
        if level >= OptLevel::O3 {
            pm.add_pass(Box::new(DeadCodeElimination));
        }
        pm
    }

    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs all passes until a fixed point or the iteration limit.
    pub fn run(&self, module: &mut Module) {
        for iteration in 0..MAX_ITERATIONS {
            let mut changed = false;
            for pass in &self.passes {
                if pass.run(module) {
                    log::trace!(target: "shaderconductor", "pass '{}' changed the module", pass.name());
                    changed = true;
                }
            }
            if !changed {
                debug_log!("optimizer reached a fixed point after {} iterations", iteration + 1);
                return;
            }
        }
        debug_log!("optimizer stopped at the iteration limit");
    }
}

/// Runs the pipeline selected by the options. Disabled optimization leaves
/// the module untouched.
pub fn optimize(module: &mut Module, options: &OptionsDesc) {
    if options.disable_optimizations {
        debug_log!("optimizations disabled");
        return;
    }
    let level = OptLevel::from_level(options.optimization_level);
    let pm = PassManager::for_level(level);
    debug_log!("optimizing at {:?}: {:?}", level, pm.pass_names());
    pm.run(module);
    dump_ir!("optimize", module);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_grows_with_level() {
        assert_eq!(PassManager::for_level(OptLevel::O0).pass_names(), ["legalize"]);
        assert_eq!(
            PassManager::for_level(OptLevel::O3).pass_names(),
            ["legalize", "const-fold", "inst-combine", "dce"]
        );
    }

    #[test]
    fn test_level_clamps() {
        assert_eq!(OptLevel::from_level(7), OptLevel::O3);
        assert_eq!(OptLevel::from_level(1), OptLevel::O1);
    }

    #[test]
    fn test_empty_module() {
        let mut module = Module::new("empty.hlsl");
        PassManager::for_level(OptLevel::O3).run(&mut module);
        assert!(module.functions.is_empty());
    }
}
