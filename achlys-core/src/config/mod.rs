//! Analysis configuration.

use serde::{Deserialize, Serialize};

use crate::logging::Verbosity;

/// Configuration for one analysis session.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AchlysConfig {
    /// Log density, 0..4. 0 silent; 1 function-level; 2 block-level;
    /// 3 instruction-level; 4 real-time (unbuffered). Default: 0.
    pub verbose: u8,
    /// Insert fault-injection hooks after retained hazards. Default: false.
    pub do_fault_injection: bool,
}

impl AchlysConfig {
    /// Returns the effective verbosity, clamping out-of-range levels.
    pub fn effective_verbosity(&self) -> Verbosity {
        Verbosity::from_level(self.verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_silent_analysis_only() {
        let config = AchlysConfig::default();
        assert_eq!(config.effective_verbosity(), Verbosity::Silent);
        assert!(!config.do_fault_injection);
    }
}
