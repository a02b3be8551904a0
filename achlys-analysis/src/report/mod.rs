//! The structured hazard report.

use achlys_core::ir::{render_value, FunctionId, Module};
use achlys_core::types::collections::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::collapse::AttackerNanSet;
use crate::graph::TaintDepGraph;

/// One retained attacker-controlled NaN hazard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hazard {
    /// Session-unique NaN origination id.
    pub nan_id: u32,
    /// Owning function.
    pub function: String,
    /// Rendered culprit instruction.
    pub instruction: String,
    /// Source line from debug metadata, when present.
    pub source_line: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HazardReport {
    pub hazards: Vec<Hazard>,
}

impl HazardReport {
    pub fn len(&self) -> usize {
        self.hazards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hazards.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Build the report from the filtered attacker-NaN set.
pub fn build_report(
    module: &Module,
    graphs: &FxHashMap<FunctionId, TaintDepGraph>,
    set: &AttackerNanSet,
) -> HazardReport {
    let mut hazards = Vec::with_capacity(set.len());
    for (function, node_id) in set.iter() {
        let Some(graph) = graphs.get(&function) else {
            continue;
        };
        let func = module.function(function);
        let node = graph.node(node_id);
        hazards.push(Hazard {
            nan_id: node.nan_source_id.map(|id| id.0).unwrap_or(0),
            function: func.name.clone(),
            instruction: render_value(func, node.value),
            source_line: func
                .instruction(node.value)
                .and_then(|inst| inst.source_line),
        });
    }
    HazardReport { hazards }
}
