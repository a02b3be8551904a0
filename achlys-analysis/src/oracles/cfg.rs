//! Control-flow scaffolding: petgraph CFG, dominator tree, reverse
//! post-order.

use achlys_core::ir::{BlockId, Function};
use achlys_core::traits::DominanceOracle;
use petgraph::algo::dominators::{simple_fast, Dominators};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::DfsPostOrder;

/// The control-flow graph of one function body.
pub struct FunctionCfg {
    graph: DiGraph<BlockId, ()>,
    node_of: Vec<NodeIndex>,
    doms: Dominators<NodeIndex>,
    rpo: Vec<BlockId>,
}

impl FunctionCfg {
    pub fn analyze(func: &Function) -> Self {
        let mut graph = DiGraph::new();
        let node_of: Vec<NodeIndex> = (0..func.blocks.len())
            .map(|idx| graph.add_node(BlockId(idx as u32)))
            .collect();
        for idx in 0..func.blocks.len() {
            let block = BlockId(idx as u32);
            for succ in func.successors(block) {
                graph.add_edge(node_of[idx], node_of[succ.index()], ());
            }
        }

        let entry = node_of[0];
        let doms = simple_fast(&graph, entry);

        let mut post = Vec::with_capacity(func.blocks.len());
        let mut dfs = DfsPostOrder::new(&graph, entry);
        while let Some(node) = dfs.next(&graph) {
            post.push(graph[node]);
        }
        post.reverse();

        Self {
            graph,
            node_of,
            doms,
            rpo: post,
        }
    }

    /// Blocks in reverse post-order from the entry. Unreachable blocks are
    /// absent.
    pub fn reverse_post_order(&self) -> &[BlockId] {
        &self.rpo
    }

    /// Predecessor blocks of `block`.
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.graph
            .neighbors_directed(self.node_of[block.index()], petgraph::Direction::Incoming)
            .map(|n| self.graph[n])
            .collect()
    }

    /// The dominator chain of `block`, from itself up to the entry.
    /// Empty for unreachable blocks.
    fn dom_chain(&self, block: BlockId) -> Vec<NodeIndex> {
        let mut chain = Vec::new();
        let mut current = self.node_of[block.index()];
        // The entry dominates itself; detect unreachable blocks by the
        // absence of an idom anywhere on the chain.
        if block.index() != 0 && self.doms.immediate_dominator(current).is_none() {
            return chain;
        }
        loop {
            chain.push(current);
            match self.doms.immediate_dominator(current) {
                Some(idom) => current = idom,
                None => break,
            }
        }
        chain
    }
}

impl DominanceOracle for FunctionCfg {
    fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        let target = self.node_of[a.index()];
        self.dom_chain(b).contains(&target)
    }

    fn nearest_common_dominator(&self, a: BlockId, b: BlockId) -> Option<BlockId> {
        let chain_a = self.dom_chain(a);
        if chain_a.is_empty() {
            return None;
        }
        self.dom_chain(b)
            .into_iter()
            .find(|n| chain_a.contains(n))
            .map(|n| self.graph[n])
    }
}
