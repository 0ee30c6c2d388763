//! Topological ordering driver (§4.4.2).
//!
//! The sort itself lives on [`Function::rebuild_order`] (§4.2); this is a
//! thin assembly-wide driver, kept separate so the pipeline can call
//! ordering without pulling in the rest of inference.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;
#[cfg(feature = "std")]
use std::vec::Vec;

use fieldgraph_assembly::assembly::Assembly;
use fieldgraph_graph::function::FunctionError;

/// Rebuilds the topological order of every dirty function in the
/// assembly. Returns the resource ids of functions whose order could not
/// be rebuilt due to a dangling port reference (§4.4.8); a cyclic
/// function is not reported here (it rebuilds successfully with
/// `is_valid() == false` and an incomplete order).
pub fn order_assembly(assembly: &mut Assembly) -> Vec<fieldgraph_core::value::ResourceId> {
    let mut failed = Vec::new();
    for function in assembly.functions_mut() {
        if !function.is_dirty() {
            continue;
        }
        if let Err(FunctionError::DanglingPortReference { .. }) = function.rebuild_order() {
            failed.push(function.resource_id());
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgraph_core::ops::Op;
    use fieldgraph_core::value::ResourceId;
    use fieldgraph_graph::node::NodeKind;

    #[test]
    fn order_assembly_rebuilds_every_dirty_function() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let function = assembly.add_if_missing(ResourceId::new(0), "Scene");
        let add1 = function.create_node(NodeKind::Math(Op::Add));
        let add2 = function.create_node(NodeKind::Math(Op::Add));
        let add1_out = function.node(add1).unwrap().outputs()[0];
        let add2_in = function.node(add2).unwrap().parameters()[0];
        function.link(add1_out, add2_in, true).unwrap();

        let failed = order_assembly(&mut assembly);
        assert!(failed.is_empty());
        let function = assembly.find(ResourceId::new(0)).unwrap();
        assert!(!function.is_dirty());
        assert_eq!(function.topological_order().len(), function.node_count());
    }
}
