//! Dead-code elimination driver (§4.4.4).
//!
//! The removal itself lives on [`Function::simplify`] (§4.2); only
//! non-[`Function::managed`] functions are swept, since managed functions
//! (lowering's synthesized helpers) are built with exactly the nodes they
//! need and owned by the system, not the user.

use fieldgraph_assembly::assembly::Assembly;

/// Runs [`fieldgraph_graph::function::Function::simplify`] on every
/// non-managed function in the assembly. Returns the total node count
/// removed.
pub fn run_dce(assembly: &mut Assembly) -> usize {
    let mut removed = 0;
    for function in assembly.functions_mut() {
        if function.managed() {
            continue;
        }
        removed += function.simplify();
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgraph_core::ops::Op;
    use fieldgraph_core::value::ResourceId;
    use fieldgraph_graph::node::NodeKind;

    #[test]
    fn run_dce_skips_managed_functions() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let helper_id = assembly.insert_managed("Helper");
        let helper = assembly.find_mut(helper_id).unwrap();
        helper.create_node(NodeKind::Math(Op::Add));

        let removed = run_dce(&mut assembly);
        assert_eq!(removed, 0);
        assert_eq!(assembly.find(helper_id).unwrap().node_count(), 3);
    }

    #[test]
    fn run_dce_removes_unreachable_nodes_in_user_functions() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let function = assembly.add_if_missing(ResourceId::new(0), "Scene");
        function.create_node(NodeKind::Math(Op::Add));

        let removed = run_dce(&mut assembly);
        assert_eq!(removed, 1);
    }
}
