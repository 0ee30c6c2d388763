//! The function table (§3 "Assembly", §4.3).

#[cfg(not(feature = "std"))]
use alloc::{collections::BTreeMap, string::String};
#[cfg(feature = "std")]
use std::collections::BTreeMap;

use core::fmt;

use fieldgraph_core::value::{ResourceId, Value};
use fieldgraph_graph::function::Function;

/// A failure resolving the assembly's distinguished entry function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    /// The assembly's designated entry resource id has no function.
    MissingAssemblyFunction { id: ResourceId },
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyError::MissingAssemblyFunction { id } => {
                write!(f, "assembly function {} is missing", id.0)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AssemblyError {}

/// Mapping from resource id to function, with one distinguished id as the
/// top-level entry point (§3 "Assembly"). `Begin.Pos` of the assembly
/// function is the query position; its `End.Shape,Color` are the scene
/// distance and color.
#[derive(Debug, Clone)]
pub struct Assembly {
    functions: BTreeMap<ResourceId, Function>,
    assembly_function: ResourceId,
    /// Substituted for the assembly's distance output when it is NaN/Inf
    /// (§4.5.1).
    fallback: Option<Value>,
    next_resource_id: u32,
}

impl Assembly {
    /// Creates an assembly whose entry function is `assembly_function`;
    /// callers are responsible for inserting it (via
    /// [`Self::add_if_missing`]) before running any pass.
    pub fn new(assembly_function: ResourceId) -> Self {
        Self {
            functions: BTreeMap::new(),
            assembly_function,
            fallback: None,
            next_resource_id: assembly_function.0.wrapping_add(1),
        }
    }

    pub fn assembly_function_id(&self) -> ResourceId {
        self.assembly_function
    }

    pub fn assembly_function(&self) -> Option<&Function> {
        self.functions.get(&self.assembly_function)
    }

    /// As [`Self::assembly_function`], but reported as an
    /// [`AssemblyError`] rather than silently skipped — used by backend
    /// drivers, for which a missing entry function is fatal (§4.5).
    pub fn require_assembly_function(&self) -> Result<&Function, AssemblyError> {
        self.assembly_function().ok_or(AssemblyError::MissingAssemblyFunction { id: self.assembly_function })
    }

    pub fn fallback(&self) -> Option<Value> {
        self.fallback
    }

    pub fn set_fallback(&mut self, fallback: Option<Value>) {
        self.fallback = fallback;
    }

    /// *Find function* (§4.3).
    pub fn find(&self, id: ResourceId) -> Option<&Function> {
        self.functions.get(&id)
    }

    pub fn find_mut(&mut self, id: ResourceId) -> Option<&mut Function> {
        self.functions.get_mut(&id)
    }

    fn track_max(&mut self, id: ResourceId) {
        if id.0 >= self.next_resource_id {
            self.next_resource_id = id.0.wrapping_add(1);
        }
    }

    /// *Add-if-missing* (§4.3): creates an empty function at `id` if one
    /// is not already present. `Begin`/`End` are allocated eagerly by
    /// [`Function::new`] since construction is cheap and every function
    /// needs both nodes regardless.
    pub fn add_if_missing(&mut self, id: ResourceId, display_name: impl Into<String>) -> &mut Function {
        self.track_max(id);
        self.functions.entry(id).or_insert_with(|| Function::new(id, display_name))
    }

    /// Inserts a pre-built function, replacing any existing function at
    /// the same id.
    pub fn insert(&mut self, function: Function) {
        self.track_max(function.resource_id());
        self.functions.insert(function.resource_id(), function);
    }

    /// *Delete function* (§4.3).
    pub fn delete(&mut self, id: ResourceId) -> Option<Function> {
        self.functions.remove(&id)
    }

    /// Allocates a fresh resource id strictly above every id currently in
    /// use, for functions synthesized by lowering (§4.3 "Lowering produces
    /// new synthesized functions... inserted with fresh resource ids
    /// allocated above the current maximum").
    pub fn allocate_resource_id(&mut self) -> ResourceId {
        let id = ResourceId::new(self.next_resource_id);
        self.next_resource_id = self.next_resource_id.wrapping_add(1);
        id
    }

    /// Allocates a resource id, creates a `managed` function there, and
    /// inserts it. Used by the lowering passes to synthesize helper
    /// functions (§4.4.5, §4.4.6).
    pub fn insert_managed(&mut self, display_name: impl Into<String>) -> ResourceId {
        let id = self.allocate_resource_id();
        let mut function = Function::new(id, display_name);
        function.set_managed(true);
        self.functions.insert(id, function);
        id
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub fn functions_mut(&mut self) -> impl Iterator<Item = &mut Function> {
        self.functions.values_mut()
    }

    /// Functions in ascending resource-id order, the deterministic
    /// cross-function emission order used by both backends (§5).
    pub fn functions_in_emission_order(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_if_missing_creates_exactly_once() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        assembly.add_if_missing(ResourceId::new(0), "Scene");
        assert_eq!(assembly.function_count(), 1);
        assembly.add_if_missing(ResourceId::new(0), "Scene Again");
        assert_eq!(assembly.function_count(), 1);
        assert_eq!(assembly.find(ResourceId::new(0)).unwrap().display_name(), "Scene");
    }

    #[test]
    fn allocate_resource_id_stays_above_current_maximum() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        assembly.add_if_missing(ResourceId::new(5), "F");
        let fresh = assembly.allocate_resource_id();
        assert!(fresh.0 > 5);
    }

    #[test]
    fn insert_managed_marks_function_managed() {
        let mut assembly = Assembly::new(ResourceId::new(0));
        let id = assembly.insert_managed("Helper");
        assert!(assembly.find(id).unwrap().managed());
    }

    #[test]
    fn require_assembly_function_reports_missing_entry() {
        let assembly = Assembly::new(ResourceId::new(0));
        match assembly.require_assembly_function() {
            Err(AssemblyError::MissingAssemblyFunction { id }) => assert_eq!(id, ResourceId::new(0)),
            Ok(_) => panic!("expected a missing-function error"),
        }
    }
}
