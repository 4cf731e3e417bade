//! Classes known to the bridge.
//!
//! Engine classes are declared up front with the virtuals they let
//! subclasses override; extension classes are added as they are registered.
//! A class's parent is always declared before the class, so every ancestor
//! chain ends at a root.

use rustc_hash::FxHashMap;

use extbridge_core::{
    ContractError, ObjectRef, Ownership, RegistrationError, Scope, SymbolHash, VirtualMethodInfo,
    contract_violation,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// Implemented by the engine.
    Engine,
    /// Implemented by host code on top of an engine class.
    Extension,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    name: String,
    hash: SymbolHash,
    parent: Option<String>,
    kind: ClassKind,
    virtuals: Vec<VirtualMethodInfo>,
}

impl ClassInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> SymbolHash {
        self.hash
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    /// Virtuals declared on this class itself.
    pub fn virtuals(&self) -> &[VirtualMethodInfo] {
        &self.virtuals
    }
}

#[derive(Debug, Default)]
pub struct ClassDb {
    classes: FxHashMap<SymbolHash, ClassInfo>,
}

impl ClassDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an engine class.
    pub fn declare(
        &mut self,
        name: &str,
        parent: Option<&str>,
        virtuals: &[VirtualMethodInfo],
    ) -> Result<(), RegistrationError> {
        self.insert(name, parent, ClassKind::Engine, virtuals.to_vec())
    }

    pub(crate) fn declare_extension(
        &mut self,
        name: &str,
        parent: &str,
    ) -> Result<(), RegistrationError> {
        self.insert(name, Some(parent), ClassKind::Extension, Vec::new())
    }

    fn insert(
        &mut self,
        name: &str,
        parent: Option<&str>,
        kind: ClassKind,
        virtuals: Vec<VirtualMethodInfo>,
    ) -> Result<(), RegistrationError> {
        let hash = SymbolHash::from_class(name);
        if self.classes.contains_key(&hash) {
            return Err(RegistrationError::DuplicateClass(name.to_string()));
        }
        match parent {
            Some(parent) if !self.contains(parent) => {
                return Err(RegistrationError::UnknownParent {
                    class: name.to_string(),
                    parent: parent.to_string(),
                });
            }
            _ => {}
        }

        tracing::debug!(class = name, ?parent, ?kind, virtuals = virtuals.len(), "class declared");
        self.classes.insert(
            hash,
            ClassInfo {
                name: name.to_string(),
                hash,
                parent: parent.map(str::to_string),
                kind,
                virtuals,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(&SymbolHash::from_class(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(&SymbolHash::from_class(name))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// `name` followed by its ancestors, nearest first.
    pub fn ancestors<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a ClassInfo> + use<'a> {
        std::iter::successors(self.get(name), move |class| {
            class.parent().and_then(|parent| self.get(parent))
        })
    }

    pub fn is_subclass_of(&self, class: &str, ancestor: &str) -> bool {
        self.ancestors(class).any(|c| c.name == ancestor)
    }

    /// The nearest engine class in the chain, which the engine allocates for
    /// instances of an extension class.
    pub fn native_base(&self, name: &str) -> Option<&ClassInfo> {
        self.ancestors(name).find(|c| c.kind == ClassKind::Engine)
    }

    /// The nearest declaration of virtual `method` visible from `class`.
    pub fn find_virtual(&self, class: &str, method: &str) -> Option<&VirtualMethodInfo> {
        self.ancestors(class)
            .find_map(|c| c.virtuals.iter().find(|v| v.name == method))
    }

    /// Every virtual visible from `class` with the class declaring it.
    ///
    /// A virtual redeclared by a subclass shadows the ancestor's declaration.
    pub fn virtuals_of(&self, class: &str) -> Vec<(&str, &VirtualMethodInfo)> {
        let mut seen: Vec<(&str, &VirtualMethodInfo)> = Vec::new();
        for owner in self.ancestors(class) {
            for info in &owner.virtuals {
                if !seen.iter().any(|(_, v)| v.name == info.name) {
                    seen.push((owner.name(), info));
                }
            }
        }
        seen
    }

    /// Ask the engine for a new instance of `class`.
    ///
    /// The object is owned by `scope`; use [`Scope::transfer`] to keep it.
    /// Fatal when the class is not declared or the engine cannot build it.
    #[track_caller]
    pub fn construct(&self, scope: &Scope<'_>, class: &str) -> ObjectRef {
        if !self.contains(class) {
            contract_violation(ContractError::UnknownClass(class.to_string()));
        }
        let object = scope.api().construct_object(class);
        if object == 0 {
            contract_violation(ContractError::UnknownClass(class.to_string()));
        }
        tracing::trace!(class, scope = scope.id(), "object constructed");
        scope.register(ObjectRef::encode(object, Ownership::OwnedByCaller))
    }

    /// An engine singleton. The engine keeps ownership.
    #[track_caller]
    pub fn singleton(&self, scope: &Scope<'_>, name: &str) -> ObjectRef {
        match scope.api().singleton(name) {
            0 => contract_violation(ContractError::UnknownSingleton(name.to_string())),
            object => ObjectRef::encode(object, Ownership::Borrowed),
        }
    }
}
