//! Method binds resolved once at startup.

use rustc_hash::FxHashMap;

use extbridge_core::{
    ContractError, MethodBind, MethodSpec, NativeApi, SymbolHash, contract_violation,
};

/// Every method bind the bridge will ever call, keyed by class and method.
#[derive(Debug, Default)]
pub struct MethodTable {
    binds: FxHashMap<SymbolHash, MethodBind>,
    unresolved: Vec<&'static MethodSpec>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every method against the engine.
    ///
    /// Methods the engine does not have are remembered; calling one later is
    /// fatal.
    pub fn resolve(api: &NativeApi, specs: &[&'static MethodSpec]) -> Self {
        let mut table = MethodTable::new();
        for &spec in specs {
            let hash = Self::key(spec.class, spec.name);
            if table.binds.contains_key(&hash) {
                continue;
            }
            match MethodBind::resolve(api, spec) {
                Some(bind) => {
                    table.binds.insert(hash, bind);
                }
                None => {
                    tracing::warn!(
                        class = spec.class,
                        method = spec.name,
                        hash = spec.hash,
                        "engine has no matching method bind"
                    );
                    table.unresolved.push(spec);
                }
            }
        }
        tracing::debug!(
            resolved = table.binds.len(),
            unresolved = table.unresolved.len(),
            "method table built"
        );
        table
    }

    fn key(class: &str, method: &str) -> SymbolHash {
        SymbolHash::from_method(SymbolHash::from_class(class), method)
    }

    /// The bind for `class::method`. Fatal if it was never resolved.
    #[track_caller]
    pub fn get(&self, class: &str, method: &str) -> &MethodBind {
        match self.try_get(class, method) {
            Some(bind) => bind,
            None => contract_violation(ContractError::UnknownMethod {
                class: class.to_string(),
                method: method.to_string(),
            }),
        }
    }

    pub fn try_get(&self, class: &str, method: &str) -> Option<&MethodBind> {
        self.binds.get(&Self::key(class, method))
    }

    /// Specs the engine did not recognize.
    pub fn unresolved(&self) -> &[&'static MethodSpec] {
        &self.unresolved
    }

    pub fn len(&self) -> usize {
        self.binds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;
    use extbridge_core::{MethodSignature, with_scope};
    use extbridge_sim::fixtures;

    #[test]
    fn resolves_known_methods() {
        let api = extbridge_sim::install();
        let table = MethodTable::resolve(&api, &fixtures::ALL_METHODS);
        assert_eq!(table.len(), fixtures::ALL_METHODS.len());
        assert!(table.unresolved().is_empty());

        let bind = table.get("Fixture", "mix");
        assert_eq!(bind.class(), "Fixture");
        assert_eq!(bind.layout().arg_count(), 3);
    }

    #[test]
    fn wrong_hash_is_unresolved_and_fatal_on_use() {
        static STALE: MethodSpec = MethodSpec::new(
            "Fixture",
            "get_parent",
            0x0bad,
            MethodSignature::new(&[], Some(extbridge_core::NativeType::Object)),
        );
        let api = extbridge_sim::install();
        let table = MethodTable::resolve(&api, &[&STALE]);
        assert_eq!(table.unresolved().len(), 1);
        assert!(table.try_get("Fixture", "get_parent").is_none());

        let payload = catch_unwind(AssertUnwindSafe(|| {
            table.get("Fixture", "get_parent");
        }))
        .unwrap_err();
        assert_eq!(
            payload.downcast_ref::<ContractError>(),
            Some(&ContractError::UnknownMethod {
                class: "Fixture".into(),
                method: "get_parent".into(),
            })
        );
    }

    #[test]
    fn resolved_bind_is_callable() {
        let api = extbridge_sim::install();
        let table = MethodTable::resolve(&api, &[&fixtures::FIXTURE_SUM_ARRAY]);
        let fixture = extbridge_sim::new_object("Fixture");
        let total: i64 = with_scope(&api, |scope| {
            table
                .get("Fixture", "sum_array")
                .call(scope, fixture, (vec![1i64, 2, 3],))
        });
        assert_eq!(total, 6);
        assert_eq!(extbridge_sim::stats().live_arrays, 0);
    }
}
