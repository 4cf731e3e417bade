//! Shared setup for the integration tests.
//!
//! Every test thread gets its own simulated engine, so bridges built here are
//! leaked per test rather than installed globally.

#![allow(dead_code)]

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Once;

use extbridge::prelude::*;
use extbridge_sim::fixtures;
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Declare the simulated engine's classes and require all of its methods.
pub fn declare_fixtures(builder: &mut BridgeBuilder) -> Result<(), RegistrationError> {
    for class in &fixtures::CLASSES {
        builder.declare_class(class.name, class.parent, class.virtuals)?;
    }
    builder.require_methods(&fixtures::ALL_METHODS);
    Ok(())
}

/// A bridge over a freshly installed simulated engine.
pub fn fixture_bridge() -> &'static Bridge {
    fixture_bridge_with(BridgeConfig::new(), |_| Ok(()))
}

/// As [`fixture_bridge`], with extra registration and extension classes
/// registered at the default initialization level.
pub fn fixture_bridge_with(
    config: BridgeConfig,
    register: impl FnOnce(&mut BridgeBuilder) -> Result<(), RegistrationError>,
) -> &'static Bridge {
    init_tracing();
    let mut builder = Bridge::builder(config);
    declare_fixtures(&mut builder).unwrap();
    register(&mut builder).unwrap();
    let bridge = builder.build(extbridge_sim::install()).leak();
    assert!(bridge.methods().unresolved().is_empty());
    bridge.initialize(InitializationLevel::Scene);
    bridge
}

/// Run `f`, which must raise a contract violation, and return it.
pub fn contract_error(f: impl FnOnce()) -> ContractError {
    let payload = catch_unwind(AssertUnwindSafe(f)).expect_err("expected a contract violation");
    payload
        .downcast_ref::<ContractError>()
        .cloned()
        .expect("panic payload is not a ContractError")
}
