//! Error taxonomy for the bridge.
//!
//! Errors fall into three groups, and each group has its own propagation rule:
//!
//! ```text
//! ContractError     - generated call site or bridge out of sync with the engine.
//!                     Never returned; raised through `contract_violation()`.
//! BridgeError       - expected absence and setup failures, returned as `Result`.
//! ├── RegistrationError - class / virtual registration problems
//! └── ConversionError   - malformed data coming back from the engine
//! ```
//!
//! Host override failures are not represented here: they are contained at the
//! trampoline boundary and turned into the method's default return value.

use thiserror::Error;

use crate::handle::HandleKind;
use crate::signature::NativeType;

// ============================================================================
// Contract Violations
// ============================================================================

/// A violated bridge contract.
///
/// These indicate that a call site was generated against a different engine
/// layout, or that the bridge itself is being misused. Continuing after one
/// risks corrupting native memory, so they are raised as panics carrying this
/// value as payload (see [`contract_violation`]).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    /// A handle was decoded as the wrong kind.
    #[error("handle kind mismatch: expected {expected:?}, got {actual:?}")]
    HandleKindMismatch {
        expected: HandleKind,
        actual: HandleKind,
    },

    /// The kind tag of a handle does not name any known kind.
    #[error("malformed handle: tag {tag:#x} is not a handle kind")]
    MalformedHandle { tag: u8 },

    /// `end()` was called on a scope that had already ended.
    #[error("scope {scope} ended twice")]
    ScopeAlreadyEnded { scope: u64 },

    /// A scope was used after it ended.
    #[error("scope {scope} used after end")]
    ScopeUsedAfterEnd { scope: u64 },

    /// A handle was registered while already registered to a scope.
    #[error("{kind:?} handle {payload:#x} registered in scope {scope} is already owned by scope {owner}")]
    DoubleRegistration {
        kind: HandleKind,
        payload: u64,
        scope: u64,
        owner: u64,
    },

    /// A scope tried to hand over a handle that another scope owns.
    #[error("scope {scope} cannot transfer {kind:?} handle {payload:#x} owned by scope {owner}")]
    ForeignTransfer {
        kind: HandleKind,
        payload: u64,
        scope: u64,
        owner: u64,
    },

    /// A class name unknown to the bridge or the engine.
    #[error("unknown class '{0}'")]
    UnknownClass(String),

    /// A method that was never resolved, or that the engine does not have.
    #[error("unknown method '{class}::{method}'")]
    UnknownMethod { class: String, method: String },

    /// An engine singleton that does not exist.
    #[error("unknown singleton '{0}'")]
    UnknownSingleton(String),

    /// An argument's type does not match the declared parameter type.
    #[error("argument {index} of '{method}': expected {expected:?}, got {actual:?}")]
    ArgumentTypeMismatch {
        method: String,
        index: usize,
        expected: NativeType,
        actual: NativeType,
    },

    /// A parameter without a default value was left unfilled.
    #[error("argument {index} of '{method}' has no value and no default")]
    MissingArgument { method: String, index: usize },

    /// More arguments were pushed than the method declares.
    #[error("'{method}' takes {declared} argument(s), got more")]
    TooManyArguments { method: String, declared: usize },

    /// The requested return type does not match the declared return type.
    #[error("return of '{method}': expected {expected:?}, got {actual:?}")]
    ReturnTypeMismatch {
        method: String,
        expected: Option<NativeType>,
        actual: Option<NativeType>,
    },

    /// The host value bound to an instance has a different type than expected.
    #[error("instance of '{class}' is not a {expected}")]
    InstanceTypeMismatch { class: String, expected: &'static str },
}

/// Stop the current call path because a bridge contract was violated.
///
/// Logs the violation and panics with the [`ContractError`] as payload, so
/// boundary code can tell a contract violation apart from a host panic.
#[cold]
#[track_caller]
pub fn contract_violation(err: ContractError) -> ! {
    tracing::error!(error = %err, location = %std::panic::Location::caller(), "bridge contract violated");
    std::panic::panic_any(err)
}

// ============================================================================
// Recoverable Errors
// ============================================================================

/// Errors surfaced as ordinary results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A weak instance reference whose object has been destroyed.
    #[error("stale handle: instance {id} no longer exists")]
    StaleInstance { id: u64 },

    /// The engine does not export a required API function.
    #[error("engine does not provide '{0}'")]
    MissingApiFunction(&'static str),

    /// A bridge was already installed for this process.
    #[error("bridge already installed")]
    AlreadyInstalled,

    /// No bridge has been installed yet.
    #[error("bridge not installed")]
    NotInstalled,

    /// Registration failed.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// Data returned by the engine could not be converted.
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

/// Errors raised while declaring classes and their virtual overrides.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// A class with this name is already declared.
    #[error("duplicate class '{0}'")]
    DuplicateClass(String),

    /// The parent class of a subclass is not declared.
    #[error("class '{class}' extends unknown class '{parent}'")]
    UnknownParent { class: String, parent: String },

    /// An override names a virtual that no ancestor declares.
    #[error("'{class}' overrides unknown virtual '{method}'")]
    UnknownVirtual { class: String, method: String },

    /// The same virtual was overridden twice.
    #[error("'{class}' overrides '{method}' more than once")]
    DuplicateOverride { class: String, method: String },

    /// The typed override does not match the declared virtual signature.
    #[error("'{class}::{method}' signature mismatch: declared {declared}, override {provided}")]
    SignatureMismatch {
        class: String,
        method: String,
        declared: String,
        provided: String,
    },

    /// The class exposes two methods with one name.
    #[error("'{class}' exposes method '{method}' more than once")]
    DuplicateMethod { class: String, method: String },

    #[error("'{class}' exposes property '{property}' more than once")]
    DuplicateProperty { class: String, property: String },

    /// A property accessor is not one of the class's exposed methods.
    #[error("property '{class}.{property}' uses unknown accessor '{accessor}'")]
    UnknownAccessor {
        class: String,
        property: String,
        accessor: String,
    },

    /// A getter must take nothing and return the value; a setter must take
    /// the value and return nothing.
    #[error("property '{class}.{property}' accessor '{accessor}' should be {expected}, is {provided}")]
    AccessorMismatch {
        class: String,
        property: String,
        accessor: String,
        expected: String,
        provided: String,
    },
}

/// Errors converting engine data into host values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// The engine returned bytes that are not valid UTF-8.
    #[error("invalid UTF-8 in {kind:?} handle {payload:#x}")]
    InvalidUtf8 { kind: HandleKind, payload: u64 },

    /// A variant holds a type the bridge cannot represent.
    #[error("variant {payload:#x} holds unsupported type {tag}")]
    UnsupportedVariant { payload: u64, tag: u32 },
}

// ============================================================================
// Tests
// ============================================================================
