//! Virtual dispatch for extension classes.
//!
//! Registering an extension class creates one [`VirtualEntry`] for every
//! virtual its ancestors declare, overridden or not. The engine asks for an
//! entry by name once, caches it, and calls [`VirtualEntry::invoke`] through
//! it on every dispatch. Entries are never removed.

use std::any::Any;
use std::ffi::c_void;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use rustc_hash::FxHashMap;

use extbridge_core::convert::write_default;
use extbridge_core::{
    BridgeConfig, BridgeProperty, ContractError, MethodSignature, NativeApi, Ownership, PassBy,
    RegistrationError, Scope, SymbolHash, VirtualContext, VirtualFn, VirtualMethodInfo,
};

/// How a virtual call was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualOutcome {
    /// The host override ran to completion.
    Override,
    /// No override; the declared default was written.
    Default,
    /// The override panicked; the declared default was written instead.
    Recovered,
}

/// One virtual of one extension class.
pub struct VirtualEntry {
    class: String,
    owner: String,
    hash: SymbolHash,
    info: VirtualMethodInfo,
    override_fn: Option<VirtualFn>,
}

impl VirtualEntry {
    pub fn new(
        class: impl Into<String>,
        owner: impl Into<String>,
        info: VirtualMethodInfo,
        override_fn: Option<VirtualFn>,
    ) -> Self {
        let class = class.into();
        let hash = SymbolHash::from_virtual(SymbolHash::from_class(&class), info.name);
        VirtualEntry {
            class,
            owner: owner.into(),
            hash,
            info,
            override_fn,
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn method(&self) -> &'static str {
        self.info.name
    }

    /// The engine class that declares this virtual.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn hash(&self) -> SymbolHash {
        self.hash
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.info.signature
    }

    pub fn is_overridden(&self) -> bool {
        self.override_fn.is_some()
    }

    /// Run this virtual against a host value.
    ///
    /// Opens a scope for the call, runs the override if there is one, and
    /// closes the scope. A panicking override is contained: the panic is
    /// logged and the declared default is written instead. A contract
    /// violation inside the override aborts the process when
    /// [`BridgeProperty::AbortOnContractViolation`] is set, and is otherwise
    /// contained the same way.
    ///
    /// # Safety
    ///
    /// `args` must point to one slot pointer per declared parameter and `ret`
    /// to a slot for the declared return type (or be null for void virtuals),
    /// all valid for the duration of the call.
    pub unsafe fn invoke(
        &self,
        api: &NativeApi,
        config: &BridgeConfig,
        this: &mut (dyn Any + 'static),
        args: *const *const c_void,
        ret: *mut c_void,
    ) -> VirtualOutcome {
        let Some(f) = &self.override_fn else {
            // SAFETY: forwarded from the caller.
            unsafe { self.write_declared_default(api, ret) };
            return VirtualOutcome::Default;
        };
        if config.flag(BridgeProperty::TraceCalls) {
            tracing::trace!(class = %self.class, method = self.info.name, "virtual call");
        }

        let mut scope = Scope::open(api);
        // SAFETY: forwarded from the caller.
        let mut ctx = unsafe {
            VirtualContext::new(
                &self.class,
                self.info.name,
                &self.info.signature,
                &scope,
                this,
                args,
                ret,
            )
        };
        let result = catch_unwind(AssertUnwindSafe(|| f.call(&mut ctx)));
        let returned = ctx.has_returned();
        drop(ctx);

        let outcome = match result {
            Ok(()) => {
                if !returned {
                    // A raw override may leave the slot alone.
                    unsafe { self.write_declared_default(api, ret) };
                }
                VirtualOutcome::Override
            }
            Err(payload) => {
                if let Some(err) = payload.downcast_ref::<ContractError>() {
                    if config.flag(BridgeProperty::AbortOnContractViolation) {
                        tracing::error!(
                            class = %self.class,
                            method = self.info.name,
                            error = %err,
                            "contract violated inside virtual override, aborting"
                        );
                        std::process::abort();
                    }
                }
                tracing::error!(
                    class = %self.class,
                    method = self.info.name,
                    panic = %panic_message(payload.as_ref()),
                    "virtual override panicked, returning default"
                );
                if returned {
                    // The default replaces whatever the override already wrote.
                    unsafe { self.release_written_return(api, ret) };
                }
                unsafe { self.write_declared_default(api, ret) };
                VirtualOutcome::Recovered
            }
        };
        scope.end();
        outcome
    }

    /// Release a heap value already written to the return slot.
    ///
    /// # Safety
    ///
    /// As for [`invoke`](Self::invoke); the slot must hold a value written by
    /// the override.
    unsafe fn release_written_return(&self, api: &NativeApi, ret: *mut c_void) {
        let Some(ty) = self.info.signature.ret else {
            return;
        };
        let PassBy::Handle(kind) = ty.layout().pass else {
            return;
        };
        if ret.is_null() || kind.returned_ownership() != Ownership::OwnedByCaller {
            return;
        }
        // SAFETY: handle slots are one word.
        let payload = unsafe { ret.cast::<u64>().read_unaligned() };
        if payload != 0 {
            tracing::debug!(class = %self.class, method = self.info.name, ?kind, "released partial return");
            api.destroy_handle(kind, payload);
        }
    }

    /// # Safety
    ///
    /// As for [`invoke`](Self::invoke).
    pub(crate) unsafe fn write_declared_default(&self, api: &NativeApi, ret: *mut c_void) {
        let (Some(ty), Some(default)) = (self.info.signature.ret, self.info.default.as_ref()) else {
            return;
        };
        if ret.is_null() {
            return;
        }
        // SAFETY: `ret` is a slot for the declared return type.
        let slot = unsafe { std::slice::from_raw_parts_mut(ret.cast::<u8>(), ty.layout().size) };
        // Heap defaults belong to the engine once written.
        let _ = write_default(ty, default, slot, api);
    }
}

impl fmt::Debug for VirtualEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualEntry")
            .field("class", &self.class)
            .field("method", &self.info.name)
            .field("owner", &self.owner)
            .field("signature", &format_args!("{}", self.info.signature))
            .field("overridden", &self.is_overridden())
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(err) = payload.downcast_ref::<ContractError>() {
        err.to_string()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Entries keyed by (class, virtual name).
#[derive(Debug, Default)]
pub struct VirtualRegistry {
    entries: FxHashMap<SymbolHash, VirtualEntry>,
}

impl VirtualRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry under its class and method name.
    pub fn register(&mut self, entry: VirtualEntry) -> Result<(), RegistrationError> {
        if self.entries.contains_key(&entry.hash) {
            return Err(RegistrationError::DuplicateOverride {
                class: entry.class,
                method: entry.info.name.to_string(),
            });
        }
        tracing::debug!(
            class = %entry.class,
            method = entry.info.name,
            overridden = entry.is_overridden(),
            "virtual registered"
        );
        self.entries.insert(entry.hash, entry);
        Ok(())
    }

    pub fn resolve(&self, class: &str, method: &str) -> Option<&VirtualEntry> {
        self.resolve_hash(SymbolHash::from_virtual(SymbolHash::from_class(class), method))
    }

    #[inline]
    pub fn resolve_hash(&self, hash: SymbolHash) -> Option<&VirtualEntry> {
        self.entries.get(&hash)
    }

    pub fn entries_for<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a VirtualEntry> {
        self.entries.values().filter(move |entry| entry.class == class)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extbridge_core::{HandleKind, NativeType, ParamInfo, StringHandle};
    use std::cell::Cell;
    use std::ptr;

    static DELTA: [ParamInfo; 1] = [ParamInfo::new("delta", NativeType::Float64)];
    static PROCESS: VirtualMethodInfo =
        VirtualMethodInfo::new("_process", MethodSignature::new(&DELTA, Some(NativeType::Bool)));
    static TITLE: VirtualMethodInfo =
        VirtualMethodInfo::new("_get_title", MethodSignature::new(&[], Some(NativeType::String)))
            .with_default(extbridge_core::DefaultValue::String("untitled"));

    struct Ticker {
        ticks: u32,
    }

    thread_local! {
        static HANDED_OVER: Cell<u64> = const { Cell::new(0) };
    }

    fn title_from_outside() -> VirtualFn {
        VirtualFn::method(|_: &mut Ticker| -> StringHandle {
            StringHandle::encode(HANDED_OVER.with(Cell::get), Ownership::OwnedByCaller)
        })
    }

    fn title(entry: &VirtualEntry, config: &BridgeConfig) -> (VirtualOutcome, u64) {
        let api = extbridge_sim::api();
        let mut ticker = Ticker { ticks: 0 };
        let mut ret = 0u64;
        let outcome =
            unsafe { entry.invoke(&api, config, &mut ticker, ptr::null(), (&raw mut ret).cast()) };
        (outcome, ret)
    }

    fn lenient() -> BridgeConfig {
        BridgeConfig::new().with(BridgeProperty::AbortOnContractViolation, 0)
    }

    fn process(
        entry: &VirtualEntry,
        config: &BridgeConfig,
        this: &mut Ticker,
        delta: f64,
    ) -> (VirtualOutcome, u8) {
        let api = extbridge_sim::api();
        let args = [(&raw const delta).cast::<c_void>()];
        let mut ret = 0xaau8;
        let outcome =
            unsafe { entry.invoke(&api, config, this, args.as_ptr(), (&raw mut ret).cast()) };
        (outcome, ret)
    }

    #[test]
    fn override_runs() {
        extbridge_sim::install();
        let f = VirtualFn::method(|this: &mut Ticker, delta: f64| -> bool {
            this.ticks += 1;
            delta > 0.5
        });
        let entry = VirtualEntry::new("Ticker", "MainLoop", PROCESS, Some(f));
        let mut ticker = Ticker { ticks: 0 };
        let config = BridgeConfig::new();

        assert_eq!(process(&entry, &config, &mut ticker, 1.0), (VirtualOutcome::Override, 1));
        assert_eq!(process(&entry, &config, &mut ticker, 0.1), (VirtualOutcome::Override, 0));
        assert_eq!(ticker.ticks, 2);
    }

    #[test]
    fn missing_override_writes_default() {
        extbridge_sim::install();
        let entry = VirtualEntry::new("Ticker", "MainLoop", PROCESS, None);
        let mut ticker = Ticker { ticks: 0 };
        assert_eq!(
            process(&entry, &BridgeConfig::new(), &mut ticker, 1.0),
            (VirtualOutcome::Default, 0)
        );
    }

    #[test]
    fn heap_default_is_handed_to_the_engine() {
        let api = extbridge_sim::install();
        let entry = VirtualEntry::new("Ticker", "Node", TITLE, None);
        let mut ticker = Ticker { ticks: 0 };
        let mut ret = 0u64;
        let config = BridgeConfig::new();
        let outcome =
            unsafe { entry.invoke(&api, &config, &mut ticker, ptr::null(), (&raw mut ret).cast()) };
        assert_eq!(outcome, VirtualOutcome::Default);
        assert_eq!(extbridge_sim::string_value(ret).as_deref(), Some("untitled"));
    }

    #[test]
    fn panicking_override_is_contained() {
        extbridge_sim::install();
        let f = VirtualFn::method(|_: &mut Ticker, _: f64| -> bool { panic!("boom") });
        let entry = VirtualEntry::new("Ticker", "MainLoop", PROCESS, Some(f));
        let mut ticker = Ticker { ticks: 0 };
        assert_eq!(
            process(&entry, &BridgeConfig::new(), &mut ticker, 1.0),
            (VirtualOutcome::Recovered, 0)
        );
    }

    #[test]
    fn contract_violation_is_contained_when_lenient() {
        extbridge_sim::install();
        // Wrong host type: `this` is a Ticker.
        let f = VirtualFn::method(|_: &mut String, _: f64| -> bool { true });
        let entry = VirtualEntry::new("Ticker", "MainLoop", PROCESS, Some(f));
        let mut ticker = Ticker { ticks: 0 };
        assert_eq!(
            process(&entry, &lenient(), &mut ticker, 1.0),
            (VirtualOutcome::Recovered, 0)
        );
    }

    #[test]
    fn scope_is_released_after_the_call() {
        extbridge_sim::install();
        let f = VirtualFn::new(
            &[NativeType::Float64],
            Some(NativeType::Bool),
            |ctx: &mut VirtualContext<'_>| {
                ctx.scope().new_string("scratch");
                ctx.set_return(true);
            },
        );
        let entry = VirtualEntry::new("Ticker", "MainLoop", PROCESS, Some(f));
        let mut ticker = Ticker { ticks: 0 };
        assert_eq!(
            process(&entry, &BridgeConfig::new(), &mut ticker, 1.0),
            (VirtualOutcome::Override, 1)
        );
        assert_eq!(extbridge_sim::stats().live_strings, 0);
    }

    #[test]
    fn returning_a_handle_another_scope_owns_is_contained() {
        let api = extbridge_sim::install();
        let entry = VirtualEntry::new("Ticker", "Node", TITLE, Some(title_from_outside()));
        let mut outer = Scope::open(&api);
        let owned = outer.new_string("still mine");
        HANDED_OVER.with(|h| h.set(owned.payload()));

        let (outcome, ret) = title(&entry, &lenient());
        assert_eq!(outcome, VirtualOutcome::Recovered);
        assert_ne!(ret, owned.payload());
        assert_eq!(extbridge_sim::string_value(ret).as_deref(), Some("untitled"));
        assert!(outer.contains(owned));

        outer.end();
        assert!(!extbridge_sim::is_alive(HandleKind::String, owned.payload()));
        assert!(extbridge_sim::is_alive(HandleKind::String, ret));
        assert_eq!(extbridge_sim::stats().double_frees, 0);
    }

    #[test]
    fn returning_a_handed_over_handle_gives_it_to_the_engine() {
        let api = extbridge_sim::install();
        let entry = VirtualEntry::new("Ticker", "Node", TITLE, Some(title_from_outside()));
        let mut outer = Scope::open(&api);
        let given = outer.transfer(outer.new_string("yours"));
        HANDED_OVER.with(|h| h.set(given.payload()));

        let (outcome, ret) = title(&entry, &BridgeConfig::new());
        assert_eq!(outcome, VirtualOutcome::Override);
        assert_eq!(ret, given.payload());

        outer.end();
        assert_eq!(extbridge_sim::string_value(ret).as_deref(), Some("yours"));
    }

    #[test]
    fn panic_after_returning_releases_the_written_value() {
        extbridge_sim::install();
        let f = VirtualFn::new(&[], Some(NativeType::String), |ctx: &mut VirtualContext<'_>| {
            ctx.set_return("partial".to_string());
            panic!("late failure");
        });
        let entry = VirtualEntry::new("Ticker", "Node", TITLE, Some(f));

        let (outcome, ret) = title(&entry, &BridgeConfig::new());
        assert_eq!(outcome, VirtualOutcome::Recovered);
        assert_eq!(extbridge_sim::string_value(ret).as_deref(), Some("untitled"));
        // Only the default is left for the engine to free.
        assert_eq!(extbridge_sim::stats().live_strings, 1);
        assert_eq!(extbridge_sim::stats().double_frees, 0);
    }

    #[test]
    fn registry_rejects_duplicates() {
        let mut registry = VirtualRegistry::new();
        registry
            .register(VirtualEntry::new("Ticker", "MainLoop", PROCESS, None))
            .unwrap();
        assert_eq!(
            registry.register(VirtualEntry::new("Ticker", "MainLoop", PROCESS, None)),
            Err(RegistrationError::DuplicateOverride {
                class: "Ticker".into(),
                method: "_process".into(),
            })
        );
        assert!(registry.resolve("Ticker", "_process").is_some());
        assert!(registry.resolve("Ticker", "_physics_process").is_none());
        assert!(registry.resolve("Other", "_process").is_none());
        assert_eq!(registry.entries_for("Ticker").count(), 1);
    }
}
