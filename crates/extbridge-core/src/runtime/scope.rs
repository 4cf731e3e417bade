//! Lifetime scopes for native handles.
//!
//! A [`Scope`] owns every handle registered against it and releases the
//! `OwnedByCaller` ones exactly once when it ends. Ending happens either
//! explicitly through [`Scope::end`] or implicitly when the scope is dropped,
//! so early returns and unwinding release too.
//!
//! Each native value may be registered in at most one scope at a time. The
//! owner of every registered value is tracked per thread; scopes are
//! thread-bound, so a per-thread table sees every registration a scope makes.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use crate::api::NativeApi;
use crate::error::{ContractError, contract_violation};
use crate::handle::{Handle, NativeKind, Ownership, RawHandle};

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Handle identity -> id of the scope it is registered in.
    static OWNERS: RefCell<FxHashMap<u64, u64>> = RefCell::new(FxHashMap::default());
}

/// A set of handles released together.
///
/// Scopes are neither `Send` nor `Sync`.
pub struct Scope<'api> {
    id: u64,
    api: &'api NativeApi,
    entries: RefCell<Vec<RawHandle>>,
    ended: Cell<bool>,
    _not_send: PhantomData<*const ()>,
}

impl<'api> Scope<'api> {
    /// Open an empty scope.
    pub fn open(api: &'api NativeApi) -> Self {
        let id = NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(scope = id, "scope opened");
        Scope {
            id,
            api,
            entries: RefCell::new(Vec::new()),
            ended: Cell::new(false),
            _not_send: PhantomData,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The API table this scope releases through.
    #[inline]
    pub fn api(&self) -> &'api NativeApi {
        self.api
    }

    /// Take responsibility for a handle.
    ///
    /// Null handles are ignored. Registering a value that is already
    /// registered, here or in another scope, is fatal.
    #[track_caller]
    pub fn register<K: NativeKind>(&self, handle: Handle<K>) -> Handle<K> {
        self.register_raw(handle.raw());
        handle
    }

    /// Untyped form of [`register`](Self::register).
    #[track_caller]
    pub fn register_raw(&self, raw: RawHandle) {
        self.check_live();
        let kind = raw.kind();
        if raw.is_null() {
            return;
        }
        OWNERS.with(|owners| {
            let mut owners = owners.borrow_mut();
            if let Some(&owner) = owners.get(&raw.identity()) {
                contract_violation(ContractError::DoubleRegistration {
                    kind,
                    payload: raw.payload(),
                    scope: self.id,
                    owner,
                });
            }
            owners.insert(raw.identity(), self.id);
        });
        self.entries.borrow_mut().push(raw);
    }

    /// Hand a handle over to another owner.
    ///
    /// The handle leaves this scope's registry and is returned marked
    /// `Transferred`; ending the scope will not release it. A handle no scope
    /// holds only changes its mark. Transferring a handle that another scope
    /// holds is fatal: that scope would still release it.
    #[track_caller]
    pub fn transfer<K: NativeKind>(&self, handle: Handle<K>) -> Handle<K> {
        self.check_live();
        let raw = handle.raw();
        let identity = raw.identity();
        match owner_of(identity) {
            Some(owner) if owner != self.id => {
                contract_violation(ContractError::ForeignTransfer {
                    kind: raw.kind(),
                    payload: raw.payload(),
                    scope: self.id,
                    owner,
                });
            }
            Some(_) => {
                let mut entries = self.entries.borrow_mut();
                if let Some(pos) = entries.iter().position(|h| h.identity() == identity) {
                    entries.swap_remove(pos);
                }
                forget_owner(identity, self.id);
                tracing::trace!(scope = self.id, handle = ?handle, "handle transferred");
            }
            None => {}
        }
        handle.with_ownership(Ownership::Transferred)
    }

    /// Receive a transferred handle, making this scope its owner.
    #[track_caller]
    pub fn adopt<K: NativeKind>(&self, handle: Handle<K>) -> Handle<K> {
        self.register(handle.with_ownership(Ownership::OwnedByCaller))
    }

    /// Whether this scope holds the native value behind `handle`.
    pub fn contains<K: NativeKind>(&self, handle: Handle<K>) -> bool {
        let identity = handle.raw().identity();
        self.entries
            .borrow()
            .iter()
            .any(|h| h.identity() == identity)
    }

    /// Number of registered handles.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.get()
    }

    /// Release every registered `OwnedByCaller` handle.
    ///
    /// Ending a scope twice is fatal.
    #[track_caller]
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn end(&mut self) {
        if self.ended.get() {
            contract_violation(ContractError::ScopeAlreadyEnded { scope: self.id });
        }
        self.release_all();
    }

    #[track_caller]
    fn check_live(&self) {
        if self.ended.get() {
            contract_violation(ContractError::ScopeUsedAfterEnd { scope: self.id });
        }
    }

    fn release_all(&self) {
        self.ended.set(true);
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        let mut released = 0usize;
        // Latest registrations first.
        for raw in entries.into_iter().rev() {
            forget_owner(raw.identity(), self.id);
            if raw.ownership() == Ownership::OwnedByCaller {
                self.api.destroy_handle(raw.kind(), raw.payload());
                released += 1;
            }
        }
        tracing::trace!(scope = self.id, released, "scope ended");
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if !self.ended.get() {
            self.release_all();
        }
    }
}

impl std::fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("handles", &self.len())
            .field("ended", &self.ended.get())
            .finish()
    }
}

fn owner_of(identity: u64) -> Option<u64> {
    OWNERS
        .try_with(|owners| owners.borrow().get(&identity).copied())
        .ok()
        .flatten()
}

fn forget_owner(identity: u64, scope: u64) {
    // The table may already be gone during thread teardown.
    let _ = OWNERS.try_with(|owners| {
        let mut owners = owners.borrow_mut();
        if owners.get(&identity) == Some(&scope) {
            owners.remove(&identity);
        }
    });
}

/// Run `f` inside a fresh scope that is ended when `f` returns.
pub fn with_scope<R>(api: &NativeApi, f: impl FnOnce(&Scope<'_>) -> R) -> R {
    let mut scope = Scope::open(api);
    let result = f(&scope);
    scope.end();
    result
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;
    use crate::handle::{ObjectRef, StringHandle};
    use crate::testing;

    fn contract_error(f: impl FnOnce()) -> ContractError {
        let payload = catch_unwind(AssertUnwindSafe(f)).unwrap_err();
        payload.downcast_ref::<ContractError>().cloned().unwrap()
    }

    #[test]
    fn end_releases_each_owned_handle_once() {
        let api = testing::api();
        let mut scope = Scope::open(&api);
        let handles: Vec<_> = (0..16).map(|i| scope.new_string(&i.to_string())).collect();
        assert_eq!(scope.len(), 16);

        let before = testing::destroyed_count();
        scope.end();
        assert_eq!(testing::destroyed_count() - before, 16);
        assert_eq!(testing::double_frees(), 0);
        assert!(handles.iter().all(|h| !testing::is_alive(h.payload())));
        assert!(scope.is_empty());
    }

    #[test]
    fn second_end_is_fatal() {
        let api = testing::api();
        let mut scope = Scope::open(&api);
        scope.new_string("x");
        scope.end();
        let id = scope.id();
        assert_eq!(
            contract_error(|| scope.end()),
            ContractError::ScopeAlreadyEnded { scope: id }
        );
        assert_eq!(testing::double_frees(), 0);
    }

    #[test]
    fn use_after_end_is_fatal() {
        let api = testing::api();
        let mut scope = Scope::open(&api);
        scope.end();
        let err = contract_error(|| {
            scope.new_string("late");
        });
        assert!(matches!(err, ContractError::ScopeUsedAfterEnd { .. }));
    }

    #[test]
    fn borrowed_handles_are_not_released() {
        let api = testing::api();
        let object = testing::new_object();
        {
            let scope = Scope::open(&api);
            scope.register(ObjectRef::encode(object, Ownership::Borrowed));
            assert_eq!(scope.len(), 1);
        }
        assert!(testing::is_alive(object));
    }

    #[test]
    fn transferred_handle_survives_scope() {
        let api = testing::api();
        let mut scope = Scope::open(&api);
        let h = scope.new_string("kept");
        let moved = scope.transfer(h);
        assert_eq!(moved.ownership(), Ownership::Transferred);
        assert!(!scope.contains(h));
        scope.end();
        assert!(testing::is_alive(h.payload()));

        // The receiver adopts it and releases it exactly once.
        let mut receiver = Scope::open(&api);
        let adopted = receiver.adopt(moved);
        assert_eq!(adopted.ownership(), Ownership::OwnedByCaller);
        receiver.end();
        assert!(!testing::is_alive(h.payload()));
        assert_eq!(testing::double_frees(), 0);
    }

    #[test]
    fn transfer_is_idempotent() {
        let api = testing::api();
        let scope = Scope::open(&api);
        let h = scope.new_string("twice");
        scope.transfer(h);
        let again = scope.transfer(h);
        assert_eq!(again.ownership(), Ownership::Transferred);
        assert!(scope.is_empty());
        drop(scope);
        assert!(testing::is_alive(h.payload()));
    }

    #[test]
    fn transfer_by_a_scope_that_does_not_own_the_handle_is_fatal() {
        let api = testing::api();
        let mut owner = Scope::open(&api);
        let other = Scope::open(&api);
        let h = owner.new_string("owned");

        let err = contract_error(|| {
            other.transfer(h);
        });
        assert_eq!(
            err,
            ContractError::ForeignTransfer {
                kind: crate::handle::HandleKind::String,
                payload: h.payload(),
                scope: other.id(),
                owner: owner.id(),
            }
        );
        assert!(owner.contains(h));

        // Once the owner lets go, anyone may pass it along.
        let moved = owner.transfer(h);
        assert_eq!(other.transfer(moved).ownership(), Ownership::Transferred);
        owner.end();
        assert!(testing::is_alive(h.payload()));

        let mut receiver = Scope::open(&api);
        receiver.adopt(moved);
        receiver.end();
        assert!(!testing::is_alive(h.payload()));
        assert_eq!(testing::double_frees(), 0);
    }

    #[test]
    fn double_registration_is_fatal() {
        let api = testing::api();
        let first = Scope::open(&api);
        let second = Scope::open(&api);
        let h = first.new_string("shared");
        let err = contract_error(|| {
            second.register(h);
        });
        assert_eq!(
            err,
            ContractError::DoubleRegistration {
                kind: crate::handle::HandleKind::String,
                payload: h.payload(),
                scope: second.id(),
                owner: first.id(),
            }
        );
        assert!(second.is_empty());
    }

    #[test]
    fn nested_scopes_release_independently() {
        let api = testing::api();
        let mut outer = Scope::open(&api);
        let kept = outer.new_string("outer");
        let inner_handle;
        {
            let mut inner = Scope::open(&api);
            inner_handle = inner.new_string("inner");
            inner.end();
        }
        assert!(!testing::is_alive(inner_handle.payload()));
        assert!(testing::is_alive(kept.payload()));
        assert_eq!(outer.len(), 1);
        outer.end();
        assert!(!testing::is_alive(kept.payload()));
    }

    #[test]
    fn unwinding_releases() {
        let api = testing::api();
        let mut payload = 0;
        let result = catch_unwind(AssertUnwindSafe(|| {
            with_scope(&api, |scope| {
                payload = scope.new_string("doomed").payload();
                panic!("early exit");
            })
        }));
        assert!(result.is_err());
        assert!(!testing::is_alive(payload));
    }

    #[test]
    fn null_handles_are_ignored() {
        let api = testing::api();
        let scope = Scope::open(&api);
        scope.register(StringHandle::null());
        scope.register(ObjectRef::null());
        assert!(scope.is_empty());
    }
}
