//! The bridge: everything resolved at startup, frozen afterward.
//!
//! A [`BridgeBuilder`] collects engine class declarations, the methods the
//! host will call and the extension classes it defines, along with the
//! methods and properties those classes expose to the engine. [`BridgeBuilder::build`]
//! resolves the method table and produces a [`Bridge`], which is read-only
//! from then on and can be shared freely between threads.
//!
//! # Example
//!
//! ```ignore
//! let mut builder = Bridge::builder(BridgeConfig::new());
//! builder.declare_class("Object", None, &[])?;
//! builder.declare_class("MainLoop", Some("Object"), &MAIN_LOOP_VIRTUALS)?;
//! builder.require_methods(&[&LABEL_SET_TEXT]);
//! builder
//!     .register_class("Game", "MainLoop", |_| Game::default())
//!     .override_virtual("_process", |game: &mut Game, delta: f64| game.tick(delta))
//!     .method("get_score", |game: &mut Game| game.score)
//!     .method("set_score", |game: &mut Game, score: i64| game.score = score)
//!     .property("score", "get_score", Some("set_score"))
//!     .build()?;
//!
//! let bridge = builder.build(api).leak();
//! bridge.initialize(InitializationLevel::Scene);
//! ```

use std::any::Any;
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::{FxHashMap, FxHashSet};

use extbridge_core::signature::TypeList;
use extbridge_core::{
    BridgeConfig, BridgeProperty, ClassCreationInfo, ClassMethodInfo, InitializationLevel,
    InstanceId, IntoVirtualFn, MethodBind, MethodFlags, MethodSignature, MethodSpec, NativeApi,
    NativeType, ObjectRef, ParamInfo, PropertyInfo, RegistrationError, Scope, StrRef, SymbolHash,
    VirtualFn, VirtualMethodInfo, with_scope,
};

use crate::callbacks::{self, ClassUserdata};
use crate::class_db::ClassDb;
use crate::method_table::MethodTable;
use crate::virtuals::{VirtualEntry, VirtualRegistry};

pub(crate) type Constructor = Arc<dyn Fn(InstanceId) -> Box<dyn Any + Send> + Send + Sync>;

/// Parameter names handed to the engine for exposed methods.
const ARG_NAMES: [&str; 6] = ["arg0", "arg1", "arg2", "arg3", "arg4", "arg5"];

/// The library pointer the engine handed to the extension.
#[derive(Debug, Clone, Copy)]
struct LibraryPtr(*mut c_void);

// SAFETY: an opaque token the bridge only passes back to the engine.
unsafe impl Send for LibraryPtr {}
unsafe impl Sync for LibraryPtr {}

/// An extension class as registered, with its host type erased.
pub(crate) struct ExtensionClass {
    pub(crate) name: String,
    pub(crate) parent: String,
    pub(crate) hash: SymbolHash,
    pub(crate) constructor: Constructor,
    /// Exposed methods; the engine holds pointers to these once registered.
    methods: Vec<VirtualEntry>,
    properties: Vec<ExposedProperty>,
    is_virtual: bool,
    is_abstract: bool,
}

#[derive(Debug)]
struct ExposedProperty {
    name: &'static str,
    ty: NativeType,
    getter: &'static str,
    setter: Option<&'static str>,
}

/// Exposed methods and properties of a class being registered.
struct Exposed {
    methods: Vec<(&'static str, VirtualFn)>,
    properties: Vec<(&'static str, &'static str, Option<&'static str>)>,
}

impl fmt::Debug for ExtensionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionClass")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct BridgeBuilder {
    config: BridgeConfig,
    library: LibraryPtr,
    classes: ClassDb,
    methods: Vec<&'static MethodSpec>,
    virtuals: VirtualRegistry,
    extensions: Vec<ExtensionClass>,
}

impl BridgeBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        BridgeBuilder {
            config,
            library: LibraryPtr(std::ptr::null_mut()),
            classes: ClassDb::new(),
            methods: Vec::new(),
            virtuals: VirtualRegistry::new(),
            extensions: Vec::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The library token passed back to the engine on class registration.
    pub fn library(&mut self, library: *mut c_void) -> &mut Self {
        self.library = LibraryPtr(library);
        self
    }

    /// Declare an engine class and the virtuals it declares itself.
    pub fn declare_class(
        &mut self,
        name: &str,
        parent: Option<&str>,
        virtuals: &[VirtualMethodInfo],
    ) -> Result<&mut Self, RegistrationError> {
        self.classes.declare(name, parent, virtuals)?;
        Ok(self)
    }

    /// Methods to resolve when the bridge is built.
    pub fn require_methods(&mut self, specs: &[&'static MethodSpec]) -> &mut Self {
        self.methods.extend_from_slice(specs);
        self
    }

    pub fn classes(&self) -> &ClassDb {
        &self.classes
    }

    /// Start registering an extension class whose instances carry a `C`.
    ///
    /// `constructor` builds the host value for each new instance from the
    /// instance ID of the engine object it is bound to. Upgrade the ID to
    /// reach the object; it is not pinned alive by the host value.
    pub fn register_class<C, F>(
        &mut self,
        name: impl Into<String>,
        parent: impl Into<String>,
        constructor: F,
    ) -> ClassBuilder<'_, C>
    where
        C: Any + Send,
        F: Fn(InstanceId) -> C + Send + Sync + 'static,
    {
        ClassBuilder {
            bridge: self,
            name: name.into(),
            parent: parent.into(),
            constructor: Arc::new(move |id: InstanceId| -> Box<dyn Any + Send> {
                Box::new(constructor(id))
            }),
            overrides: Vec::new(),
            exposed: Exposed {
                methods: Vec::new(),
                properties: Vec::new(),
            },
            is_virtual: false,
            is_abstract: false,
            _marker: PhantomData,
        }
    }

    fn add_extension(
        &mut self,
        mut class: ExtensionClass,
        overrides: Vec<(String, VirtualFn)>,
        exposed: Exposed,
    ) -> Result<(), RegistrationError> {
        if self.classes.contains(&class.name) {
            return Err(RegistrationError::DuplicateClass(class.name));
        }
        if !self.classes.contains(&class.parent) {
            return Err(RegistrationError::UnknownParent {
                class: class.name,
                parent: class.parent,
            });
        }

        let mut seen = FxHashSet::default();
        for (method, f) in &overrides {
            if !seen.insert(method.as_str()) {
                return Err(RegistrationError::DuplicateOverride {
                    class: class.name.clone(),
                    method: method.clone(),
                });
            }
            let Some(info) = self.classes.find_virtual(&class.parent, method) else {
                return Err(RegistrationError::UnknownVirtual {
                    class: class.name.clone(),
                    method: method.clone(),
                });
            };
            if !f.matches(&info.signature) {
                return Err(RegistrationError::SignatureMismatch {
                    class: class.name.clone(),
                    method: method.clone(),
                    declared: info.signature.to_string(),
                    provided: TypeList(f.params(), f.ret()).to_string(),
                });
            }
        }

        class.properties = validate_properties(&class.name, &exposed)?;
        self.classes.declare_extension(&class.name, &class.parent)?;
        let declared: Vec<(String, VirtualMethodInfo)> = self
            .classes
            .virtuals_of(&class.name)
            .into_iter()
            .map(|(owner, info)| (owner.to_string(), *info))
            .collect();
        let mut overrides: FxHashMap<String, VirtualFn> = overrides.into_iter().collect();
        for (owner, info) in declared {
            let f = overrides.remove(info.name);
            self.virtuals
                .register(VirtualEntry::new(class.name.as_str(), owner, info, f))?;
        }
        class.methods = exposed
            .methods
            .into_iter()
            .map(|(name, f)| exposed_entry(&class.name, name, f))
            .collect();

        tracing::debug!(
            class = %class.name,
            parent = %class.parent,
            methods = class.methods.len(),
            properties = class.properties.len(),
            "extension class declared"
        );
        self.extensions.push(class);
        Ok(())
    }

    /// Resolve every required method and freeze.
    pub fn build(self, api: NativeApi) -> Bridge {
        let methods = MethodTable::resolve(&api, &self.methods);
        let index = self
            .extensions
            .iter()
            .enumerate()
            .map(|(i, class)| (class.hash, i))
            .collect();
        tracing::debug!(
            classes = self.classes.len(),
            methods = methods.len(),
            virtuals = self.virtuals.len(),
            extensions = self.extensions.len(),
            "bridge built"
        );
        Bridge {
            api,
            config: self.config,
            library: self.library,
            classes: self.classes,
            methods,
            virtuals: self.virtuals,
            extensions: self.extensions,
            extension_index: index,
            registered: AtomicBool::new(false),
        }
    }
}

impl fmt::Debug for BridgeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeBuilder")
            .field("classes", &self.classes.len())
            .field("methods", &self.methods.len())
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

/// Check exposed methods and properties and resolve each property's type
/// from its getter.
fn validate_properties(
    class: &str,
    exposed: &Exposed,
) -> Result<Vec<ExposedProperty>, RegistrationError> {
    let mut seen = FxHashSet::default();
    for (method, _) in &exposed.methods {
        if !seen.insert(*method) {
            return Err(RegistrationError::DuplicateMethod {
                class: class.to_string(),
                method: method.to_string(),
            });
        }
    }

    let find = |property: &str, accessor: &str| {
        exposed
            .methods
            .iter()
            .find(|(name, _)| *name == accessor)
            .map(|(_, f)| f)
            .ok_or_else(|| RegistrationError::UnknownAccessor {
                class: class.to_string(),
                property: property.to_string(),
                accessor: accessor.to_string(),
            })
    };
    let mismatch = |property: &str, accessor: &str, expected: String, f: &VirtualFn| {
        RegistrationError::AccessorMismatch {
            class: class.to_string(),
            property: property.to_string(),
            accessor: accessor.to_string(),
            expected,
            provided: TypeList(f.params(), f.ret()).to_string(),
        }
    };

    let mut names = FxHashSet::default();
    let mut properties = Vec::with_capacity(exposed.properties.len());
    for &(name, getter, setter) in &exposed.properties {
        if !names.insert(name) {
            return Err(RegistrationError::DuplicateProperty {
                class: class.to_string(),
                property: name.to_string(),
            });
        }
        let get = find(name, getter)?;
        let ty = match (get.params(), get.ret()) {
            ([], Some(ty)) => ty,
            _ => return Err(mismatch(name, getter, "() -> T".to_string(), get)),
        };
        if let Some(setter) = setter {
            let set = find(name, setter)?;
            if set.params() != [ty] || set.ret().is_some() {
                let expected = TypeList(&[ty], None).to_string();
                return Err(mismatch(name, setter, expected, set));
            }
        }
        properties.push(ExposedProperty {
            name,
            ty,
            getter,
            setter,
        });
    }
    Ok(properties)
}

/// The dispatch entry for one exposed method.
fn exposed_entry(class: &str, name: &'static str, f: VirtualFn) -> VirtualEntry {
    let params: &'static [ParamInfo] = f
        .params()
        .iter()
        .enumerate()
        .map(|(i, &ty)| ParamInfo::new(ARG_NAMES.get(i).copied().unwrap_or("arg"), ty))
        .collect::<Vec<_>>()
        .leak();
    let info = VirtualMethodInfo::new(name, MethodSignature::new(params, f.ret()));
    VirtualEntry::new(class, class, info, Some(f))
}

/// Fluent registration of one extension class.
///
/// Created by [`BridgeBuilder::register_class`]. Nothing is registered until
/// [`build`](Self::build) validates the class as a whole.
#[must_use = "the class is only registered by calling build()"]
pub struct ClassBuilder<'b, C> {
    bridge: &'b mut BridgeBuilder,
    name: String,
    parent: String,
    constructor: Constructor,
    overrides: Vec<(String, VirtualFn)>,
    exposed: Exposed,
    is_virtual: bool,
    is_abstract: bool,
    _marker: PhantomData<fn() -> C>,
}

impl<C: Any + Send> ClassBuilder<'_, C> {
    /// Override an inherited virtual with a typed closure taking `&mut C`.
    pub fn override_virtual<F, Args>(mut self, method: &str, f: F) -> Self
    where
        F: IntoVirtualFn<C, Args>,
    {
        self.overrides.push((method.to_string(), f.into_virtual_fn()));
        self
    }

    /// Override an inherited virtual with a prebuilt function.
    pub fn override_raw(mut self, method: &str, f: VirtualFn) -> Self {
        self.overrides.push((method.to_string(), f));
        self
    }

    /// Expose a method the engine and scripts can call on instances.
    pub fn method<F, Args>(mut self, name: &'static str, f: F) -> Self
    where
        F: IntoVirtualFn<C, Args>,
    {
        self.exposed.methods.push((name, f.into_virtual_fn()));
        self
    }

    /// Expose a property read through `getter` and, unless read-only, written
    /// through `setter`. Both must be exposed methods of this class; the
    /// property takes the getter's return type.
    pub fn property(
        mut self,
        name: &'static str,
        getter: &'static str,
        setter: Option<&'static str>,
    ) -> Self {
        self.exposed.properties.push((name, getter, setter));
        self
    }

    /// The engine may not instantiate this class directly.
    pub fn abstract_class(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Instances may be subclassed by scripts.
    pub fn virtual_class(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn build(self) -> Result<(), RegistrationError> {
        let class = ExtensionClass {
            hash: SymbolHash::from_class(&self.name),
            name: self.name,
            parent: self.parent,
            constructor: self.constructor,
            methods: Vec::new(),
            properties: Vec::new(),
            is_virtual: self.is_virtual,
            is_abstract: self.is_abstract,
        };
        self.bridge.add_extension(class, self.overrides, self.exposed)
    }
}

// ============================================================================
// Bridge
// ============================================================================

pub struct Bridge {
    api: NativeApi,
    config: BridgeConfig,
    library: LibraryPtr,
    classes: ClassDb,
    methods: MethodTable,
    virtuals: VirtualRegistry,
    extensions: Vec<ExtensionClass>,
    extension_index: FxHashMap<SymbolHash, usize>,
    registered: AtomicBool,
}

impl Bridge {
    pub fn builder(config: BridgeConfig) -> BridgeBuilder {
        BridgeBuilder::new(config)
    }

    /// Give the bridge a process lifetime so engine callbacks can reach it.
    pub fn leak(self) -> &'static Bridge {
        Box::leak(Box::new(self))
    }

    pub fn api(&self) -> &NativeApi {
        &self.api
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn classes(&self) -> &ClassDb {
        &self.classes
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    pub fn virtuals(&self) -> &VirtualRegistry {
        &self.virtuals
    }

    pub fn open_scope(&self) -> Scope<'_> {
        Scope::open(&self.api)
    }

    /// Run `f` in a fresh scope that is ended afterward on every exit path.
    pub fn with_scope<R>(&self, f: impl FnOnce(&Scope<'_>) -> R) -> R {
        with_scope(&self.api, f)
    }

    /// The resolved bind for `class::method`. Fatal if it was not required
    /// or the engine lacks it.
    #[track_caller]
    pub fn method(&self, class: &str, method: &str) -> &MethodBind {
        self.methods.get(class, method)
    }

    /// The resolved bind for a generated method spec.
    #[track_caller]
    pub fn bind(&self, spec: &MethodSpec) -> &MethodBind {
        self.methods.get(spec.class, spec.name)
    }

    #[track_caller]
    pub fn construct(&self, scope: &Scope<'_>, class: &str) -> ObjectRef {
        self.classes.construct(scope, class)
    }

    #[track_caller]
    pub fn singleton(&self, scope: &Scope<'_>, name: &str) -> ObjectRef {
        self.classes.singleton(scope, name)
    }

    pub(crate) fn extension(&self, hash: SymbolHash) -> Option<&ExtensionClass> {
        self.extension_index
            .get(&hash)
            .map(|&index| &self.extensions[index])
    }

    /// Whether extension classes have been handed to the engine.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Called by the extension entry point as the engine moves through its
    /// initialization levels.
    ///
    /// Registers extension classes with the engine the first time `level`
    /// reaches the configured minimum. Returns whether this call registered
    /// them.
    pub fn initialize(&'static self, level: InitializationLevel) -> bool {
        if level < self.config.minimum_level() {
            tracing::trace!(?level, "below minimum initialization level");
            return false;
        }
        if self.registered.swap(true, Ordering::AcqRel) {
            return false;
        }

        let exposed = self.config.flag(BridgeProperty::ExposeClasses);
        for class in &self.extensions {
            let userdata = Box::leak(Box::new(ClassUserdata {
                bridge: self,
                class: class.hash,
            }));
            let info = ClassCreationInfo {
                is_virtual: class.is_virtual,
                is_abstract: class.is_abstract,
                is_exposed: exposed,
                class_userdata: (userdata as *mut ClassUserdata).cast(),
                create_instance: Some(callbacks::create_instance),
                free_instance: Some(callbacks::free_instance),
                get_virtual_call_data: Some(callbacks::get_virtual_call_data),
                call_virtual_with_data: Some(callbacks::call_virtual_with_data),
            };
            // SAFETY: the callbacks are plain functions and `userdata` is
            // leaked, so both outlive the engine.
            unsafe {
                self.api
                    .register_extension_class(self.library.0, &class.name, &class.parent, &info)
            };
            tracing::debug!(class = %class.name, parent = %class.parent, ?level, "extension class registered with engine");
            self.register_members(class);
        }
        true
    }

    fn register_members(&'static self, class: &'static ExtensionClass) {
        for entry in &class.methods {
            let signature = entry.signature();
            let params: Vec<NativeType> = signature.param_types().collect();
            let info = ClassMethodInfo {
                name: StrRef::new(entry.method()),
                method_userdata: (entry as *const VirtualEntry).cast_mut().cast(),
                call: Some(callbacks::call_method),
                flags: MethodFlags::NORMAL.bits(),
                argument_count: params.len() as u32,
                argument_types: params.as_ptr(),
                has_return_value: signature.ret.is_some(),
                // Ignored when there is no return value.
                return_type: signature.ret.unwrap_or(NativeType::Bool),
            };
            // SAFETY: `entry` lives in the leaked bridge; `params` outlives
            // the call and the engine copies it.
            unsafe {
                self.api
                    .register_extension_method(self.library.0, &class.name, &info)
            };
        }
        for property in &class.properties {
            let info = PropertyInfo {
                name: StrRef::new(property.name),
                ty: property.ty,
            };
            self.api.register_extension_property(
                self.library.0,
                &class.name,
                &info,
                property.getter,
                property.setter.unwrap_or(""),
            );
        }
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("api", &self.api)
            .field("classes", &self.classes.len())
            .field("methods", &self.methods.len())
            .field("virtuals", &self.virtuals.len())
            .field("registered", &self.is_registered())
            .finish_non_exhaustive()
    }
}
