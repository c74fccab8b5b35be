#![forbid(unsafe_code)]

//! Class descriptors, member slots, and the class builder.
//!
//! A class is built once from a [`ClassSpec`] into an immutable
//! [`ClassDescriptor`]. Member lookup goes through a single resolved table
//! computed at build time in the order *inherited → mixins → own*, later
//! entries shadowing earlier ones, so own members win over mixin members,
//! which win over inherited ones.
//!
//! # Invariants
//!
//! 1. A subclass copies its parent's table and ordered name lists; nothing
//!    a subclass declares is visible through the parent.
//! 2. Every method slot that shadows another keeps a link to it
//!    ([`MethodSlot::overridden`]), which is what [`Invocation::inherited`]
//!    dispatches to.
//! 3. Mixins contribute events, properties and methods, never `init`, and
//!    never members that originate from the built-in base classes.
//! 4. Observable wrapping is recorded per (class, property) and happens at
//!    most once; see [`ClassDescriptor::observe`].
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Static parent | `extends` a static class | `Error::StaticParent` |
//! | Static instantiation | `instantiate` on a static class | `Error::StaticInstantiation` |
//! | Abstract call | calling an `abstract_method` | `Error::Abstract` |

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;

use crate::error::{Error, Result};
use crate::object::Object;
use crate::value::{Function, Value};

/// Names of the classes every registry is seeded with.
pub const OBJECT_CLASS: &str = "Object";
pub const OBSERVABLE_CLASS: &str = "Observable";

static CLASS_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

pub type Getter = Rc<dyn Fn(&Object) -> Value>;
pub type Setter = Rc<dyn Fn(&Object, Value) -> Assign>;
pub type MethodFn = Rc<dyn Fn(&Invocation<'_>) -> Result<Value>>;

/// Outcome of a property setter. `Rejected` suppresses change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assign {
    Stored,
    Rejected,
}

/// Binding direction between a target property and a source path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Direction {
    /// `<-`: source drives target.
    #[default]
    SourceToTarget,
    /// `->`: target drives source.
    TargetToSource,
    /// `<>`: both.
    Both,
}

impl Direction {
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim() {
            "<-" => Some(Self::SourceToTarget),
            "->" => Some(Self::TargetToSource),
            "<>" => Some(Self::Both),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SourceToTarget => "<-",
            Self::TargetToSource => "->",
            Self::Both => "<>",
        }
    }

    #[must_use]
    pub const fn reads_source(self) -> bool {
        matches!(self, Self::SourceToTarget | Self::Both)
    }

    #[must_use]
    pub const fn writes_source(self) -> bool {
        matches!(self, Self::TargetToSource | Self::Both)
    }
}

/// Defaults applied when a property is used as a binding target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingDefaults {
    pub direction: Option<Direction>,
    pub format: Option<String>,
    /// Name of a registered converter.
    pub converter: Option<String>,
}

/// Property metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMeta {
    /// Properties whose change must also notify this one.
    pub dependencies: Vec<String>,
    /// `None` means serializable.
    pub serializable: Option<bool>,
    pub readonly: bool,
    /// Merge onto the inherited slot's metadata instead of replacing it.
    pub inherits: bool,
    pub binding: Option<BindingDefaults>,
}

impl PropertyMeta {
    fn merged_onto(&self, base: &PropertyMeta) -> PropertyMeta {
        let mut dependencies = base.dependencies.clone();
        for dep in &self.dependencies {
            if !dependencies.contains(dep) {
                dependencies.push(dep.clone());
            }
        }
        let binding = match (&self.binding, &base.binding) {
            (Some(own), Some(parent)) => Some(BindingDefaults {
                direction: own.direction.or(parent.direction),
                format: own.format.clone().or_else(|| parent.format.clone()),
                converter: own.converter.clone().or_else(|| parent.converter.clone()),
            }),
            (own, parent) => own.clone().or_else(|| parent.clone()),
        };
        PropertyMeta {
            dependencies,
            serializable: self.serializable.or(base.serializable),
            readonly: self.readonly || base.readonly,
            inherits: true,
            binding,
        }
    }

    #[must_use]
    pub fn is_serializable(&self) -> bool {
        self.serializable.unwrap_or(true)
    }
}

/// Default value of a property.
#[derive(Clone)]
pub enum Initial {
    /// Shared by every instance.
    Literal(Value),
    /// Evaluated once per instance.
    Factory(Rc<dyn Fn() -> Value>),
}

impl Initial {
    fn produce(&self) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Factory(f) => f(),
        }
    }
}

/// Builder for a property slot.
#[derive(Clone, Default)]
pub struct Property {
    getter: Option<Getter>,
    setter: Option<Setter>,
    initial: Option<Initial>,
    meta: PropertyMeta,
}

impl Property {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.initial = Some(Initial::Literal(value.into()));
        self
    }

    #[must_use]
    pub fn factory(mut self, f: impl Fn() -> Value + 'static) -> Self {
        self.initial = Some(Initial::Factory(Rc::new(f)));
        self
    }

    #[must_use]
    pub fn get(mut self, f: impl Fn(&Object) -> Value + 'static) -> Self {
        self.getter = Some(Rc::new(f));
        self
    }

    #[must_use]
    pub fn set(mut self, f: impl Fn(&Object, Value) -> Assign + 'static) -> Self {
        self.setter = Some(Rc::new(f));
        self
    }

    #[must_use]
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta.dependencies = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn serializable(mut self, serializable: bool) -> Self {
        self.meta.serializable = Some(serializable);
        self
    }

    #[must_use]
    pub fn readonly(mut self) -> Self {
        self.meta.readonly = true;
        self
    }

    #[must_use]
    pub fn inherits(mut self) -> Self {
        self.meta.inherits = true;
        self
    }

    #[must_use]
    pub fn binding(mut self, defaults: BindingDefaults) -> Self {
        self.meta.binding = Some(defaults);
        self
    }
}

/// A resolved property member.
pub struct PropertySlot {
    name: String,
    declared_in: String,
    builtin: bool,
    getter: Option<Getter>,
    setter: Option<Setter>,
    initial: Option<Initial>,
    meta: PropertyMeta,
}

impl PropertySlot {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the class that declared this slot.
    #[must_use]
    pub fn declared_in(&self) -> &str {
        &self.declared_in
    }

    #[must_use]
    pub fn meta(&self) -> &PropertyMeta {
        &self.meta
    }

    /// Computed properties have a getter and no setter.
    #[must_use]
    pub fn is_computed(&self) -> bool {
        self.getter.is_some() && self.setter.is_none()
    }

    pub(crate) fn read(&self, obj: &Object) -> Value {
        match &self.getter {
            Some(getter) => getter(obj),
            None => obj.stored(&self.name),
        }
    }

    pub(crate) fn write(&self, obj: &Object, value: Value) -> Assign {
        match (&self.setter, &self.getter) {
            (Some(setter), _) => setter(obj, value),
            (None, Some(_)) => Assign::Rejected,
            (None, None) => {
                obj.store(&self.name, value);
                Assign::Stored
            }
        }
    }

    pub(crate) fn initial_value(&self) -> Option<Value> {
        self.initial.as_ref().map(Initial::produce)
    }
}

impl fmt::Debug for PropertySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertySlot")
            .field("name", &self.name)
            .field("declared_in", &self.declared_in)
            .field("meta", &self.meta)
            .finish()
    }
}

/// Body of a method slot.
#[derive(Clone)]
pub enum MethodBody {
    Native(MethodFn),
    /// Declared but intentionally unimplemented.
    Abstract,
}

/// A resolved method member.
pub struct MethodSlot {
    name: String,
    declared_in: String,
    builtin: bool,
    body: MethodBody,
    overridden: Option<Rc<MethodSlot>>,
}

impl MethodSlot {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn declared_in(&self) -> &str {
        &self.declared_in
    }

    #[must_use]
    pub fn is_abstract(&self) -> bool {
        matches!(self.body, MethodBody::Abstract)
    }

    /// The slot this method shadows, if any.
    #[must_use]
    pub fn overridden(&self) -> Option<&Rc<MethodSlot>> {
        self.overridden.as_ref()
    }

    pub(crate) fn invoke(self: &Rc<Self>, this: &Object, args: &[Value]) -> Result<Value> {
        match &self.body {
            MethodBody::Abstract => Err(Error::Abstract {
                class: self.declared_in.clone(),
                method: self.name.clone(),
            }),
            MethodBody::Native(f) => f(&Invocation {
                this,
                args,
                slot: self,
            }),
        }
    }
}

impl fmt::Debug for MethodSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodSlot")
            .field("name", &self.name)
            .field("declared_in", &self.declared_in)
            .field("abstract", &self.is_abstract())
            .field("overrides", &self.overridden.as_ref().map(|o| o.declared_in.clone()))
            .finish()
    }
}

/// A resolved event member.
#[derive(Debug)]
pub struct EventSlot {
    name: String,
    declared_in: String,
    builtin: bool,
}

impl EventSlot {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn declared_in(&self) -> &str {
        &self.declared_in
    }
}

/// A method call in progress.
pub struct Invocation<'a> {
    this: &'a Object,
    args: &'a [Value],
    slot: &'a Rc<MethodSlot>,
}

impl<'a> Invocation<'a> {
    #[must_use]
    pub fn this(&self) -> &'a Object {
        self.this
    }

    #[must_use]
    pub fn args(&self) -> &'a [Value] {
        self.args
    }

    /// Argument `index`, or `Undefined` when missing.
    #[must_use]
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn method(&self) -> &'a MethodSlot {
        self.slot
    }

    /// Call the method this one overrode. Returns `Undefined` when there is none.
    pub fn inherited(&self, args: &[Value]) -> Result<Value> {
        match &self.slot.overridden {
            Some(previous) => previous.invoke(self.this, args),
            None => Ok(Value::Undefined),
        }
    }

    /// [`inherited`](Self::inherited) with the current arguments.
    pub fn inherited_same(&self) -> Result<Value> {
        self.inherited(self.args)
    }
}

/// Tagged member resolved through a class table.
#[derive(Clone)]
pub enum Member {
    Property(Rc<PropertySlot>),
    Event(Rc<EventSlot>),
    Method(Rc<MethodSlot>),
}

impl Member {
    fn declared_in(&self) -> &str {
        match self {
            Self::Property(p) => &p.declared_in,
            Self::Event(e) => &e.declared_in,
            Self::Method(m) => &m.declared_in,
        }
    }

    fn is_builtin(&self) -> bool {
        match self {
            Self::Property(p) => p.builtin,
            Self::Event(e) => e.builtin,
            Self::Method(m) => m.builtin,
        }
    }

    #[must_use]
    pub fn kind(&self) -> MemberKind {
        match self {
            Self::Property(_) => MemberKind::Property,
            Self::Event(_) => MemberKind::Event,
            Self::Method(_) => MemberKind::Method,
        }
    }
}

/// Reflective classification of a name on an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// Not declared; backed by the instance value map or the class fallback.
    Field,
    Property,
    Event,
    Method,
}

/// Accessor used for names that resolve to no declared member.
#[derive(Clone)]
pub struct Fallback {
    get: Rc<dyn Fn(&Object, &str) -> Option<Value>>,
    set: Rc<dyn Fn(&Object, &str, &Value) -> bool>,
}

impl Fallback {
    /// `get` returning `None` and `set` returning `false` defer to the value map.
    pub fn new(
        get: impl Fn(&Object, &str) -> Option<Value> + 'static,
        set: impl Fn(&Object, &str, &Value) -> bool + 'static,
    ) -> Self {
        Self {
            get: Rc::new(get),
            set: Rc::new(set),
        }
    }

    pub(crate) fn get(&self, obj: &Object, name: &str) -> Option<Value> {
        (self.get)(obj, name)
    }

    pub(crate) fn set(&self, obj: &Object, name: &str, value: &Value) -> bool {
        (self.set)(obj, name, value)
    }
}

#[derive(Clone)]
enum StaticMember {
    Field(Value),
    Method(Rc<dyn Fn(&[Value]) -> Result<Value>>),
}

/// Declarative description of a class, consumed by
/// [`Registry::define`](crate::Registry::define).
#[derive(Clone, Default)]
pub struct ClassSpec {
    name: Option<String>,
    parent: Option<Class>,
    mixins: Vec<Class>,
    properties: Vec<(String, Property)>,
    events: Vec<String>,
    methods: Vec<(String, MethodBody)>,
    statics: Vec<(String, StaticMember)>,
    fallback: Option<Fallback>,
    is_static: bool,
    observable: bool,
    builtin: bool,
}

impl ClassSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// A class with a generated name; it is not registered by name.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The explicit parent, if [`extends`](Self::extends) was called.
    #[must_use]
    pub fn parent(&self) -> Option<&Class> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn extends(mut self, parent: &Class) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    #[must_use]
    pub fn mixin(mut self, mixin: &Class) -> Self {
        self.mixins.push(mixin.clone());
        self
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>, property: Property) -> Self {
        self.properties.push((name.into(), property));
        self
    }

    #[must_use]
    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.events.push(name.into());
        self
    }

    #[must_use]
    pub fn method(
        mut self,
        name: impl Into<String>,
        body: impl Fn(&Invocation<'_>) -> Result<Value> + 'static,
    ) -> Self {
        self.methods
            .push((name.into(), MethodBody::Native(Rc::new(body))));
        self
    }

    #[must_use]
    pub fn abstract_method(mut self, name: impl Into<String>) -> Self {
        self.methods.push((name.into(), MethodBody::Abstract));
        self
    }

    #[must_use]
    pub fn static_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.statics
            .push((name.into(), StaticMember::Field(value.into())));
        self
    }

    #[must_use]
    pub fn static_method(
        mut self,
        name: impl Into<String>,
        body: impl Fn(&[Value]) -> Result<Value> + 'static,
    ) -> Self {
        self.statics
            .push((name.into(), StaticMember::Method(Rc::new(body))));
        self
    }

    #[must_use]
    pub fn fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Make this a singleton namespace that cannot be instantiated.
    #[must_use]
    pub fn static_class(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub(crate) fn builtin(mut self, observable: bool) -> Self {
        self.builtin = true;
        self.observable = observable;
        self
    }
}

// ---------------------------------------------------------------------------
// ClassDescriptor
// ---------------------------------------------------------------------------

/// An immutable, fully resolved class.
pub struct ClassDescriptor {
    id: u64,
    name: String,
    parent: Option<Class>,
    mixins: Vec<Class>,
    is_static: bool,
    observable: bool,
    builtin: bool,
    members: AHashMap<String, Member>,
    properties: Vec<String>,
    events: Vec<String>,
    methods: Vec<String>,
    fallback: Option<Fallback>,
    statics: Vec<(String, StaticMember)>,
    statics_object: OnceCell<Object>,
    observed: RefCell<AHashMap<String, Rc<[String]>>>,
}

/// Shared handle to a [`ClassDescriptor`].
#[derive(Clone)]
pub struct Class(Rc<ClassDescriptor>);

impl std::ops::Deref for Class {
    type Target = ClassDescriptor;

    fn deref(&self) -> &ClassDescriptor {
        &self.0
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Class {}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("parent", &self.parent.as_ref().map(|p| p.name.clone()))
            .field("static", &self.is_static)
            .finish()
    }
}

impl ClassDescriptor {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Class> {
        self.parent.as_ref()
    }

    /// Flattened mixins: inherited first, then own, in declaration order.
    #[must_use]
    pub fn mixins(&self) -> &[Class] {
        &self.mixins
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Whether instances accept watchers.
    #[must_use]
    pub fn is_observable(&self) -> bool {
        self.observable
    }

    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.builtin
    }

    #[must_use]
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Rc<PropertySlot>> {
        match self.members.get(name) {
            Some(Member::Property(slot)) => Some(slot),
            _ => None,
        }
    }

    #[must_use]
    pub fn method(&self, name: &str) -> Option<&Rc<MethodSlot>> {
        match self.members.get(name) {
            Some(Member::Method(slot)) => Some(slot),
            _ => None,
        }
    }

    #[must_use]
    pub fn has_event(&self, name: &str) -> bool {
        matches!(self.members.get(name), Some(Member::Event(_)))
    }

    /// Ordered property names, inherited first.
    #[must_use]
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    #[must_use]
    pub fn events(&self) -> &[String] {
        &self.events
    }

    #[must_use]
    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    #[must_use]
    pub fn fallback(&self) -> Option<&Fallback> {
        self.fallback.as_ref()
    }

    /// Whether `other` is this class, an ancestor, or one of its mixins.
    #[must_use]
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        if self.id == other.id || self.mixins.iter().any(|m| m.id == other.id) {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.is_subclass_of(other))
    }

    /// Name-based variant of [`is_subclass_of`](Self::is_subclass_of).
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool {
        if self.name == name || self.mixins.iter().any(|m| m.name == name) {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.is_named(name))
    }

    /// Wrap `name` for change notification and return its flat `refs` list:
    /// every other property whose `dependencies` names it.
    ///
    /// Idempotent: the list is computed on the first call and cached.
    /// Dependencies of `name` are wrapped as well so their writes reach it.
    /// Returns `None` when `name` is not a property.
    pub fn observe(&self, name: &str) -> Option<Rc<[String]>> {
        let slot = self.property(name)?;
        if let Some(refs) = self.observed.borrow().get(name) {
            return Some(Rc::clone(refs));
        }
        let refs: Rc<[String]> = self
            .properties
            .iter()
            .filter(|other| other.as_str() != name)
            .filter(|other| {
                self.property(other)
                    .is_some_and(|p| p.meta.dependencies.iter().any(|d| d == name))
            })
            .cloned()
            .collect();
        self.observed
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&refs));
        #[cfg(feature = "tracing")]
        tracing::trace!(class = %self.name, property = name, refs = refs.len(), "property wrapped");
        for dep in slot.meta.dependencies.clone() {
            self.observe(&dep);
        }
        Some(refs)
    }

    /// The cached `refs` list when `name` has been wrapped.
    #[must_use]
    pub fn refs(&self, name: &str) -> Option<Rc<[String]>> {
        self.observed.borrow().get(name).cloned()
    }

    #[must_use]
    pub fn is_observed(&self, name: &str) -> bool {
        self.observed.borrow().contains_key(name)
    }
}

impl Class {
    pub(crate) fn build(spec: ClassSpec, base: Option<&Class>) -> Result<Class> {
        let parent = spec.parent.clone().or_else(|| base.cloned());
        if let Some(p) = &parent
            && p.is_static
        {
            return Err(Error::StaticParent {
                class: spec.name.clone().unwrap_or_else(|| "<anonymous>".to_string()),
                parent: p.name.clone(),
            });
        }
        Ok(Self::resolve(spec, parent))
    }

    /// Resolve a spec whose parent is already known to be instantiable.
    pub(crate) fn resolve(spec: ClassSpec, parent: Option<Class>) -> Class {
        let id = CLASS_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = spec.name.clone().unwrap_or_else(|| format!("Anonymous{id}"));

        let mut table = Table::inherit(parent.as_ref());
        let mut mixins: Vec<Class> = parent.as_ref().map(|p| p.mixins.clone()).unwrap_or_default();

        for mixin in &spec.mixins {
            for m in mixin.mixins.iter().chain(std::iter::once(mixin)) {
                if !mixins.iter().any(|known| known.id == m.id) {
                    mixins.push(m.clone());
                }
            }
            table.mix(mixin);
        }

        table.declare(&name, &spec);

        let observable = spec.observable
            || parent.as_ref().is_some_and(|p| p.observable)
            || mixins.iter().any(|m| m.observable);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            class = %name,
            parent = parent.as_ref().map(|p| p.name.as_str()),
            properties = table.properties.len(),
            methods = table.methods.len(),
            "class defined"
        );

        Class(Rc::new(ClassDescriptor {
            id,
            name,
            parent,
            mixins,
            is_static: spec.is_static,
            observable,
            builtin: spec.builtin,
            fallback: spec.fallback.clone().or_else(|| table.fallback.clone()),
            members: table.members,
            properties: table.properties,
            events: table.events,
            methods: table.methods,
            statics: spec.statics,
            statics_object: OnceCell::new(),
            observed: RefCell::new(AHashMap::new()),
        }))
    }

    /// Create an instance with no constructor arguments.
    pub fn instantiate(&self) -> Result<Object> {
        self.instantiate_with(&[])
    }

    /// Create an instance, passing `args` to `init`.
    ///
    /// Order: mixin `init` hooks (mixin order), property defaults, the
    /// class's own `init`; the instance leaves its initializing state last.
    pub fn instantiate_with(&self, args: &[Value]) -> Result<Object> {
        if self.is_static {
            return Err(Error::StaticInstantiation {
                class: self.name.clone(),
            });
        }
        let obj = Object::allocate(self.clone());
        for mixin in &self.mixins {
            if let Some(init) = mixin.method("init").filter(|m| !m.builtin) {
                Rc::clone(init).invoke(&obj, &[])?;
            }
        }
        for name in &self.properties {
            if let Some(slot) = self.property(name)
                && let Some(value) = slot.initial_value()
            {
                slot.write(&obj, value);
            }
        }
        if let Some(init) = self.method("init") {
            Rc::clone(init).invoke(&obj, args)?;
        }
        obj.finish_init();
        Ok(obj)
    }

    /// The singleton namespace object carrying this class's statics.
    pub fn statics(&self) -> &Object {
        self.statics_object.get_or_init(|| {
            let obj = Object::allocate(crate::registry::builtin_object());
            for (name, member) in &self.statics {
                match member {
                    StaticMember::Field(value) => obj.store(name, value.clone()),
                    StaticMember::Method(f) => {
                        let f = Rc::clone(f);
                        obj.store(name, Value::Function(Function::new(move |args| f(args))));
                    }
                }
            }
            obj.finish_init();
            obj
        })
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Class) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Working state while resolving a class table.
struct Table {
    members: AHashMap<String, Member>,
    properties: Vec<String>,
    events: Vec<String>,
    methods: Vec<String>,
    fallback: Option<Fallback>,
}

impl Table {
    fn inherit(parent: Option<&Class>) -> Self {
        match parent {
            Some(p) => Self {
                members: p.members.clone(),
                properties: p.properties.clone(),
                events: p.events.clone(),
                methods: p.methods.clone(),
                fallback: p.fallback.clone(),
            },
            None => Self {
                members: AHashMap::new(),
                properties: Vec::new(),
                events: Vec::new(),
                methods: Vec::new(),
                fallback: None,
            },
        }
    }

    fn push_name(list: &mut Vec<String>, name: &str) {
        if !list.iter().any(|n| n == name) {
            list.push(name.to_string());
        }
    }

    fn mix(&mut self, mixin: &Class) {
        for name in &mixin.events {
            if let Some(member @ Member::Event(_)) = mixin.members.get(name)
                && !member.is_builtin()
            {
                self.members.insert(name.clone(), member.clone());
                Self::push_name(&mut self.events, name);
            }
        }
        for name in &mixin.properties {
            if let Some(Member::Property(slot)) = mixin.members.get(name)
                && !slot.builtin
            {
                let copy = PropertySlot {
                    name: slot.name.clone(),
                    declared_in: slot.declared_in.clone(),
                    builtin: false,
                    getter: slot.getter.clone(),
                    setter: slot.setter.clone(),
                    initial: slot.initial.clone(),
                    meta: slot.meta.clone(),
                };
                self.members
                    .insert(name.clone(), Member::Property(Rc::new(copy)));
                Self::push_name(&mut self.properties, name);
            }
        }
        for name in &mixin.methods {
            if name == "init" {
                continue;
            }
            if let Some(Member::Method(slot)) = mixin.members.get(name)
                && !slot.builtin
            {
                let overridden = self.method(name);
                let copy = MethodSlot {
                    name: slot.name.clone(),
                    declared_in: slot.declared_in.clone(),
                    builtin: false,
                    body: slot.body.clone(),
                    overridden,
                };
                self.members.insert(name.clone(), Member::Method(Rc::new(copy)));
                Self::push_name(&mut self.methods, name);
            }
        }
        if self.fallback.is_none() {
            self.fallback = mixin.fallback.clone();
        }
    }

    fn declare(&mut self, class_name: &str, spec: &ClassSpec) {
        for name in &spec.events {
            let slot = EventSlot {
                name: name.clone(),
                declared_in: class_name.to_string(),
                builtin: spec.builtin,
            };
            self.members.insert(name.clone(), Member::Event(Rc::new(slot)));
            Self::push_name(&mut self.events, name);
        }
        for (name, property) in &spec.properties {
            let inherited = match self.members.get(name) {
                Some(Member::Property(slot)) if property.meta.inherits => Some(Rc::clone(slot)),
                _ => None,
            };
            let slot = match inherited {
                Some(base) => PropertySlot {
                    name: name.clone(),
                    declared_in: class_name.to_string(),
                    builtin: spec.builtin,
                    getter: property.getter.clone().or_else(|| base.getter.clone()),
                    setter: property.setter.clone().or_else(|| base.setter.clone()),
                    initial: property.initial.clone().or_else(|| base.initial.clone()),
                    meta: property.meta.merged_onto(&base.meta),
                },
                None => PropertySlot {
                    name: name.clone(),
                    declared_in: class_name.to_string(),
                    builtin: spec.builtin,
                    getter: property.getter.clone(),
                    setter: property.setter.clone(),
                    initial: property.initial.clone(),
                    meta: property.meta.clone(),
                },
            };
            self.members
                .insert(name.clone(), Member::Property(Rc::new(slot)));
            Self::push_name(&mut self.properties, name);
        }
        for (name, body) in &spec.methods {
            let slot = MethodSlot {
                name: name.clone(),
                declared_in: class_name.to_string(),
                builtin: spec.builtin,
                body: body.clone(),
                overridden: self.method(name),
            };
            self.members.insert(name.clone(), Member::Method(Rc::new(slot)));
            Self::push_name(&mut self.methods, name);
        }
        // A member redeclared with a different kind drops out of the old list.
        self.properties
            .retain(|n| matches!(self.members.get(n), Some(Member::Property(_))));
        self.events
            .retain(|n| matches!(self.members.get(n), Some(Member::Event(_))));
        self.methods
            .retain(|n| matches!(self.members.get(n), Some(Member::Method(_))));
    }

    fn method(&self, name: &str) -> Option<Rc<MethodSlot>> {
        match self.members.get(name) {
            Some(Member::Method(slot)) => Some(Rc::clone(slot)),
            _ => None,
        }
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind(), self.declared_in())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Registry;

    fn animal(registry: &Registry) -> Class {
        registry
            .define(
                ClassSpec::new("Animal")
                    .property("legs", Property::new().value(4))
                    .property(
                        "sound",
                        Property::new().value("...").binding(BindingDefaults {
                            direction: Some(Direction::Both),
                            ..BindingDefaults::default()
                        }),
                    )
                    .event("moved")
                    .method("speak", |inv| Ok(inv.this().get("sound")))
                    .method("describe", |_| Ok(Value::from("animal"))),
            )
            .expect("define Animal")
    }

    #[test]
    fn subclass_copies_name_lists() {
        let registry = Registry::new();
        let parent = animal(&registry);
        let child = registry
            .define(
                ClassSpec::new("Bird")
                    .extends(&parent)
                    .property("wings", Property::new().value(2)),
            )
            .expect("define Bird");
        assert!(child.properties().iter().any(|p| p == "wings"));
        assert!(!parent.properties().iter().any(|p| p == "wings"));
        assert!(parent.property("wings").is_none());
        assert!(child.is_subclass_of(&parent));
        assert!(!parent.is_subclass_of(&child));
    }

    #[test]
    fn own_members_shadow_mixins_shadow_inherited() {
        let registry = Registry::new();
        let parent = animal(&registry);
        let loud = registry
            .define(
                ClassSpec::new("Loud")
                    .method("describe", |_| Ok(Value::from("loud")))
                    .method("shout", |_| Ok(Value::from("HEY")))
                    .method("init", |inv| {
                        inv.this().store("loud_init", Value::from(true));
                        Ok(Value::Undefined)
                    }),
            )
            .expect("define Loud");
        let dog = registry
            .define(
                ClassSpec::new("Dog")
                    .extends(&parent)
                    .mixin(&loud)
                    .method("shout", |inv| {
                        let base = inv.inherited_same()?;
                        Ok(Value::from(format!("{base}!")))
                    }),
            )
            .expect("define Dog");

        let rex = dog.instantiate().expect("instantiate");
        assert_eq!(rex.call("describe", &[]).expect("describe"), Value::from("loud"));
        assert_eq!(rex.call("shout", &[]).expect("shout"), Value::from("HEY!"));
        assert_eq!(rex.stored("loud_init"), Value::from(true));
        assert!(rex.is(&loud));
        assert!(dog.method("init").is_none_or(|m| m.declared_in() != "Loud"));
    }

    #[test]
    fn inherits_merges_metadata() {
        let registry = Registry::new();
        let parent = animal(&registry);
        let child = registry
            .define(
                ClassSpec::new("Cat")
                    .extends(&parent)
                    .property("sound", Property::new().value("meow").inherits().serializable(false)),
            )
            .expect("define Cat");
        let slot = child.property("sound").expect("sound");
        assert_eq!(
            slot.meta().binding.as_ref().and_then(|b| b.direction),
            Some(Direction::Both)
        );
        assert!(!slot.meta().is_serializable());
        let base = parent.property("sound").expect("sound");
        assert!(base.meta().is_serializable());
    }

    #[test]
    fn static_classes_refuse_instances_and_children() {
        let registry = Registry::new();
        let util = registry
            .define(
                ClassSpec::new("Util")
                    .static_class()
                    .static_field("version", 3)
                    .static_method("double", |args| {
                        Ok(Value::from(args.first().and_then(Value::as_i64).unwrap_or(0) * 2))
                    }),
            )
            .expect("define Util");
        assert!(matches!(
            util.instantiate(),
            Err(Error::StaticInstantiation { .. })
        ));
        assert!(matches!(
            registry.define(ClassSpec::new("Sub").extends(&util)),
            Err(Error::StaticParent { .. })
        ));
        assert_eq!(util.statics().get("version"), Value::from(3));
        assert_eq!(
            util.statics().call("double", &[Value::from(21)]).expect("double"),
            Value::from(42)
        );
        assert!(util.statics().ptr_eq(util.statics()));
    }

    #[test]
    fn abstract_methods_fail_at_call_time() {
        let registry = Registry::new();
        let base = registry
            .define(ClassSpec::new("Iterable").abstract_method("each"))
            .expect("define");
        let obj = base.instantiate().expect("instantiate");
        assert!(matches!(obj.call("each", &[]), Err(Error::Abstract { .. })));
    }

    #[test]
    fn observe_precomputes_one_level_refs() {
        let registry = Registry::new();
        let class = registry
            .define(
                ClassSpec::new("Name")
                    .extends(&registry.observable())
                    .property("first", Property::new().value("a"))
                    .property(
                        "full",
                        Property::new()
                            .get(|o| Value::from(format!("{} !", o.get("first"))))
                            .depends_on(["first"]),
                    )
                    .property(
                        "shout",
                        Property::new()
                            .get(|o| Value::from(o.get("full").to_string().to_uppercase()))
                            .depends_on(["full"]),
                    ),
            )
            .expect("define");
        let refs = class.observe("first").expect("property");
        assert_eq!(&*refs, &["full".to_string()]);
        assert!(class.observe("missing").is_none());
        // Wrapping `shout` wraps its dependency as well.
        class.observe("shout");
        assert!(class.is_observed("full"));
        assert!(Rc::ptr_eq(&refs, &class.observe("first").expect("cached")));
    }

    #[test]
    fn defaults_literal_shared_factory_per_instance() {
        let registry = Registry::new();
        let class = registry
            .define(
                ClassSpec::new("Holder")
                    .property("shared", Property::new().value(crate::Object::plain()))
                    .property(
                        "own",
                        Property::new().factory(|| Value::from(crate::Object::plain())),
                    ),
            )
            .expect("define");
        let a = class.instantiate().expect("a");
        let b = class.instantiate().expect("b");
        assert!(a.get("shared").same(&b.get("shared")));
        assert!(!a.get("own").same(&b.get("own")));
    }
}
