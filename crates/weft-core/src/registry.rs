#![forbid(unsafe_code)]

//! Class registry.
//!
//! A [`Registry`] maps class names to resolved [`Class`]es. Every registry
//! is seeded with the built-in `Object` base class and the `Observable`
//! class. The built-ins are shared per thread so plain data objects
//! ([`Object::plain`], [`Object::observable`]) need no registry at all.
//!
//! [`Registry::global`] is a thread-local default; explicit registries are
//! independent values.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::class::{Class, ClassSpec, OBJECT_CLASS, OBSERVABLE_CLASS};
use crate::error::{Error, Result};
use crate::object::Object;
use crate::value::Value;

struct Builtins {
    object: Class,
    observable: Class,
}

impl Builtins {
    fn create() -> Self {
        let object = Class::resolve(
            ClassSpec::new(OBJECT_CLASS)
                .method("init", |_| Ok(Value::Undefined))
                .method("dispose", |inv| {
                    inv.this().release();
                    Ok(Value::Undefined)
                })
                .builtin(false),
            None,
        );
        let observable = Class::resolve(
            ClassSpec::new(OBSERVABLE_CLASS).builtin(true),
            Some(object.clone()),
        );
        Self { object, observable }
    }
}

thread_local! {
    static BUILTINS: Builtins = Builtins::create();
    static GLOBAL: Registry = Registry::new();
}

pub(crate) fn builtin_object() -> Class {
    BUILTINS.with(|b| b.object.clone())
}

pub(crate) fn builtin_observable() -> Class {
    BUILTINS.with(|b| b.observable.clone())
}

/// Name → class table.
#[derive(Clone)]
pub struct Registry {
    classes: Rc<RefCell<AHashMap<String, Class>>>,
}

impl Registry {
    /// A registry holding only the built-in classes.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self {
            classes: Rc::new(RefCell::new(AHashMap::new())),
        };
        registry.insert(builtin_object());
        registry.insert(builtin_observable());
        registry
    }

    /// The thread-local default registry.
    #[must_use]
    pub fn global() -> Self {
        GLOBAL.with(Clone::clone)
    }

    /// Build a class and register it under its name.
    ///
    /// An omitted parent means the base `Object` class. Anonymous classes
    /// are built but not registered. Redefining a name replaces the entry;
    /// classes already built from the old entry are unaffected.
    pub fn define(&self, spec: ClassSpec) -> Result<Class> {
        let named = spec.name().is_some();
        let class = Class::build(spec, Some(&self.base()))?;
        if named {
            self.insert(class.clone());
        }
        Ok(class)
    }

    /// Register an already built class under its name.
    pub fn insert(&self, class: Class) {
        let previous = self
            .classes
            .borrow_mut()
            .insert(class.name().to_string(), class);
        #[cfg(feature = "tracing")]
        if let Some(previous) = &previous {
            tracing::debug!(class = %previous.name(), "class redefined");
        }
        drop(previous);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Class> {
        self.classes.borrow().get(name).cloned()
    }

    pub fn require(&self, name: &str) -> Result<Class> {
        self.get(name).ok_or_else(|| Error::UnknownClass {
            name: name.to_string(),
        })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.classes.borrow().contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// The built-in base class.
    #[must_use]
    pub fn base(&self) -> Class {
        self.get(OBJECT_CLASS).unwrap_or_else(builtin_object)
    }

    /// The built-in observable class.
    #[must_use]
    pub fn observable(&self) -> Class {
        self.get(OBSERVABLE_CLASS).unwrap_or_else(builtin_observable)
    }

    /// Look up `name` and instantiate it with `args`.
    pub fn instantiate(&self, name: &str, args: &[Value]) -> Result<Object> {
        self.require(name)?.instantiate_with(args)
    }

    /// Whether both handles share one table.
    #[must_use]
    pub fn ptr_eq(&self, other: &Registry) -> bool {
        Rc::ptr_eq(&self.classes, &other.classes)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("classes", &self.names())
            .finish()
    }
}
