#![forbid(unsafe_code)]

//! Value converters applied between a binding's source and target.
//!
//! Named converters are looked up in a thread-local table seeded with
//! `boolean`, `inverted`, `string` and `number`. Callers may add their own
//! with [`Converter::register`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use weft_core::Value;

type Transform = Rc<dyn Fn(&Value) -> Value>;

thread_local! {
    static NAMED: RefCell<AHashMap<String, Converter>> = RefCell::new(builtin_converters());
}

/// A transform with an inverse.
///
/// `convert` runs source → target, `convert_back` target → source.
#[derive(Clone)]
pub struct Converter {
    convert: Transform,
    convert_back: Transform,
}

impl Converter {
    pub fn new(
        convert: impl Fn(&Value) -> Value + 'static,
        convert_back: impl Fn(&Value) -> Value + 'static,
    ) -> Self {
        Self {
            convert: Rc::new(convert),
            convert_back: Rc::new(convert_back),
        }
    }

    /// A one-directional converter; writes back pass through unchanged.
    pub fn forward(convert: impl Fn(&Value) -> Value + 'static) -> Self {
        Self::new(convert, Value::clone)
    }

    #[must_use]
    pub fn identity() -> Self {
        Self::new(Value::clone, Value::clone)
    }

    #[must_use]
    pub fn convert(&self, value: &Value) -> Value {
        (self.convert)(value)
    }

    #[must_use]
    pub fn convert_back(&self, value: &Value) -> Value {
        (self.convert_back)(value)
    }

    /// Look up a named converter on this thread.
    #[must_use]
    pub fn named(name: &str) -> Option<Converter> {
        NAMED.with(|table| table.borrow().get(name).cloned())
    }

    /// Register (or replace) a named converter on this thread.
    pub fn register(name: impl Into<String>, converter: Converter) {
        let name = name.into();
        tracing::debug!(converter = %name, "converter registered");
        NAMED.with(|table| table.borrow_mut().insert(name, converter));
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Converter")
    }
}

fn to_number(value: &Value) -> Value {
    match value {
        Value::Int(_) | Value::Float(_) => value.clone(),
        Value::Bool(b) => Value::Int(i64::from(*b)),
        Value::Str(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(Value::Int)
                .or_else(|_| s.parse::<f64>().map(Value::Float))
                .unwrap_or(Value::Float(f64::NAN))
        }
        Value::Undefined | Value::Null => Value::Int(0),
        _ => Value::Float(f64::NAN),
    }
}

fn builtin_converters() -> AHashMap<String, Converter> {
    let mut table = AHashMap::new();
    table.insert(
        "boolean".to_string(),
        Converter::forward(|v| Value::Bool(v.truthy())),
    );
    table.insert(
        "inverted".to_string(),
        Converter::new(|v| Value::Bool(!v.truthy()), |v| Value::Bool(!v.truthy())),
    );
    table.insert(
        "string".to_string(),
        Converter::forward(|v| Value::from(v.to_string())),
    );
    table.insert("number".to_string(), Converter::new(to_number, to_number));
    table
}
