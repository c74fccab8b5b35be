#![forbid(unsafe_code)]

//! End-to-end scenarios across the object model, bindings and components.
//!
//! Each test builds its own [`Harness`], so registries and backends never
//! leak between tests.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;
use weft_core::{ClassSpec, List, Object, Property, Value};
use weft_harness::{Harness, Recorder, assert_markup, surfaces};
use weft_runtime::{Bindable, BindingSpec};
use weft_widgets::{ComponentExt, ELEMENT, ElementExt, define_component, generated_children};

// ============================================================================
// Object model
// ============================================================================

#[test]
fn subclass_is_parent_and_parent_table_is_untouched() {
    let h = Harness::new().expect("harness");
    let shape = h
        .registry()
        .define(ClassSpec::new("Shape").property("x", Property::new().value(0)))
        .expect("define class");
    let circle = h
        .registry()
        .define(
            ClassSpec::new("Circle")
                .extends(&shape)
                .property("radius", Property::new().value(1)),
        )
        .expect("define class");

    let c = circle.instantiate().expect("instantiate");
    assert!(c.is(&shape));
    assert!(c.is(&circle));
    assert!(c.is_a("Shape"));
    assert_eq!(shape.properties().to_vec(), vec!["x".to_string()]);
    assert_eq!(
        circle.properties().to_vec(),
        vec!["x".to_string(), "radius".to_string()]
    );
    assert!(shape.instantiate().expect("instantiate").get("radius").is_undefined());
}

#[test]
fn identical_writes_do_not_notify() {
    let h = Harness::new().expect("harness");
    let point = h
        .registry()
        .define(
            ClassSpec::new("Point")
                .extends(&h.registry().observable())
                .property("x", Property::new().value(0)),
        )
        .expect("define class")
        .instantiate()
        .expect("instantiate");
    let rec = Recorder::new();
    rec.watch(&point, "x").expect("watch");

    point.set("x", 0);
    assert!(rec.is_empty());
    point.set("x", 5);
    point.set("x", 5);
    assert_eq!(rec.values("x"), vec![Value::Int(5)]);
    point.set_forced("x", 5);
    assert_eq!(rec.len(), 2);
}

#[test]
fn plain_properties_round_trip() {
    let h = Harness::new().expect("harness");
    let bag = h
        .registry()
        .define(
            ClassSpec::new("Bag")
                .extends(&h.registry().observable())
                .property("item", Property::new()),
        )
        .expect("define class")
        .instantiate()
        .expect("instantiate");
    let list = List::new();
    let other = Object::plain();
    for value in [
        Value::Int(3),
        Value::from("three"),
        Value::Bool(false),
        Value::Null,
        Value::List(list),
        Value::Object(other),
    ] {
        bag.set("item", value.clone());
        assert!(bag.get("item").same(&value));
    }
}

#[test]
fn counter_increments_notify_in_order() {
    let h = Harness::new().expect("harness");
    let counter = h
        .registry()
        .define(
            ClassSpec::new("Counter")
                .extends(&h.registry().observable())
                .property("count", Property::new().value(0))
                .method("inc", |inv| {
                    let this = inv.this();
                    let next = this.get("count").as_i64().unwrap_or(0) + 1;
                    this.set("count", next);
                    Ok(Value::Undefined)
                }),
        )
        .expect("define class")
        .instantiate()
        .expect("instantiate");
    let rec = Recorder::new();
    rec.watch(&counter, "count").expect("watch");

    for _ in 0..3 {
        counter.call("inc", &[]).expect("call method");
    }
    assert_eq!(
        rec.values("count"),
        vec![Value::Int(1), Value::Int(2), Value::Int(3)]
    );
    assert_eq!(rec.len(), 3);
    assert_eq!(counter.get("count"), Value::Int(3));
}

// ============================================================================
// Bindings
// ============================================================================

#[test]
fn two_hop_binding_follows_replaced_intermediate() {
    let _h = Harness::new().expect("harness");
    let first = Object::observable_from([("b", Value::from("one"))]);
    let source = Object::observable_from([("a", Value::Object(first.clone()))]);
    let target = Object::observable();
    target
        .set_binding("prop", BindingSpec::new("a.b"), &source)
        .expect("bind");
    assert_eq!(target.get("prop"), Value::from("one"));

    let second = Object::observable_from([("b", Value::from("two"))]);
    source.set("a", second.clone());
    assert_eq!(target.get("prop"), Value::from("two"));
    assert_eq!(first.watcher_count("b"), 0);
    assert_eq!(second.watcher_count("b"), 1);

    first.set("b", "stale");
    assert_eq!(target.get("prop"), Value::from("two"));
    second.set("b", "three");
    assert_eq!(target.get("prop"), Value::from("three"));
}

#[test]
fn label_text_tracks_person_name() {
    let h = Harness::new().expect("harness");
    let scope = Object::observable();
    let label = h.element("label").expect("element");
    label
        .set_binding("text", BindingSpec::new("person.name"), &scope)
        .expect("bind");

    let a = Object::observable_from([("name", Value::from("A"))]);
    scope.set("person", a.clone());
    assert_eq!(label.get("text"), Value::from("A"));

    let b = Object::observable_from([("name", Value::from("B"))]);
    scope.set("person", b);
    assert_eq!(label.get("text"), Value::from("B"));
    assert_eq!(a.watcher_count("name"), 0);
    assert_markup!(h, label, "<label>B</label>");
}

// ============================================================================
// Components
// ============================================================================

#[test]
fn template_inserts_and_removes_single_children() {
    let h = Harness::new().expect("harness");
    let x = Object::observable_from([("label", Value::from("X"))]);
    let y = Object::observable_from([("label", Value::from("Y"))]);
    let z = Object::observable_from([("label", Value::from("Z"))]);
    let items = List::from_vec(vec![Value::Object(x.clone()), Value::Object(y.clone())]);

    let ul = h
        .compile(&json!({ "tag": "ul", "template": { "tag": "li", "content": "{label}" } }))
        .expect("compile");
    ul.set("items", items.clone());
    assert_markup!(h, ul, "<ul><li>X</li><li>Y</li></ul>");
    let before = generated_children(&ul);

    let rec = Recorder::new();
    rec.listen(&ul, "contententer");
    rec.listen(&ul, "contentleave");

    items.insert(1, z.clone());
    assert_eq!(rec.events(), vec!["contententer"]);
    let after = generated_children(&ul);
    assert_eq!(after.len(), 3);
    assert!(after[0].ptr_eq(&before[0]));
    assert!(after[2].ptr_eq(&before[1]));
    assert!(after[1].model().same(&Value::Object(z)));
    assert_markup!(h, ul, "<ul><li>X</li><li>Z</li><li>Y</li></ul>");

    rec.clear();
    items.remove(&Value::Object(y));
    assert_eq!(rec.events(), vec!["contentleave"]);
    assert!(before[1].is_disposed());
    assert!(!before[0].is_disposed());
    assert_markup!(h, ul, "<ul><li>X</li><li>Z</li></ul>");
}

#[test]
fn fragment_children_precede_existing_child() {
    let h = Harness::new().expect("harness");
    let parent = h.element("div").expect("element");
    let existing = h.element("hr").expect("element");
    existing.attach_to(&parent, None).expect("attach");

    let fragment = h.element("#fragment").expect("element");
    let first = h.element("p").expect("element");
    let second = h.element("p").expect("element");
    first.set("text", "1");
    second.set("text", "2");
    first.attach_to(&fragment, None).expect("attach");
    second.attach_to(&fragment, None).expect("attach");

    fragment.attach_to(&parent, Some(0)).expect("attach");
    assert!(fragment.surface().is_none());
    assert_eq!(surfaces(&fragment).len(), 2);
    let rendered = h.backend().render_children(parent.surface().expect("surface"));
    assert_eq!(rendered, "<p>1</p><p>2</p><hr></hr>");
}

#[test]
fn declared_component_counter_renders_and_reacts() {
    let h = Harness::new().expect("harness");
    define_component(
        ClassSpec::new("ClickCounter")
            .property("count", Property::new().value(0))
            .method("inc", |inv| {
                let this = inv.this();
                let next = this.get("count").as_i64().unwrap_or(0) + 1;
                this.set("count", next);
                Ok(Value::Undefined)
            }),
        json!({
            "tag": "button",
            "name": "button",
            "events": { "click": "{#inc}" },
            "content": "Clicked {#count} times"
        }),
    )
    .expect("define component");

    let app = h
        .compile(&json!({ "tag": "main", "content": { "type": "ClickCounter", "name": "counter" } }))
        .expect("compile");
    assert_markup!(h, app, "<main><button>Clicked 0 times</button></main>");

    let counter = app.children()[0].clone();
    let button = counter.view("button").expect("named view");
    assert_eq!(button.tag().as_deref(), Some("button"));
    for _ in 0..2 {
        h.dispatch(&button, "click", Value::Null);
    }
    assert_eq!(counter.get("count"), Value::Int(2));
    assert_markup!(h, app, "<main><button>Clicked 2 times</button></main>");

    counter.dispose();
    assert_markup!(h, app, "<main></main>");
}

#[test]
fn two_way_input_binding_writes_back_without_echo() {
    let h = Harness::new().expect("harness");
    let form = Object::observable_from([("query", Value::from("start"))]);
    let input = h
        .compile(&json!({ "tag": "input", "value": "{query, direction=<>}" }))
        .expect("compile");
    input.set("model", form.clone());
    assert_eq!(input.get("value"), Value::from("start"));

    let rec = Recorder::new();
    rec.watch(&form, "query").expect("watch");
    input.set("value", "typed");
    assert_eq!(form.get("query"), Value::from("typed"));
    assert_eq!(rec.values("query"), vec![Value::from("typed")]);

    form.set("query", "reset");
    assert_eq!(input.get("value"), Value::from("reset"));
}

#[test]
fn sorted_and_reset_items_stay_before_static_sibling() {
    let h = Harness::new().expect("harness");
    let items = List::from_vec(vec![Value::Int(2), Value::Int(1)]);
    let ul = h
        .compile(&json!({ "tag": "ul", "template": { "tag": "li", "content": "{}" } }))
        .expect("compile");
    ul.set("items", items.clone());
    h.element("hr")
        .expect("element")
        .attach_to(&ul, None)
        .expect("attach");
    assert_markup!(h, ul, "<ul><li>2</li><li>1</li><hr></hr></ul>");

    items.sort_by(|a, b| a.as_i64().cmp(&b.as_i64()));
    assert_markup!(h, ul, "<ul><li>1</li><li>2</li><hr></hr></ul>");

    items.reset(vec![Value::Int(5)]);
    assert_markup!(h, ul, "<ul><li>5</li><hr></hr></ul>");

    items.reset(Vec::new());
    items.push(6);
    assert_markup!(h, ul, "<ul><li>6</li><hr></hr></ul>");
}

#[test]
fn regenerated_items_release_backend_nodes() {
    let h = Harness::new().expect("harness");
    let items = List::from_vec(vec![Value::Int(1), Value::Int(2)]);
    let ul = h
        .compile(&json!({ "tag": "ul", "template": { "tag": "li", "content": "{}" } }))
        .expect("compile");
    ul.set("items", items.clone());
    let settled = h.backend().node_count();
    for _ in 0..50 {
        items.reset(vec![Value::Int(1), Value::Int(2)]);
    }
    assert_eq!(h.backend().node_count(), settled);

    ul.dispose();
    assert_eq!(h.backend().node_count(), 0);
}

#[test]
fn attach_hook_runs_before_the_node_is_listed() {
    let h = Harness::new().expect("harness");
    let listed = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&listed);
    let hooked = h
        .registry()
        .define(
            ClassSpec::new("Hooked")
                .extends(&h.registry().require(ELEMENT).expect("element class"))
                .method("onAttach", move |inv| {
                    let parent = inv.arg(0).as_object().cloned().expect("parent arg");
                    let present = parent.children().iter().any(|c| c.ptr_eq(inv.this()));
                    seen.borrow_mut().push(present);
                    inv.inherited_same()
                }),
        )
        .expect("define class");
    let parent = h.element("div").expect("element");
    let child = hooked
        .instantiate_with(&[Value::from("span")])
        .expect("instantiate");
    child.attach_to(&parent, None).expect("attach");

    assert_eq!(*listed.borrow(), vec![false]);
    assert_markup!(h, parent, "<div><span></span></div>");
}
