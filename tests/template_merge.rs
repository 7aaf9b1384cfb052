use rendered_dom::{
	render::render,
	template::{Statics, TemplateNode},
	Bindings, TemplateStore,
};
use serde_json::{json, Value};
use std::rc::Rc;

mod fixture_;
use fixture_::init_logging;

fn object(value: Value) -> serde_json::Map<String, Value> {
	match value {
		Value::Object(map) => map,
		other => panic!("not an object: {}", other),
	}
}

#[test]
fn round_trip() {
	init_logging();
	let mut node = TemplateNode::from_json(object(json!({"s": ["<a>", "</a>"], "0": "x"})));
	assert_eq!(render(&mut node, false).unwrap().markup, "<a>x</a>");
}

#[test]
fn replacement_is_idempotent() {
	init_logging();
	let diff = json!({
		"s": ["<ul>", "</ul>"],
		"0": {"s": ["<li>", "</li>"], "d": [["a"], ["b"]]},
	});

	let mut store = TemplateStore::new("v");
	store.merge_diff(diff.clone()).unwrap();
	let once = store.root().clone();
	store.merge_diff(diff).unwrap();
	assert_eq!(store.root(), &once);
	assert_eq!(render(&mut once.clone(), false).unwrap().markup, "<ul><li>a</li><li>b</li></ul>");
}

#[test]
fn nested_merge_keeps_untouched_slots() {
	init_logging();
	let mut store = TemplateStore::new("v");
	store
		.merge_diff(json!({"s": ["<p>", " ", "</p>"], "0": {"s": ["<b>", "</b>"], "0": "bold"}, "1": "plain"}))
		.unwrap();
	store.merge_diff(json!({"0": {"0": "BOLD"}})).unwrap();
	assert_eq!(render(&mut store.root().clone(), false).unwrap().markup, "<p><b>BOLD</b> plain</p>");
}

#[test]
fn shared_statics_are_shared_by_reference() {
	init_logging();
	let mut store = TemplateStore::new("v");
	store
		.merge_diff(json!({
			"s": ["", "", "", ""],
			"0": 1,
			"1": 2,
			"2": 3,
			"c": {
				"1": {"s": ["<p>", "</p>"], "0": "one", "r": 1},
				"2": {"s": 1, "0": "two"},
				"3": {"s": 2, "0": "three"},
			},
		}))
		.unwrap();

	let statics = |cid| match &store.component(cid).unwrap().node.statics {
		Some(Statics::Literal(segments)) => Rc::clone(segments),
		other => panic!("unexpected statics {:?}", other),
	};
	assert!(Rc::ptr_eq(&statics(1), &statics(2)));
	assert!(Rc::ptr_eq(&statics(2), &statics(3)));

	let rendered = store.render(&Bindings::default(), None).unwrap();
	assert_eq!(
		rendered.markup,
		"<p data-live-id=\"c1-v\" data-live-component=\"1\">one</p>\
		 <p data-live-id=\"c2-v\" data-live-component=\"2\">two</p>\
		 <p data-live-id=\"c3-v\" data-live-component=\"3\">three</p>"
	);
}

#[test]
fn stored_statics_survive_a_later_payload() {
	init_logging();
	let mut store = TemplateStore::new("v");
	store
		.merge_diff(json!({"s": ["", ""], "0": 1, "c": {"1": {"s": ["<i>", "</i>"], "0": "a", "r": 1}}}))
		.unwrap();
	store.merge_diff(json!({"s": ["", "", ""], "0": 1, "1": 2, "c": {"2": {"s": -1, "0": "b"}}})).unwrap();

	let rendered = store.render(&Bindings::default(), None).unwrap();
	assert_eq!(
		rendered.markup,
		"<i data-live-id=\"c1-v\" data-live-component=\"1\">a</i><i data-live-id=\"c2-v\" data-live-component=\"2\">b</i>"
	);
}

#[test]
fn untouched_roots_render_as_skips() {
	init_logging();
	let mut store = TemplateStore::new("v");
	let bindings = Bindings::default();
	store
		.merge_diff(json!({"s": ["", "", ""], "0": {"s": ["<p id=\"a\">", "</p>"], "0": "x", "r": 1}, "1": {"s": ["<p>", "</p>"], "0": "y", "r": 1}}))
		.unwrap();
	assert_eq!(
		store.render(&bindings, None).unwrap().markup,
		"<p data-live-id=\"m1-v\" id=\"a\">x</p><p data-live-id=\"m2-v\">y</p>"
	);

	store.merge_diff(json!({"1": {"0": "z"}})).unwrap();
	assert_eq!(
		store.render(&bindings, None).unwrap().markup,
		"<p id=\"a\" data-live-id=\"m1-v\" data-live-skip></p><p data-live-id=\"m2-v\">z</p>"
	);
}
