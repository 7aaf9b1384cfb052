use serde_json::{json, Value};

mod fixture_;
use fixture_::{by_id, child_ids, joined};

fn log(policy: &str, rows: &[(&str, &str)]) -> Value {
	json!({
		"s": [format!("<ul id=\"log\" live-update=\"{}\">", policy), "</ul>"],
		"0": rows_diff(rows),
	})
}

fn rows_diff(rows: &[(&str, &str)]) -> Value {
	json!({
		"s": ["<li id=\"", "\">", "</li>"],
		"d": rows.iter().map(|(id, text)| json!([id, text])).collect::<Vec<_>>(),
	})
}

fn only_rows(rows: &[(&str, &str)]) -> Value {
	json!({"0": {"d": rows.iter().map(|(id, text)| json!([id, text])).collect::<Vec<_>>()}})
}

#[test]
fn append_keeps_old_children_first() {
	let (mut document, mut view) = joined(log("append", &[("m1", "one"), ("m2", "two")]));
	let list = by_id(&document, &view, "log");

	let outcome = view.update(&mut document, only_rows(&[("m3", "three")]), &mut ()).unwrap();

	assert_eq!(child_ids(&document, list), ["m1", "m2", "m3"]);
	assert!(outcome.discarded.is_empty());
	assert_eq!(outcome.added.len(), 1);
}

#[test]
fn prepend_puts_new_children_first() {
	let (mut document, mut view) = joined(log("prepend", &[("m1", "one"), ("m2", "two")]));
	let list = by_id(&document, &view, "log");

	view.update(&mut document, only_rows(&[("m3", "three"), ("m4", "four")]), &mut ()).unwrap();

	assert_eq!(child_ids(&document, list), ["m3", "m4", "m1", "m2"]);
}

#[test]
fn existing_child_is_updated_in_place() {
	let (mut document, mut view) = joined(log("append", &[("m1", "one"), ("m2", "two"), ("m3", "three")]));
	let list = by_id(&document, &view, "log");
	let second = by_id(&document, &view, "m2");

	view.update(&mut document, only_rows(&[("m2", "TWO")]), &mut ()).unwrap();

	assert_eq!(child_ids(&document, list), ["m1", "m2", "m3"]);
	assert_eq!(by_id(&document, &view, "m2"), second);
	assert_eq!(document.text_content(second), "TWO");
}

#[test]
fn join_prunes_children_not_rendered_again() {
	let (mut document, mut view) = joined(log("append", &[("m1", "one")]));
	view.update(&mut document, only_rows(&[("m2", "two")]), &mut ()).unwrap();
	let list = by_id(&document, &view, "log");
	assert_eq!(child_ids(&document, list), ["m1", "m2"]);

	let outcome = view.join(&mut document, log("append", &[("m2", "two"), ("m9", "nine")]), &mut ()).unwrap();

	assert_eq!(child_ids(&document, list), ["m2", "m9"]);
	assert_eq!(outcome.discarded.len(), 1);
	assert!(!document.has_attribute(by_id(&document, &view, "m2"), "data-live-prune"));
}
