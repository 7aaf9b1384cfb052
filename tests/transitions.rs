use serde_json::json;

mod fixture_;
use fixture_::{by_id, joined};

fn counter() -> (rendered_dom::Document, rendered_dom::View) {
	joined(json!({"s": ["<p id=\"count\">", "</p>"], "0": "0"}))
}

#[test]
fn diffs_wait_for_the_last_transition() {
	let (mut document, mut view) = counter();
	let count = by_id(&document, &view, "count");

	let first = view.begin_transition();
	let second = view.begin_transition();
	assert_eq!(view.push_diff(&mut document, json!({"0": "1"}), &mut ()).unwrap(), None);
	assert_eq!(view.push_diff(&mut document, json!({"0": "2"}), &mut ()).unwrap(), None);
	assert_eq!(document.text_content(count), "0");

	assert!(view.end_transition(&mut document, first, &mut ()).unwrap().is_empty());
	assert_eq!(document.text_content(count), "0");

	let outcome = view.end_transition(&mut document, second, &mut ()).unwrap();
	assert_eq!(document.text_content(count), "2");
	assert_eq!(outcome.updated, [count, count]);
}

#[test]
fn idle_view_patches_immediately() {
	let (mut document, mut view) = counter();
	let outcome = view.push_diff(&mut document, json!({"0": "5"}), &mut ()).unwrap();
	assert!(outcome.is_some());
	assert_eq!(document.text_content(by_id(&document, &view, "count")), "5");
}

#[test]
fn destroy_drops_queued_diffs() {
	let (mut document, mut view) = counter();
	let transition = view.begin_transition();
	assert_eq!(view.push_diff(&mut document, json!({"0": "1"}), &mut ()).unwrap(), None);

	view.destroy(&mut document);
	assert!(view.end_transition(&mut document, transition, &mut ()).unwrap().is_empty());
	assert!(view.flush(&mut document, &mut ()).unwrap().is_empty());
	assert_eq!(document.text_content(by_id(&document, &view, "count")), "0");
}

#[test]
fn diffs_after_a_failed_one_keep_their_order() {
	let (mut document, mut view) = counter();
	let count = by_id(&document, &view, "count");

	let transition = view.begin_transition();
	assert_eq!(view.push_diff(&mut document, json!(5), &mut ()).unwrap(), None);
	assert_eq!(view.push_diff(&mut document, json!({"0": "1"}), &mut ()).unwrap(), None);
	assert!(view.end_transition(&mut document, transition, &mut ()).is_err());
	assert_eq!(document.text_content(count), "0");

	let outcome = view.push_diff(&mut document, json!({"0": "2"}), &mut ()).unwrap().unwrap();
	assert_eq!(outcome.updated, [count, count]);
	assert_eq!(document.text_content(count), "2");

	assert!(view.flush(&mut document, &mut ()).unwrap().is_empty());
	assert_eq!(document.text_content(count), "2");
}
