use rendered_dom::markup::inner_html;
use serde_json::json;

mod fixture_;
use fixture_::{by_id, child_ids, joined, Event, Recorder};

#[test]
fn join_then_update() {
	let (mut document, mut view) = joined(json!({"s": ["<h1>", "</h1><p id=\"count\">", "</p>"], "0": "Counter", "1": "0"}));
	assert_eq!(inner_html(&document, view.container()), "<h1>Counter</h1><p id=\"count\">0</p>");

	let count = by_id(&document, &view, "count");
	let outcome = view.update(&mut document, json!({"1": "1"}), &mut ()).unwrap();
	assert_eq!(inner_html(&document, view.container()), "<h1>Counter</h1><p id=\"count\">1</p>");
	assert_eq!(by_id(&document, &view, "count"), count);
	assert!(outcome.added.is_empty());
	assert!(outcome.discarded.is_empty());
	assert!(outcome.updated.contains(&count));
}

#[test]
fn skipped_roots_keep_their_nodes() {
	let (mut document, mut view) = joined(json!({
		"s": ["<section>", "", "</section>"],
		"0": {"s": ["<p id=\"first\">", "</p>"], "0": "one", "r": 1},
		"1": {"s": ["<span id=\"second\">", "</span>"], "0": "two", "r": 1},
	}));
	let first = by_id(&document, &view, "first");
	let first_text = document.first_child(first).unwrap();

	let mut recorder = Recorder::default();
	let outcome = view.update(&mut document, json!({"1": {"0": "three"}}), &mut recorder).unwrap();

	assert_eq!(by_id(&document, &view, "first"), first);
	assert_eq!(document.first_child(first), Some(first_text));
	assert_eq!(document.text(first_text), Some("one"));
	assert!(!document.has_attribute(first, "data-live-skip"));
	assert!(!recorder.updated(first));
	assert!(!outcome.updated.contains(&first));

	let second = by_id(&document, &view, "second");
	assert_eq!(document.text_content(second), "three");
	assert!(outcome.updated.contains(&second));
}

#[test]
fn keyed_reorder_moves_without_callbacks() {
	let rows = |ids: [&str; 3]| json!(ids.iter().map(|id| json!([id, id.to_uppercase()])).collect::<Vec<_>>());
	let (mut document, mut view) = joined(json!({
		"s": ["<ul id=\"list\">", "</ul>"],
		"0": {"s": ["<li id=\"", "\">", "</li>"], "d": rows(["a", "b", "c"])},
	}));
	let list = by_id(&document, &view, "list");
	let before: Vec<_> = document.element_children(list);

	let mut recorder = Recorder::default();
	let outcome = view.update(&mut document, json!({"0": {"d": rows(["c", "a", "b"])}}), &mut recorder).unwrap();

	assert_eq!(child_ids(&document, list), ["c", "a", "b"]);
	assert_eq!(document.element_children(list), [before[2], before[0], before[1]]);
	assert_eq!(recorder.added_or_discarded(), 0);
	assert!(outcome.added.is_empty());
	assert!(outcome.discarded.is_empty());
}

#[test]
fn focused_input_keeps_value_and_selection() {
	let (mut document, mut view) = joined(json!({
		"s": ["<form><input id=\"name\" value=\"", "\"><p id=\"hint\">", "</p></form>"],
		"0": "server",
		"1": "a",
	}));
	let input = by_id(&document, &view, "name");
	document.focus(input);
	document.set_value(input, "typed");
	document.set_selection_range(input, 2, 4);

	view.update(&mut document, json!({"0": "server2", "1": "b"}), &mut ()).unwrap();

	assert_eq!(by_id(&document, &view, "name"), input);
	assert_eq!(document.value(input), "typed");
	assert_eq!(document.active_element(), Some(input));
	assert_eq!(document.selection_range(input), Some((2, 4)));
	assert_eq!(document.text_content(by_id(&document, &view, "hint")), "b");
}

#[test]
fn unfocused_input_follows_the_server() {
	let (mut document, mut view) = joined(json!({"s": ["<input id=\"name\" value=\"", "\">"], "0": "server"}));
	let input = by_id(&document, &view, "name");
	document.set_value(input, "typed");

	view.update(&mut document, json!({"0": "server2"}), &mut ()).unwrap();
	assert_eq!(document.attribute(input, "value"), Some("server2"));
	assert_eq!(document.value(input), "server2");
}

fn components() -> serde_json::Value {
	json!({
		"s": ["<div id=\"parent\">", "", "</div>"],
		"0": 1,
		"1": 2,
		"c": {
			"1": {"s": ["<p id=\"one\">", "</p>"], "0": "a", "r": 1},
			"2": {"s": ["<p id=\"two\">", "</p>"], "0": "b", "r": 1},
		},
	})
}

#[test]
fn component_only_diff_touches_only_its_component() {
	let (mut document, mut view) = joined(components());
	let one = by_id(&document, &view, "one");
	let two = by_id(&document, &view, "two");
	let parent = by_id(&document, &view, "parent");

	let mut recorder = Recorder::default();
	let outcome = view.update(&mut document, json!({"c": {"2": {"0": "B"}}}), &mut recorder).unwrap();

	assert_eq!(document.text_content(two), "B");
	assert_eq!(document.text_content(one), "a");
	assert_eq!(outcome.updated, [two]);
	assert!(!recorder.updated(one));
	assert!(!recorder.updated(parent));
	assert_eq!(document.attribute(two, "data-live-component"), Some("2"));
}

#[test]
fn unmounted_component_is_reported_once() {
	let (mut document, mut view) = joined(components());
	let two = by_id(&document, &view, "two");

	let mut recorder = Recorder::default();
	let outcome = view.update(&mut document, json!({"1": "gone"}), &mut recorder).unwrap();

	assert_eq!(outcome.discarded, [two]);
	assert_eq!(outcome.components_discarded, [2]);
	assert!(recorder.events.contains(&Event::Discard(two)));
	assert!(view.store().component(2).unwrap().was_reset);
	assert_eq!(document.text_content(by_id(&document, &view, "parent")), "agone");

	view.prune_components(outcome.components_discarded);
	assert!(view.store().component(2).is_none());
}

#[test]
fn ignored_container_merges_data_attributes_only() {
	let (mut document, mut view) = joined(json!({
		"s": ["<div id=\"chart\" live-update=\"ignore\" class=\"", "\" data-state=\"", "\">", "</div>"],
		"0": "a",
		"1": "1",
		"2": "server",
	}));
	let chart = by_id(&document, &view, "chart");
	let text = document.first_child(chart).unwrap();
	document.set_text(text, "client");

	let outcome = view.update(&mut document, json!({"0": "b", "1": "2", "2": "server2"}), &mut ()).unwrap();

	assert_eq!(document.attribute(chart, "class"), Some("a"));
	assert_eq!(document.attribute(chart, "data-state"), Some("2"));
	assert_eq!(document.text_content(chart), "client");
	assert!(outcome.updated.contains(&chart));
}

#[test]
fn child_view_boundary_is_left_to_the_child() {
	let (mut document, mut view) = joined(json!({
		"s": ["<div id=\"child\" data-live-parent-id=\"root\" data-live-session=\"", "\" data-live-static=\"", "\"></div>"],
		"0": "session",
		"1": "token",
	}));
	let child = by_id(&document, &view, "child");
	let content = rendered_dom::markup::parse_element(&mut document, "<p>child content</p>").unwrap();
	document.append_child(child, content);

	let outcome = view.update(&mut document, json!({"0": "", "1": "token2"}), &mut ()).unwrap();

	assert_eq!(by_id(&document, &view, "child"), child);
	assert_eq!(document.attribute(child, "data-live-session"), Some("session"));
	assert_eq!(document.attribute(child, "data-live-static"), Some("token"));
	assert_eq!(document.attribute(child, "data-live-root-id"), Some("root"));
	assert_eq!(document.first_child(child), Some(content));
	assert!(outcome.discarded.is_empty());
}

#[test]
fn join_reports_child_views() {
	let (mut document, mut view) = joined(json!({"s": ["<div id=\"child\" data-live-parent-id=\"root\"></div>"]}));
	let child = by_id(&document, &view, "child");

	let outcome = view.join(&mut document, json!({"s": ["<p>no children</p>"]}), &mut ()).unwrap();
	assert_eq!(outcome.child_views_discarded, [child]);
}

#[test]
fn locked_element_waits_for_acknowledgement() {
	let (mut document, mut view) = joined(json!({"s": ["<button id=\"save\">", "</button>"], "0": "Save"}));
	let button = by_id(&document, &view, "save");
	let lock = view.lock(&mut document, button);

	view.update(&mut document, json!({"0": "Saved"}), &mut ()).unwrap();
	assert_eq!(document.text_content(button), "Save");

	let outcome = view.acknowledge(&mut document, lock, &mut ());
	assert_eq!(by_id(&document, &view, "save"), button);
	assert_eq!(document.text_content(button), "Saved");
	assert!(!document.has_attribute(button, "data-live-ref"));
	assert!(outcome.updated.contains(&button));
}

#[test]
fn pending_removal_stays_until_finished() {
	let rows = |ids: &[&str]| json!(ids.iter().map(|id| json!([id])).collect::<Vec<_>>());
	let (mut document, mut view) = joined(json!({
		"s": ["<div id=\"toasts\">", "</div>"],
		"0": {"s": ["<p id=\"", "\" live-remove=\"fade\"></p>"], "d": rows(&["a", "b"])},
	}));
	let toasts = by_id(&document, &view, "toasts");
	let b = by_id(&document, &view, "b");

	let outcome = view.update(&mut document, json!({"0": {"d": rows(&["a"])}}), &mut ()).unwrap();
	assert_eq!(outcome.pending_removals, [b]);
	assert!(outcome.discarded.is_empty());
	assert_eq!(child_ids(&document, toasts), ["a", "b"]);

	let mut recorder = Recorder::default();
	let finished = view.finish_pending_removals(&mut document, &[b], &mut recorder);
	assert_eq!(finished.discarded, [b]);
	assert_eq!(recorder.events, [Event::Discard(b)]);
	assert_eq!(child_ids(&document, toasts), ["a"]);
}

#[test]
fn malformed_markup_leaves_the_tree_alone() {
	let (mut document, mut view) = joined(json!({"s": ["<p id=\"p\">", "</p>"], "0": "fine"}));
	let before = inner_html(&document, view.container());

	assert!(view.update(&mut document, json!({"s": ["<p>", "</div>"], "0": "broken"}), &mut ()).is_err());
	assert_eq!(inner_html(&document, view.container()), before);
}

#[test]
fn after_callbacks_follow_the_pass() {
	let mut recorder = Recorder::default();
	let (mut document, mut view) = joined(json!({"s": ["<p id=\"p\">", "</p>"], "0": "x"}));
	let outcome = view.update(&mut document, json!({"s": ["<p id=\"p\">", "</p><hr>"], "0": "y"}), &mut recorder).unwrap();

	let hr = outcome.added[0];
	assert_eq!(document.tag_name(hr), Some("hr"));
	let position = |wanted: Event| recorder.events.iter().position(|event| *event == wanted).unwrap();
	assert!(position(Event::BeforeAdd(hr)) < position(Event::AfterAdd(hr)));
	let p = by_id(&document, &view, "p");
	assert!(position(Event::AfterAdd(hr)) < position(Event::AfterUpdate(p)));
}

#[test]
fn component_mounted_twice_is_not_duplicated() {
	let (mut document, mut view) = joined(json!({
		"s": ["<div id=\"a\">", "</div><div id=\"b\">", "</div><span id=\"tick\">", "</span>"],
		"0": 1,
		"1": 1,
		"2": "u0",
		"c": {"1": {"s": ["<p>", "</p>"], "0": "x", "r": 1}},
	}));
	let a = by_id(&document, &view, "a");
	let b = by_id(&document, &view, "b");
	let first = document.first_element_child(a);
	let allocated = document.len();

	for n in 1..=3 {
		let outcome = view.update(&mut document, json!({"2": format!("u{}", n)}), &mut ()).unwrap();
		assert_eq!(document.element_children(a).len(), 1);
		assert_eq!(document.element_children(b).len(), 1);
		assert_eq!(document.first_element_child(a), first);
		assert_eq!(document.text_content(b), "x");
		assert!(outcome.components_discarded.is_empty());
		assert_eq!(document.len(), allocated);
	}
}

#[test]
fn repeated_updates_reuse_freed_nodes() {
	let (mut document, mut view) = joined(json!({"s": ["<h1>", "</h1><p id=\"count\">", "</p>"], "0": "Counter", "1": "0"}));
	let allocated = document.len();

	for n in 1..=50 {
		view.update(&mut document, json!({"1": n.to_string()}), &mut ()).unwrap();
		assert_eq!(document.len(), allocated);
	}
	assert_eq!(document.text_content(by_id(&document, &view, "count")), "50");
}

#[test]
fn discarded_locked_element_drops_its_target() {
	let (mut document, mut view) = joined(json!({"s": ["", ""], "0": "<button id=\"save\">Save</button>"}));
	let allocated = document.len();
	let save = by_id(&document, &view, "save");
	let lock = view.lock(&mut document, save);

	view.update(&mut document, json!({"0": "<button id=\"save\">Saving</button>"}), &mut ()).unwrap();
	assert!(document.len() > allocated);

	let outcome = view.update(&mut document, json!({"0": "<p id=\"done\">Done</p>"}), &mut ()).unwrap();
	assert_eq!(outcome.discarded.len(), 1);
	assert_eq!(document.len(), allocated);

	assert!(view.acknowledge(&mut document, lock, &mut ()).is_empty());
	assert_eq!(inner_html(&document, view.container()), "<p id=\"done\">Done</p>");
}

#[test]
fn missing_component_renders_empty() {
	let (mut document, mut view) = joined(json!({"s": ["<div id=\"slot\">", "</div><p id=\"after\">", "</p>"], "0": 7, "1": "a"}));
	assert_eq!(document.first_child(by_id(&document, &view, "slot")), None);

	view.update(&mut document, json!({"1": "b"}), &mut ()).unwrap();
	assert_eq!(inner_html(&document, view.container()), "<div id=\"slot\"></div><p id=\"after\">b</p>");
}

#[test]
fn server_selection_replaces_the_user_choice() {
	let (mut document, mut view) = joined(json!({
		"s": ["<select id=\"pick\"><option value=\"a\"", ">A</option><option value=\"b\"", ">B</option><option value=\"c\">C</option></select>"],
		"0": " selected",
		"1": "",
	}));
	let select = by_id(&document, &view, "pick");
	let options = document.options(select);
	assert_eq!(document.selected_index(select), Some(0));
	document.set_selected_index(select, Some(2));
	assert_eq!(document.value(select), "c");

	view.update(&mut document, json!({"0": "", "1": " selected"}), &mut ()).unwrap();

	assert_eq!(document.options(select), options);
	assert_eq!(document.selected_index(select), Some(1));
	assert_eq!(document.value(select), "b");
	assert!(!document.has_attribute(options[0], "selected"));
	assert!(document.has_attribute(options[1], "selected"));
}
