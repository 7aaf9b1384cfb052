#![allow(dead_code)]

use rendered_dom::{
	markup::{inner_html, parse_element},
	Document, LifecycleHooks, NodeId, PatchConfig, View,
};
use serde_json::Value;

pub fn init_logging() {
	let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
	BeforeAdd(NodeId),
	AfterAdd(NodeId),
	BeforeUpdate(NodeId, NodeId),
	AfterUpdate(NodeId),
	Discard(NodeId),
}

#[derive(Debug, Default)]
pub struct Recorder {
	pub events: Vec<Event>,
}

impl Recorder {
	pub fn added_or_discarded(&self) -> usize {
		self.events
			.iter()
			.filter(|event| matches!(event, Event::BeforeAdd(_) | Event::AfterAdd(_) | Event::Discard(_)))
			.count()
	}

	pub fn updated(&self, element: NodeId) -> bool {
		self.events.iter().any(|event| matches!(event, Event::BeforeUpdate(from, _) if *from == element))
	}
}

impl LifecycleHooks for Recorder {
	fn on_before_add(&mut self, _document: &Document, element: NodeId) {
		self.events.push(Event::BeforeAdd(element));
	}

	fn on_after_add(&mut self, _document: &Document, element: NodeId) {
		self.events.push(Event::AfterAdd(element));
	}

	fn on_before_update(&mut self, _document: &Document, from: NodeId, to: NodeId) {
		self.events.push(Event::BeforeUpdate(from, to));
	}

	fn on_after_update(&mut self, _document: &Document, element: NodeId) {
		self.events.push(Event::AfterUpdate(element));
	}

	fn on_discard(&mut self, _document: &Document, element: NodeId) {
		self.events.push(Event::Discard(element));
	}
}

/// A document with an empty view container `<div id="root">`, joined with `diff`.
pub fn joined(diff: Value) -> (Document, View) {
	joined_with(diff, PatchConfig::default())
}

pub fn joined_with(diff: Value, config: PatchConfig) -> (Document, View) {
	init_logging();
	let mut document = Document::new();
	let container = parse_element(&mut document, r#"<div id="root"></div>"#).unwrap();
	let mut view = View::new(container, "root", config);
	view.join(&mut document, diff, &mut ()).unwrap();
	(document, view)
}

pub fn by_id(document: &Document, view: &View, id: &str) -> NodeId {
	document
		.element_by_id(view.container(), id)
		.unwrap_or_else(|| panic!("#{} not found in {}", id, inner_html(document, view.container())))
}

pub fn child_ids(document: &Document, parent: NodeId) -> Vec<String> {
	document
		.element_children(parent)
		.into_iter()
		.map(|child| document.attribute(child, "id").unwrap_or_default().to_owned())
		.collect()
}
