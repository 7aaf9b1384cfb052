//! Keyed reconciliation of a live subtree against a freshly parsed target.
//!
//! Target nodes are moved into the live tree when they are added, so a target fragment can be reconciled only once.

use crate::dom::{Document, NodeId, NodeType};
use core::mem;
use hashbrown::{HashMap, HashSet};
use tracing::{instrument, level_filters::STATIC_MAX_LEVEL, trace, trace_span, Level};

/// How to proceed with a target node that has no live counterpart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddAction {
	Insert,
	/// Leave the target out of the live tree.
	Skip,
	/// Morph this detached live node to match the target and insert it instead.
	Substitute(NodeId),
}

/// How to proceed with a matched pair of elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateAction {
	Morph,
	/// Keep the live element exactly as it is, including its children.
	Skip,
	/// Discard the live element and insert the target in its place.
	Replace,
}

/// Decisions and notifications a reconciliation pass defers to its caller.
///
/// The defaults describe a plain morph keyed by `id`.
pub trait ReconcileHooks {
	fn node_key(&self, document: &Document, node: NodeId) -> Option<String> {
		document.attribute(node, "id").filter(|id| !id.is_empty()).map(str::to_owned)
	}

	/// Whether the live children of `from` are left out of the positional walk.
	/// Target children are still matched by key or added.
	fn skip_from_children(&mut self, _document: &Document, _from: NodeId) -> bool {
		false
	}

	fn add_child(&mut self, document: &mut Document, parent: NodeId, child: NodeId) {
		document.append_child(parent, child);
	}

	fn before_node_added(&mut self, _document: &mut Document, _node: NodeId) -> AddAction {
		AddAction::Insert
	}

	/// Called for each added node and, recursively, its unkeyed descendants.
	fn node_added(&mut self, _document: &mut Document, _node: NodeId) {}

	fn before_element_updated(&mut self, _document: &mut Document, _from: NodeId, _to: NodeId) -> UpdateAction {
		UpdateAction::Morph
	}

	/// Called after the attributes of `element` were synchronized, before its children are.
	fn element_updated(&mut self, _document: &mut Document, _element: NodeId) {}

	/// Returning `false` keeps the node in place.
	fn before_node_discarded(&mut self, _document: &mut Document, _node: NodeId) -> bool {
		true
	}

	/// Called for each discarded node and, recursively, its unkeyed descendants.
	fn node_discarded(&mut self, _document: &mut Document, _node: NodeId) {}
}

impl ReconcileHooks for () {}

/// Reconciliation override for elements whose live state isn't fully captured by their markup.
pub trait SpecialHandler {
	/// Runs after the children of `from` were reconciled, or instead of that if [`replaces_children`](`SpecialHandler::replaces_children`).
	fn sync(&self, document: &mut Document, from: NodeId, to: NodeId);

	fn replaces_children(&self) -> bool {
		false
	}
}

/// Tag name to [`SpecialHandler`] registry.
pub struct SpecialHandlers(HashMap<&'static str, Box<dyn SpecialHandler>>);

impl SpecialHandlers {
	#[must_use]
	pub fn empty() -> Self {
		Self(HashMap::new())
	}

	/// Handlers for `option`, `input`, `textarea` and `select`.
	#[must_use]
	pub fn standard() -> Self {
		let mut handlers = Self::empty();
		handlers.register("option", Box::new(OptionHandler));
		handlers.register("input", Box::new(InputHandler));
		handlers.register("textarea", Box::new(TextareaHandler));
		handlers.register("select", Box::new(SelectHandler));
		handlers
	}

	/// `tag` must be lowercase.
	pub fn register(&mut self, tag: &'static str, handler: Box<dyn SpecialHandler>) {
		self.0.insert(tag, handler);
	}

	#[must_use]
	pub fn get(&self, tag: &str) -> Option<&dyn SpecialHandler> {
		self.0.get(tag).map(Box::as_ref)
	}
}

impl Default for SpecialHandlers {
	fn default() -> Self {
		Self::standard()
	}
}

fn sync_boolean_property(document: &mut Document, from: NodeId, to: NodeId, name: &str, get: fn(&Document, NodeId) -> bool, set: fn(&mut Document, NodeId, bool)) {
	let wanted = get(document, to);
	if get(document, from) != wanted {
		set(document, from, wanted);
		if wanted {
			document.set_attribute(from, name, "");
		} else {
			document.remove_attribute(from, name);
		}
	}
}

/// Syncs `selected`, resetting a single-choice parent's selection first.
struct OptionHandler;
impl SpecialHandler for OptionHandler {
	fn sync(&self, document: &mut Document, from: NodeId, to: NodeId) {
		let mut parent = document.parent(from);
		if let Some(group) = parent.filter(|&group| document.tag_name(group) == Some("optgroup")) {
			parent = document.parent(group);
		}
		if let Some(select) = parent.filter(|&select| document.tag_name(select) == Some("select")) {
			if !document.has_attribute(select, "multiple") {
				document.set_selected_index(select, None);
			}
		}
		sync_boolean_property(document, from, to, "selected", Document::selected, Document::set_selected);
	}
}

/// Syncs `checked` and the live value.
struct InputHandler;
impl SpecialHandler for InputHandler {
	fn sync(&self, document: &mut Document, from: NodeId, to: NodeId) {
		sync_boolean_property(document, from, to, "checked", Document::checked, Document::set_checked);
		let value = document.value(to);
		if document.value(from) != value {
			document.set_value(from, &value);
		}
		if !document.has_attribute(to, "value") {
			document.remove_attribute(from, "value");
		}
	}
}

/// Writes the value only if it actually changed, which keeps the cursor in place otherwise.
struct TextareaHandler;
impl SpecialHandler for TextareaHandler {
	fn sync(&self, document: &mut Document, from: NodeId, to: NodeId) {
		let value = document.value(to);
		if document.value(from) != value {
			document.set_value(from, &value);
		}
		if let Some(text) = document.first_child(from) {
			let old = document.text(text).unwrap_or_default();
			if old == value || (value.is_empty() && Some(old) == document.attribute(from, "placeholder")) {
				return;
			}
			document.set_text(text, &value);
		}
	}

	fn replaces_children(&self) -> bool {
		true
	}
}

/// Recomputes the selected index from the reconciled options' `selected` attributes.
/// Without a `selected` option, nothing is selected.
struct SelectHandler;
impl SpecialHandler for SelectHandler {
	fn sync(&self, document: &mut Document, from: NodeId, to: NodeId) {
		if document.has_attribute(to, "multiple") {
			return;
		}
		let index = document.options(from).into_iter().position(|option| document.has_attribute(option, "selected"));
		if document.selected_index(from) != index {
			document.set_selected_index(from, index);
		}
	}
}

fn same_name(document: &Document, a: NodeId, b: NodeId) -> bool {
	document.tag_name(a) == document.tag_name(b)
}

/// Pass-scoped key index over a live subtree, excluding its root.
#[derive(Debug, Default)]
pub struct NodeKeyIndex(HashMap<String, NodeId>);

impl NodeKeyIndex {
	pub fn build<H: ReconcileHooks + ?Sized>(document: &Document, root: NodeId, hooks: &H) -> Self {
		let mut index = HashMap::new();
		for node in document.descendants(root) {
			if let Some(key) = hooks.node_key(document, node) {
				index.insert(key, node);
			}
		}
		Self(index)
	}

	#[must_use]
	pub fn get(&self, key: &str) -> Option<NodeId> {
		self.0.get(key).copied()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

/// Morphs a live subtree into the shape of a target subtree with minimal mutations.
pub struct TreeReconciler<'h, H: ReconcileHooks + ?Sized> {
	hooks: &'h mut H,
	handlers: SpecialHandlers,
	index: NodeKeyIndex,
	/// Keyed live nodes that may still be matched later in the pass.
	keyed_removals: Vec<(String, NodeId)>,
	/// Live nodes that were morphed, relocated or discarded.
	claimed: HashSet<NodeId>,
}

impl<'h, H: ReconcileHooks + ?Sized> TreeReconciler<'h, H> {
	pub fn new(hooks: &'h mut H) -> Self {
		Self::with_handlers(hooks, SpecialHandlers::standard())
	}

	pub fn with_handlers(hooks: &'h mut H, handlers: SpecialHandlers) -> Self {
		Self {
			hooks,
			handlers,
			index: NodeKeyIndex::default(),
			keyed_removals: Vec::new(),
			claimed: HashSet::new(),
		}
	}

	/// Reconciles `from` (live) against `to` (target) and returns the node now standing in for `from`.
	///
	/// With `children_only`, the attributes of `from` are left alone and only its children are reconciled.
	/// Otherwise an element with a different tag name is replaced outright.
	#[instrument(skip(self, document))]
	pub fn reconcile(mut self, document: &mut Document, from: NodeId, to: NodeId, children_only: bool) -> NodeId {
		self.index = NodeKeyIndex::build(document, from, &*self.hooks);
		trace!(keys = self.index.len(), "Indexed live subtree.");

		let mut morphed = from;
		if !children_only && document.is_element(from) && document.is_element(to) && !same_name(document, from, to) {
			self.replace_element(document, from, to);
			morphed = to;
		} else {
			self.morph_element(document, from, to, children_only);
		}

		for (key, node) in mem::take(&mut self.keyed_removals) {
			if self.claimed.insert(node) {
				if STATIC_MAX_LEVEL >= Level::TRACE {
					trace!(%key, node = %node, "Keyed node wasn't matched.");
				}
				self.remove_node(document, node, false);
			}
		}
		morphed
	}

	fn replace_element(&mut self, document: &mut Document, from: NodeId, to: NodeId) {
		let _span = trace_span!("replace_element", %from, %to).entered();
		self.claimed.insert(from);
		if let Some(key) = self.hooks.node_key(document, to) {
			self.index.0.remove(&key);
		}
		document.replace_with(from, to);
		self.hooks.node_discarded(document, from);
		self.walk_discarded_children(document, from, true);
		self.handle_node_added(document, to);
	}

	fn morph_element(&mut self, document: &mut Document, from: NodeId, to: NodeId, children_only: bool) {
		self.claimed.insert(from);
		if let Some(key) = self.hooks.node_key(document, to) {
			self.index.0.remove(&key);
		}

		if !children_only {
			match self.hooks.before_element_updated(document, from, to) {
				UpdateAction::Morph => (),
				UpdateAction::Skip => return,
				UpdateAction::Replace => return self.replace_element(document, from, to),
			}
			sync_attributes(document, from, to);
			self.hooks.element_updated(document, from);
		}

		let tag = document.tag_name(from).map(str::to_owned);
		let replaces_children = tag.as_deref().and_then(|tag| self.handlers.get(tag)).map_or(false, |handler| handler.replaces_children());
		if !replaces_children {
			self.morph_children(document, from, to);
		}
		if let Some(handler) = tag.as_deref().and_then(|tag| self.handlers.get(tag)) {
			handler.sync(document, from, to);
		}
	}

	fn morph_children(&mut self, document: &mut Document, from_parent: NodeId, to_parent: NodeId) {
		let skip_from = self.hooks.skip_from_children(document, from_parent);
		let mut cur_to = document.first_child(to_parent);
		let mut cur_from = if skip_from { None } else { document.first_child(from_parent) };

		'targets: while let Some(to_child) = cur_to {
			let to_next = document.next_sibling(to_child);
			let to_key = self.hooks.node_key(document, to_child);

			while let Some(mut from_child) = cur_from {
				let from_next = document.next_sibling(from_child);
				if from_child == to_child {
					cur_to = to_next;
					cur_from = from_next;
					continue 'targets;
				}

				let from_type = document.node_type(from_child);
				let mut compatible = false;
				if from_type == document.node_type(to_child) {
					match from_type {
						NodeType::Element => {
							let from_key = self.hooks.node_key(document, from_child);
							let mut relocatable = true;
							match &to_key {
								Some(to_key) if Some(to_key) != from_key.as_ref() => match self.index.get(to_key) {
									Some(matching) if from_next == Some(matching) => {
										// A single removal: let the current node go and meet the match on the next step.
										relocatable = false;
									}
									Some(matching) => {
										document.insert_before(from_parent, matching, Some(from_child));
										match from_key {
											Some(key) => self.keyed_removals.push((key, from_child)),
											None => self.remove_node(document, from_child, true),
										}
										from_child = matching;
									}
									None => relocatable = false,
								},
								Some(_) => (),
								None => relocatable = from_key.is_none(),
							}
							compatible = relocatable && same_name(document, from_child, to_child);
							if compatible {
								self.morph_element(document, from_child, to_child, false);
							}
						}
						NodeType::Text | NodeType::Comment => {
							compatible = true;
							let text = document.text(to_child).unwrap_or_default().to_owned();
							if document.text(from_child) != Some(text.as_str()) {
								document.set_text(from_child, &text);
							}
						}
						NodeType::Fragment => (),
					}
				}

				if compatible {
					cur_to = to_next;
					cur_from = from_next;
					continue 'targets;
				}

				self.defer_or_remove(document, from_child);
				cur_from = from_next;
			}

			let matching = to_key
				.as_deref()
				.and_then(|key| self.index.get(key))
				.filter(|&matching| document.is_element(to_child) && same_name(document, matching, to_child));
			match matching {
				Some(matching) => {
					if !skip_from {
						self.hooks.add_child(document, from_parent, matching);
					}
					self.morph_element(document, matching, to_child, false);
				}
				None => match self.hooks.before_node_added(document, to_child) {
					AddAction::Skip => (),
					AddAction::Insert => {
						self.hooks.add_child(document, from_parent, to_child);
						self.handle_node_added(document, to_child);
					}
					AddAction::Substitute(substitute) => {
						self.morph_element(document, substitute, to_child, false);
						self.hooks.add_child(document, from_parent, substitute);
						self.handle_node_added(document, substitute);
					}
				},
			}
			cur_to = to_next;
		}

		while let Some(from_child) = cur_from {
			let from_next = document.next_sibling(from_child);
			self.defer_or_remove(document, from_child);
			cur_from = from_next;
		}
	}

	fn handle_node_added(&mut self, document: &mut Document, node: NodeId) {
		self.hooks.node_added(document, node);
		let mut child = document.first_child(node);
		while let Some(current) = child {
			let next = document.next_sibling(current);
			let unmatched = self
				.hooks
				.node_key(document, current)
				.and_then(|key| self.index.get(&key))
				.filter(|&unmatched| same_name(document, unmatched, current));
			match unmatched {
				Some(unmatched) => {
					document.replace_with(current, unmatched);
					self.morph_element(document, unmatched, current, false);
				}
				None => self.handle_node_added(document, current),
			}
			child = next;
		}
	}

	/// Keyed nodes are only scheduled for removal, since a later target may still claim them.
	fn defer_or_remove(&mut self, document: &mut Document, node: NodeId) {
		match self.hooks.node_key(document, node) {
			Some(key) => self.keyed_removals.push((key, node)),
			None => self.remove_node(document, node, true),
		}
	}

	fn remove_node(&mut self, document: &mut Document, node: NodeId, skip_keyed_nodes: bool) {
		self.claimed.insert(node);
		if !self.hooks.before_node_discarded(document, node) {
			return;
		}
		if STATIC_MAX_LEVEL >= Level::TRACE {
			trace!(node = %node, "Discarding.");
		}
		document.remove(node);
		self.hooks.node_discarded(document, node);
		self.walk_discarded_children(document, node, skip_keyed_nodes);
	}

	/// Notifies about discarded descendants. Keyed descendants may still be claimed elsewhere, so with `skip_keyed_nodes` they are only scheduled.
	fn walk_discarded_children(&mut self, document: &mut Document, node: NodeId, skip_keyed_nodes: bool) {
		if !document.is_element(node) {
			return;
		}
		let children: Vec<NodeId> = document.children(node).collect();
		for child in children {
			match self.hooks.node_key(document, child) {
				Some(key) if skip_keyed_nodes => self.keyed_removals.push((key, child)),
				_ => {
					self.claimed.insert(child);
					self.hooks.node_discarded(document, child);
					self.walk_discarded_children(document, child, skip_keyed_nodes);
				}
			}
		}
	}
}

/// Makes the attributes of `from` equal to those of `to`.
pub fn sync_attributes(document: &mut Document, from: NodeId, to: NodeId) {
	let wanted = document.attributes(to).to_vec();
	for attribute in &wanted {
		if document.attribute(from, &attribute.name) != Some(attribute.value.as_str()) {
			document.set_attribute(from, &attribute.name, &attribute.value);
		}
	}
	let stale: Vec<String> = document
		.attributes(from)
		.iter()
		.rev()
		.filter(|attribute| !wanted.iter().any(|wanted| wanted.name == attribute.name))
		.map(|attribute| attribute.name.clone())
		.collect();
	for name in stale {
		document.remove_attribute(from, &name);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::markup::{inner_html, parse_element};

	#[test]
	fn attribute_sync() {
		let mut document = Document::new();
		let from = parse_element(&mut document, "<p a=\"1\" b=\"2\"></p>").unwrap();
		let to = parse_element(&mut document, "<p b=\"3\" c></p>").unwrap();
		sync_attributes(&mut document, from, to);
		assert_eq!(document.attribute(from, "a"), None);
		assert_eq!(document.attribute(from, "b"), Some("3"));
		assert_eq!(document.attribute(from, "c"), Some(""));
	}

	#[test]
	fn replaces_root_with_other_tag() {
		let mut document = Document::new();
		let parent = parse_element(&mut document, "<div><p>a</p></div>").unwrap();
		let from = document.first_child(parent).unwrap();
		let to = parse_element(&mut document, "<span>b</span>").unwrap();
		let morphed = TreeReconciler::new(&mut ()).reconcile(&mut document, from, to, false);
		assert_eq!(morphed, to);
		assert_eq!(inner_html(&document, parent), "<span>b</span>");
	}

	#[test]
	fn select_follows_selected_attribute() {
		let mut document = Document::new();
		let from = parse_element(&mut document, "<select><option selected>a</option><option>b</option></select>").unwrap();
		let options = document.options(from);
		document.set_selected_index(from, Some(1));

		let to = parse_element(&mut document, "<select><option>a</option><option>b</option></select>").unwrap();
		TreeReconciler::new(&mut ()).reconcile(&mut document, from, to, false);
		assert_eq!(document.selected_index(from), None);
		assert!(!document.selected(options[0]));
		assert!(!document.has_attribute(options[0], "selected"));

		let to = parse_element(&mut document, "<select><option>a</option><option selected>b</option></select>").unwrap();
		TreeReconciler::new(&mut ()).reconcile(&mut document, from, to, false);
		assert_eq!(document.selected_index(from), Some(1));
		assert_eq!(document.options(from), options);
	}

	#[test]
	fn multiple_select_keeps_every_selected_option() {
		let mut document = Document::new();
		let from = parse_element(&mut document, "<select multiple><option>a</option><option>b</option></select>").unwrap();
		let to = parse_element(&mut document, "<select multiple><option selected>a</option><option selected>b</option></select>").unwrap();
		TreeReconciler::new(&mut ()).reconcile(&mut document, from, to, false);
		assert!(document.options(from).into_iter().all(|option| document.selected(option)));
	}

	#[test]
	fn textarea_keeps_equal_value() {
		let mut document = Document::new();
		let from = parse_element(&mut document, "<textarea>hello</textarea>").unwrap();
		document.set_selection_range(from, 2, 2);
		let to = parse_element(&mut document, "<textarea>hello</textarea>").unwrap();
		TreeReconciler::new(&mut ()).reconcile(&mut document, from, to, false);
		assert_eq!(document.selection_range(from), Some((2, 2)));
	}
}
