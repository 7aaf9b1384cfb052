//! An arena-backed element tree that stands in for the browser's live DOM.
//!
//! Detaching a node only unlinks it, so a removed subtree can be reinserted or inspected until it is [`free`](`Document::free`)d.
//! Freed slots are reused, and a [`NodeId`] of a freed node never refers to a later one.
//!
//! Element state that markup can't express (a typed-in `value`, `checked`, `selected` and the text selection) is kept
//! separately from attributes, mirroring the split between attributes and properties in the browser.

use core::fmt::{self, Write as _};
use slotmap::{new_key_type, Key, SlotMap};

new_key_type! {
	/// Identifies a node within its [`Document`]. Two handles are equal iff they refer to the same node.
	pub struct NodeId;
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let ffi = self.data().as_ffi();
		write!(f, "#{}v{}", ffi & 0xffff_ffff, ffi >> 32)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
	Fragment,
	Element,
	Text,
	Comment,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
	pub name: String,
	pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct FormState {
	value: Option<String>,
	checked: Option<bool>,
	selected: Option<bool>,
	selection: Option<(usize, usize)>,
}

#[derive(Clone, Debug)]
enum Data {
	Fragment,
	Element { name: String, attributes: Vec<Attribute>, state: FormState },
	Text(String),
	Comment(String),
}

#[derive(Clone, Debug)]
struct Slot {
	data: Data,
	parent: Option<NodeId>,
	first_child: Option<NodeId>,
	last_child: Option<NodeId>,
	previous_sibling: Option<NodeId>,
	next_sibling: Option<NodeId>,
}

#[derive(Debug, Default)]
pub struct Document {
	slots: SlotMap<NodeId, Slot>,
	active_element: Option<NodeId>,
}

impl Document {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	fn push(&mut self, data: Data) -> NodeId {
		self.slots.insert(Slot {
			data,
			parent: None,
			first_child: None,
			last_child: None,
			previous_sibling: None,
			next_sibling: None,
		})
	}

	fn slot(&self, id: NodeId) -> &Slot {
		&self.slots[id]
	}

	fn slot_mut(&mut self, id: NodeId) -> &mut Slot {
		&mut self.slots[id]
	}

	pub fn create_fragment(&mut self) -> NodeId {
		self.push(Data::Fragment)
	}

	/// Creates a detached element. The tag name is stored in ASCII lowercase.
	pub fn create_element(&mut self, name: &str) -> NodeId {
		self.push(Data::Element {
			name: name.to_ascii_lowercase(),
			attributes: Vec::new(),
			state: FormState::default(),
		})
	}

	pub fn create_text(&mut self, text: &str) -> NodeId {
		self.push(Data::Text(text.to_owned()))
	}

	pub fn create_comment(&mut self, comment: &str) -> NodeId {
		self.push(Data::Comment(comment.to_owned()))
	}

	#[must_use]
	pub fn node_type(&self, id: NodeId) -> NodeType {
		match self.slot(id).data {
			Data::Fragment => NodeType::Fragment,
			Data::Element { .. } => NodeType::Element,
			Data::Text(_) => NodeType::Text,
			Data::Comment(_) => NodeType::Comment,
		}
	}

	#[must_use]
	pub fn is_element(&self, id: NodeId) -> bool {
		matches!(self.slot(id).data, Data::Element { .. })
	}

	#[must_use]
	pub fn tag_name(&self, id: NodeId) -> Option<&str> {
		match &self.slot(id).data {
			Data::Element { name, .. } => Some(name),
			_ => None,
		}
	}

	/// Character data of a text or comment node.
	#[must_use]
	pub fn text(&self, id: NodeId) -> Option<&str> {
		match &self.slot(id).data {
			Data::Text(text) | Data::Comment(text) => Some(text),
			_ => None,
		}
	}

	pub fn set_text(&mut self, id: NodeId, data: &str) {
		match &mut self.slot_mut(id).data {
			Data::Text(text) | Data::Comment(text) => {
				text.clear();
				text.push_str(data);
			}
			_ => tracing::error!("Tried to set character data of {}, which is not a text or comment node.", id),
		}
	}

	#[must_use]
	pub fn text_content(&self, id: NodeId) -> String {
		match &self.slot(id).data {
			Data::Text(text) => text.clone(),
			Data::Comment(_) => String::new(),
			Data::Element { .. } | Data::Fragment => {
				let mut content = String::new();
				for node in self.descendants(id) {
					if let Data::Text(text) = &self.slot(node).data {
						content.push_str(text);
					}
				}
				content
			}
		}
	}

	#[must_use]
	pub fn parent(&self, id: NodeId) -> Option<NodeId> {
		self.slot(id).parent
	}

	#[must_use]
	pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
		self.slot(id).first_child
	}

	#[must_use]
	pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
		self.slot(id).last_child
	}

	#[must_use]
	pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
		self.slot(id).next_sibling
	}

	#[must_use]
	pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
		self.slot(id).previous_sibling
	}

	#[must_use]
	pub fn children(&self, id: NodeId) -> Children<'_> {
		Children { document: self, next: self.first_child(id) }
	}

	#[must_use]
	pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
		self.children(id).filter(|&child| self.is_element(child)).collect()
	}

	#[must_use]
	pub fn first_element_child(&self, id: NodeId) -> Option<NodeId> {
		self.children(id).find(|&child| self.is_element(child))
	}

	#[must_use]
	pub fn next_element_sibling(&self, id: NodeId) -> Option<NodeId> {
		let mut next = self.next_sibling(id);
		while let Some(node) = next {
			if self.is_element(node) {
				return Some(node);
			}
			next = self.next_sibling(node);
		}
		None
	}

	#[must_use]
	pub fn previous_element_sibling(&self, id: NodeId) -> Option<NodeId> {
		let mut previous = self.previous_sibling(id);
		while let Some(node) = previous {
			if self.is_element(node) {
				return Some(node);
			}
			previous = self.previous_sibling(node);
		}
		None
	}

	/// Pre-order traversal of everything below `root`, excluding `root` itself.
	#[must_use]
	pub fn descendants(&self, root: NodeId) -> Descendants<'_> {
		Descendants { document: self, root, next: self.first_child(root) }
	}

	/// Whether `node` is `ancestor` or somewhere below it.
	#[must_use]
	pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
		let mut current = Some(node);
		while let Some(id) = current {
			if id == ancestor {
				return true;
			}
			current = self.parent(id);
		}
		false
	}

	/// Nearest inclusive ancestor of `node` matching `predicate`.
	pub fn closest(&self, node: NodeId, mut predicate: impl FnMut(&Self, NodeId) -> bool) -> Option<NodeId> {
		let mut current = Some(node);
		while let Some(id) = current {
			if predicate(self, id) {
				return Some(id);
			}
			current = self.parent(id);
		}
		None
	}

	/// All elements below `root` (exclusive) matching `predicate`, in document order.
	pub fn query_all(&self, root: NodeId, mut predicate: impl FnMut(&Self, NodeId) -> bool) -> Vec<NodeId> {
		self.descendants(root).filter(|&node| self.is_element(node) && predicate(self, node)).collect()
	}

	#[must_use]
	pub fn element_by_id(&self, root: NodeId, id: &str) -> Option<NodeId> {
		self.descendants(root).find(|&node| self.attribute(node, "id") == Some(id))
	}

	fn unlink(&mut self, node: NodeId) {
		let Slot { parent, previous_sibling, next_sibling, .. } = *self.slot(node);
		let parent = match parent {
			Some(parent) => parent,
			None => return,
		};

		if let Some(active) = self.active_element {
			if self.contains(node, active) {
				self.active_element = None;
			}
		}

		match previous_sibling {
			Some(previous) => self.slot_mut(previous).next_sibling = next_sibling,
			None => self.slot_mut(parent).first_child = next_sibling,
		}
		match next_sibling {
			Some(next) => self.slot_mut(next).previous_sibling = previous_sibling,
			None => self.slot_mut(parent).last_child = previous_sibling,
		}

		let slot = self.slot_mut(node);
		slot.parent = None;
		slot.previous_sibling = None;
		slot.next_sibling = None;
	}

	/// Inserts `child` into `parent` before `reference`, or at the end if `reference` is [`None`].
	///
	/// `child` is detached from its previous position first. Inserting a fragment moves its children instead.
	pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
		if reference == Some(child) {
			return;
		}
		if self.contains(child, parent) {
			return tracing::error!("Refusing to insert {} into its own descendant {}.", child, parent);
		}
		if let Some(reference) = reference {
			if self.parent(reference) != Some(parent) {
				return tracing::error!("Reference node {} is not a child of {}.", reference, parent);
			}
		}

		if self.node_type(child) == NodeType::Fragment {
			while let Some(grandchild) = self.first_child(child) {
				self.insert_before(parent, grandchild, reference);
			}
			return;
		}

		self.unlink(child);

		let previous = match reference {
			Some(reference) => self.previous_sibling(reference),
			None => self.last_child(parent),
		};
		{
			let slot = self.slot_mut(child);
			slot.parent = Some(parent);
			slot.previous_sibling = previous;
			slot.next_sibling = reference;
		}
		match previous {
			Some(previous) => self.slot_mut(previous).next_sibling = Some(child),
			None => self.slot_mut(parent).first_child = Some(child),
		}
		match reference {
			Some(reference) => self.slot_mut(reference).previous_sibling = Some(child),
			None => self.slot_mut(parent).last_child = Some(child),
		}
	}

	pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
		self.insert_before(parent, child, None);
	}

	pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) {
		let first = self.first_child(parent);
		self.insert_before(parent, child, first);
	}

	pub fn insert_after(&mut self, reference: NodeId, node: NodeId) {
		match self.parent(reference) {
			Some(parent) => {
				let next = self.next_sibling(reference);
				self.insert_before(parent, node, next);
			}
			None => tracing::error!("Can't insert after {}, which has no parent.", reference),
		}
	}

	/// Replaces `old` (which must be a child of some parent) with `new` at the same position.
	pub fn replace_with(&mut self, old: NodeId, new: NodeId) {
		if old == new {
			return;
		}
		match self.parent(old) {
			Some(parent) => {
				let next = self.next_sibling(old);
				self.unlink(old);
				self.insert_before(parent, new, next);
			}
			None => tracing::error!("Can't replace {}, which has no parent.", old),
		}
	}

	/// Detaches `node` from its parent. The node and its subtree remain valid and can be reinserted.
	pub fn remove(&mut self, node: NodeId) {
		self.unlink(node);
	}

	/// Detaches `node` and releases it along with its subtree. Handles to the released nodes become stale.
	///
	/// Stale handles are ignored here, but other accessors panic on them.
	pub fn free(&mut self, node: NodeId) {
		if !self.is_live(node) {
			return;
		}
		self.unlink(node);
		let subtree: Vec<NodeId> = self.descendants(node).collect();
		if self.active_element.map_or(false, |active| active == node || subtree.contains(&active)) {
			self.active_element = None;
		}
		for released in subtree {
			self.slots.remove(released);
		}
		self.slots.remove(node);
	}

	/// Whether `node` hasn't been [`free`](`Document::free`)d.
	#[must_use]
	pub fn is_live(&self, node: NodeId) -> bool {
		self.slots.contains_key(node)
	}

	/// Number of allocated nodes, attached or not.
	#[must_use]
	pub fn len(&self) -> usize {
		self.slots.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}

	#[must_use]
	pub fn attributes(&self, id: NodeId) -> &[Attribute] {
		match &self.slot(id).data {
			Data::Element { attributes, .. } => attributes,
			_ => &[],
		}
	}

	#[must_use]
	pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
		self.attributes(id).iter().find(|attribute| attribute.name == name).map(|attribute| attribute.value.as_str())
	}

	#[must_use]
	pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
		self.attribute(id, name).is_some()
	}

	pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) {
		match &mut self.slot_mut(id).data {
			Data::Element { attributes, .. } => match attributes.iter_mut().find(|attribute| attribute.name == name) {
				Some(attribute) => {
					if attribute.value != value {
						attribute.value.clear();
						attribute.value.push_str(value);
					}
				}
				None => attributes.push(Attribute { name: name.to_owned(), value: value.to_owned() }),
			},
			_ => tracing::error!("Tried to set attribute {:?} on non-element {}.", name, id),
		}
	}

	pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Option<String> {
		match &mut self.slot_mut(id).data {
			Data::Element { attributes, .. } => {
				let index = attributes.iter().position(|attribute| attribute.name == name)?;
				Some(attributes.remove(index).value)
			}
			_ => None,
		}
	}

	fn state(&self, id: NodeId) -> Option<&FormState> {
		match &self.slot(id).data {
			Data::Element { state, .. } => Some(state),
			_ => None,
		}
	}

	fn state_mut(&mut self, id: NodeId) -> Option<&mut FormState> {
		match &mut self.slot_mut(id).data {
			Data::Element { state, .. } => Some(state),
			_ => None,
		}
	}

	/// The lowercase `type` of an `<input>`, defaulting to `"text"`.
	#[must_use]
	pub fn input_type(&self, id: NodeId) -> String {
		self.attribute(id, "type").map_or_else(|| "text".to_owned(), str::to_ascii_lowercase)
	}

	/// The live value of a form control.
	///
	/// Until [`set_value`](`Document::set_value`) is called, this reflects the markup:
	/// the `value` attribute, a `<textarea>`'s text, or a `<select>`'s selected `<option>`.
	#[must_use]
	pub fn value(&self, id: NodeId) -> String {
		if let Some(value) = self.state(id).and_then(|state| state.value.clone()) {
			return value;
		}
		match self.tag_name(id) {
			Some("textarea") => self.text_content(id),
			Some("select") => self.options(id).into_iter().find(|&option| self.selected(option)).map_or_else(String::new, |option| self.value(option)),
			Some("option") => self.attribute(id, "value").map_or_else(|| self.text_content(id), str::to_owned),
			_ => self.attribute(id, "value").unwrap_or_default().to_owned(),
		}
	}

	/// Overwrites the live value, which moves any text selection to the end as a browser would.
	pub fn set_value(&mut self, id: NodeId, value: &str) {
		let length = value.chars().count();
		if let Some(state) = self.state_mut(id) {
			state.value = Some(value.to_owned());
			if state.selection.is_some() {
				state.selection = Some((length, length));
			}
		}
	}

	#[must_use]
	pub fn checked(&self, id: NodeId) -> bool {
		self.state(id).and_then(|state| state.checked).unwrap_or_else(|| self.has_attribute(id, "checked"))
	}

	pub fn set_checked(&mut self, id: NodeId, checked: bool) {
		if let Some(state) = self.state_mut(id) {
			state.checked = Some(checked);
		}
	}

	#[must_use]
	pub fn selected(&self, id: NodeId) -> bool {
		self.state(id).and_then(|state| state.selected).unwrap_or_else(|| self.has_attribute(id, "selected"))
	}

	pub fn set_selected(&mut self, id: NodeId, selected: bool) {
		if let Some(state) = self.state_mut(id) {
			state.selected = Some(selected);
		}
	}

	/// `<option>` elements of a `<select>`, including those nested in `<optgroup>`s.
	#[must_use]
	pub fn options(&self, select: NodeId) -> Vec<NodeId> {
		let mut options = Vec::new();
		for child in self.children(select) {
			match self.tag_name(child) {
				Some("option") => options.push(child),
				Some("optgroup") => options.extend(self.children(child).filter(|&option| self.tag_name(option) == Some("option"))),
				_ => (),
			}
		}
		options
	}

	#[must_use]
	pub fn selected_index(&self, select: NodeId) -> Option<usize> {
		self.options(select).into_iter().position(|option| self.selected(option))
	}

	pub fn set_selected_index(&mut self, select: NodeId, index: Option<usize>) {
		for (i, option) in self.options(select).into_iter().enumerate() {
			self.set_selected(option, Some(i) == index);
		}
	}

	#[must_use]
	pub fn selection_range(&self, id: NodeId) -> Option<(usize, usize)> {
		self.state(id).and_then(|state| state.selection)
	}

	pub fn set_selection_range(&mut self, id: NodeId, start: usize, end: usize) {
		let length = self.value(id).chars().count();
		if let Some(state) = self.state_mut(id) {
			state.selection = Some((start.min(length), end.min(length).max(start.min(length))));
		}
	}

	#[must_use]
	pub fn active_element(&self) -> Option<NodeId> {
		self.active_element
	}

	pub fn focus(&mut self, id: NodeId) {
		if self.is_element(id) {
			self.active_element = Some(id);
		}
	}

	pub fn blur(&mut self) {
		self.active_element = None;
	}

	/// Creates an unattached copy of `id`. Live form state is copied along with attributes.
	pub fn clone_node(&mut self, id: NodeId, deep: bool) -> NodeId {
		let data = self.slot(id).data.clone();
		let copy = self.push(data);
		if deep {
			let children: Vec<_> = self.children(id).collect();
			for child in children {
				let child_copy = self.clone_node(child, true);
				self.append_child(copy, child_copy);
			}
		}
		copy
	}

	/// A human-readable location of `id`, such as `div#app > ul > li[2]`.
	#[must_use]
	pub fn path(&self, id: NodeId) -> String {
		let mut segments = Vec::new();
		let mut current = Some(id);
		while let Some(node) = current {
			let mut segment = String::new();
			match &self.slot(node).data {
				Data::Element { name, .. } => {
					segment.push_str(name);
					if let Some(element_id) = self.attribute(node, "id") {
						let _ = write!(segment, "#{}", element_id);
					}
				}
				Data::Text(_) => segment.push_str("#text"),
				Data::Comment(_) => segment.push_str("#comment"),
				Data::Fragment => segment.push_str("#fragment"),
			}
			if let Some(parent) = self.parent(node) {
				let index = self.children(parent).position(|child| child == node).unwrap_or_default();
				let _ = write!(segment, "[{}]", index);
			}
			segments.push(segment);
			current = self.parent(node);
		}
		segments.reverse();
		segments.join(" > ")
	}
}

pub struct Children<'a> {
	document: &'a Document,
	next: Option<NodeId>,
}
impl Iterator for Children<'_> {
	type Item = NodeId;

	fn next(&mut self) -> Option<Self::Item> {
		let current = self.next?;
		self.next = self.document.next_sibling(current);
		Some(current)
	}
}

pub struct Descendants<'a> {
	document: &'a Document,
	root: NodeId,
	next: Option<NodeId>,
}
impl Iterator for Descendants<'_> {
	type Item = NodeId;

	fn next(&mut self) -> Option<Self::Item> {
		let current = self.next?;
		self.next = match self.document.first_child(current) {
			Some(child) => Some(child),
			None => {
				let mut node = current;
				loop {
					if node == self.root {
						break None;
					}
					if let Some(sibling) = self.document.next_sibling(node) {
						break Some(sibling);
					}
					match self.document.parent(node) {
						Some(parent) if parent != self.root => node = parent,
						_ => break None,
					}
				}
			}
		};
		Some(current)
	}
}
