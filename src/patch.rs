//! A single reconciliation pass with the view's update policies applied.
//!
//! The coordinator parses the rendered markup, applies stream operations, drives the [`TreeReconciler`]
//! and then repairs what a keyed morph alone can't infer: stream order and limits, append/prepend order and focus.

use crate::{
	config::{Bindings, PatchConfig, UpdatePolicy},
	debug,
	dom::{Document, NodeId, NodeType},
	markup::{parse_element, parse_fragment, MarkupError},
	reconcile::{AddAction, ReconcileHooks, TreeReconciler, UpdateAction},
	render::RenderError,
	store::DiffError,
	template::{Cid, StreamOp},
};
use core::mem;
use hashbrown::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, error, instrument, trace, warn};

#[derive(Debug, Error)]
pub enum PatchError {
	#[error(transparent)]
	Markup(#[from] MarkupError),
	#[error(transparent)]
	Render(#[from] RenderError),
	#[error(transparent)]
	Diff(#[from] DiffError),
}

/// Callbacks fired synchronously during a pass.
///
/// Panics propagate to the caller of the pass.
#[allow(unused_variables)]
pub trait LifecycleHooks {
	fn on_before_add(&mut self, document: &Document, element: NodeId) {}
	/// Fired after the pass completed, for each added element.
	fn on_after_add(&mut self, document: &Document, element: NodeId) {}
	fn on_before_update(&mut self, document: &Document, from: NodeId, to: NodeId) {}
	/// Fired after the pass completed, for each updated element.
	fn on_after_update(&mut self, document: &Document, element: NodeId) {}
	fn on_discard(&mut self, document: &Document, element: NodeId) {}
}

impl LifecycleHooks for () {}

/// Elements changed by one or more passes.
///
/// Discarded elements are freed before the pass returns, so their handles only compare equal to earlier ones.
/// Inspect them in [`LifecycleHooks::on_discard`] instead.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatchOutcome {
	pub added: Vec<NodeId>,
	pub updated: Vec<NodeId>,
	pub discarded: Vec<NodeId>,
	/// Elements kept in place until their removal transition completes.
	pub pending_removals: Vec<NodeId>,
	/// Added child view boundaries, which need to be joined separately.
	pub child_views_added: Vec<NodeId>,
	pub child_views_discarded: Vec<NodeId>,
	/// Components that are no longer mounted anywhere in the view.
	pub components_discarded: Vec<Cid>,
}

impl PatchOutcome {
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self == &Self::default()
	}

	pub fn extend(&mut self, other: Self) {
		self.added.extend(other.added);
		self.updated.extend(other.updated);
		self.discarded.extend(other.discarded);
		self.pending_removals.extend(other.pending_removals);
		self.child_views_added.extend(other.child_views_added);
		self.child_views_discarded.extend(other.child_views_discarded);
		for cid in other.components_discarded {
			if !self.components_discarded.contains(&cid) {
				self.components_discarded.push(cid);
			}
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchTarget {
	/// The children of the view container.
	View,
	/// Every mounted instance of one component.
	Component(Cid),
}

/// Rendered markup waiting to be applied.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchPass {
	pub markup: String,
	pub streams: Vec<StreamOp>,
	pub target: PatchTarget,
	/// Whether this is the first pass after (re)connecting.
	pub join: bool,
}

/// Targets of locked elements, keyed by the live element, applied once the lock is released.
pub type LockedTargets = HashMap<NodeId, NodeId>;

pub(crate) fn update_policy(document: &Document, node: NodeId, bindings: &Bindings) -> Option<UpdatePolicy> {
	document.attribute(node, &bindings.update).and_then(UpdatePolicy::parse)
}

fn element_id(document: &Document, node: NodeId) -> Option<&str> {
	document.attribute(node, "id").filter(|id| !id.is_empty())
}

pub(crate) fn is_form_input(document: &Document, node: NodeId) -> bool {
	matches!(document.tag_name(node), Some("input" | "select" | "textarea")) && document.input_type(node) != "button"
}

fn is_textual_input(document: &Document, node: NodeId) -> bool {
	match document.tag_name(node) {
		Some("textarea") => true,
		Some("input") => matches!(
			document.input_type(node).as_str(),
			"text" | "number" | "email" | "password" | "search" | "tel" | "url" | "date" | "time" | "datetime-local" | "color" | "range"
		),
		_ => false,
	}
}

fn has_selection_range(document: &Document, node: NodeId) -> bool {
	match document.tag_name(node) {
		Some("textarea") => true,
		Some("input") => document.input_type(node) == "text",
		_ => false,
	}
}

/// Whether `node` belongs to the view of `container` rather than to a nested child view.
pub(crate) fn owned_by_view(document: &Document, container: NodeId, node: NodeId, bindings: &Bindings) -> bool {
	let mut current = Some(node);
	while let Some(id) = current {
		if id == container {
			return true;
		}
		if document.has_attribute(id, &bindings.parent_id) {
			return false;
		}
		current = document.parent(id);
	}
	false
}

/// Components on `discarded` elements that have no other instance left in the view.
pub(crate) fn unmounted_components(document: &Document, container: NodeId, bindings: &Bindings, discarded: &[NodeId]) -> Vec<Cid> {
	let mut cids = Vec::new();
	for &element in discarded {
		let cid = match document.attribute(element, &bindings.component).and_then(|cid| cid.parse::<Cid>().ok()) {
			Some(cid) => cid,
			None => continue,
		};
		if !cids.contains(&cid) && find_component_elements(document, container, bindings, cid).is_empty() {
			cids.push(cid);
		}
	}
	cids
}

/// Frees detached `garbage` outside the view, except stashed targets.
/// Locks of elements that are gone are dropped along with their targets.
pub(crate) fn release(document: &mut Document, container: NodeId, garbage: impl IntoIterator<Item = NodeId>, locked: &mut LockedTargets) {
	let stashed: HashSet<NodeId> = locked.values().copied().collect();
	let before = document.len();
	for node in garbage {
		if document.is_live(node) && !stashed.contains(&node) && !document.contains(container, node) {
			document.free(node);
		}
	}
	locked.retain(|&element, &mut target| {
		let live = document.is_live(element);
		if !live {
			trace!(%element, "Dropping the stashed target of a discarded element.");
			document.free(target);
		}
		live
	});
	trace!(freed = before - document.len(), allocated = document.len(), "Released detached nodes.");
}

/// Mounted elements of component `cid` within the view.
#[must_use]
pub fn find_component_elements(document: &Document, container: NodeId, bindings: &Bindings, cid: Cid) -> Vec<NodeId> {
	let cid = cid.to_string();
	document.query_all(container, |document, node| {
		document.attribute(node, &bindings.component) == Some(cid.as_str()) && owned_by_view(document, container, node, bindings)
	})
}

/// The mounted components among `cids` that aren't nested inside another one of them.
///
/// Unmounted components are left out. They can only come back through a parent that renders them.
#[must_use]
pub fn find_existing_parent_cids(document: &Document, container: NodeId, bindings: &Bindings, cids: &[Cid]) -> Vec<Cid> {
	let mut parents = Vec::new();
	let mut children = HashSet::new();
	for &cid in cids {
		for element in find_component_elements(document, container, bindings, cid) {
			if !parents.contains(&cid) {
				parents.push(cid);
			}
			for nested in document.query_all(element, |document, node| document.has_attribute(node, &bindings.component)) {
				if let Some(nested) = document.attribute(nested, &bindings.component).and_then(|cid| cid.parse::<Cid>().ok()) {
					children.insert(nested);
				}
			}
		}
	}
	parents.retain(|cid| !children.contains(cid));
	parents
}

/// Marks the children of append and prepend containers so a join pass may remove them.
pub fn mark_prunable(document: &mut Document, container: NodeId, bindings: &Bindings) {
	let containers = document.query_all(container, |document, node| {
		matches!(update_policy(document, node, bindings), Some(UpdatePolicy::Append | UpdatePolicy::Prepend))
	});
	for parent in containers {
		for child in document.element_children(parent) {
			document.set_attribute(child, &bindings.prune, "");
		}
	}
}

/// Copies the attributes of `source` onto `target`.
///
/// Names in `exclude` are skipped, though a `value` attribute is still written if the live values already agree.
/// With `ignored`, only `data-` attributes are touched and lock markers are kept.
pub(crate) fn merge_attributes(document: &mut Document, target: NodeId, source: NodeId, exclude: &[&str], ignored: bool, bindings: &Bindings) {
	let incoming = document.attributes(source).to_vec();
	for attribute in incoming.iter().rev() {
		if exclude.contains(&attribute.name.as_str()) {
			if attribute.name == "value" && document.value(target) == document.value(source) {
				document.set_attribute(target, "value", &attribute.value);
			}
			continue;
		}
		if document.attribute(target, &attribute.name) != Some(attribute.value.as_str()) && (!ignored || attribute.name.starts_with("data-")) {
			document.set_attribute(target, &attribute.name, &attribute.value);
		}
	}

	let stale: Vec<String> = document
		.attributes(target)
		.iter()
		.rev()
		.map(|attribute| attribute.name.clone())
		.filter(|name| {
			let absent = !incoming.iter().any(|attribute| &attribute.name == name);
			if ignored {
				absent && name.starts_with("data-") && name != &bindings.lock_ref
			} else {
				absent
			}
		})
		.collect();
	for name in stale {
		document.remove_attribute(target, &name);
	}
}

/// Updates a focused control's attributes while keeping what the user typed.
pub(crate) fn merge_focused_input(document: &mut Document, target: NodeId, source: NodeId, bindings: &Bindings) {
	if document.tag_name(target) != Some("select") {
		merge_attributes(document, target, source, &["value"], false, bindings);
	}
	if document.has_attribute(source, "readonly") {
		document.set_attribute(target, "readonly", "");
	} else {
		document.remove_attribute(target, "readonly");
	}
}

/// Whether a single-choice `<select>` got different options.
fn is_changed_select(document: &Document, from: NodeId, to: NodeId) -> bool {
	if document.tag_name(from) != Some("select") || document.has_attribute(from, "multiple") {
		return false;
	}
	let before = document.options(from);
	let after = document.options(to);
	before.len() != after.len()
		|| document.attributes(from) != document.attributes(to)
		|| before.iter().zip(&after).any(|(&a, &b)| {
			document.attribute(a, "value") != document.attribute(b, "value") || document.text_content(a) != document.text_content(b)
		})
}

/// Drops target children without an id from containers whose children are matched by id only, and returns them.
fn clean_child_nodes(document: &mut Document, container: NodeId, bindings: &Bindings) -> Vec<NodeId> {
	if !matches!(update_policy(document, container, bindings), Some(UpdatePolicy::Append | UpdatePolicy::Prepend | UpdatePolicy::Stream)) {
		return Vec::new();
	}
	let illegal: Vec<NodeId> = document.children(container).filter(|&child| element_id(document, child).is_none()).collect();
	for &child in &illegal {
		let blank = document.text(child).map_or(false, |text| text.trim().is_empty());
		if document.is_element(child) || (!blank && document.node_type(child) != NodeType::Comment) {
			let location = if cfg!(feature = "log-paths") { document.path(child) } else { child.to_string() };
			error!(
				"Only elements with an id are allowed inside containers with {}. Removing illegal node {}.",
				bindings.update, location
			);
		}
		document.remove(child);
	}
	illegal
}

/// Nearest inclusive ancestor shared by all `nodes`.
fn common_ancestor(document: &Document, nodes: &[NodeId]) -> Option<NodeId> {
	let (&first, rest) = nodes.split_first()?;
	let mut candidate = Some(first);
	while let Some(ancestor) = candidate {
		if rest.iter().all(|&node| document.contains(ancestor, node)) {
			return Some(ancestor);
		}
		candidate = document.parent(ancestor);
	}
	None
}

/// Restores order in an append or prepend container after a morph that only saw the newest children.
struct PostMorphRestorer {
	container_id: Option<String>,
	policy: UpdatePolicy,
	/// Kept children and the id of the element that preceded them.
	elements_to_modify: Vec<(String, Option<String>)>,
	ids_to_add: Vec<String>,
}

impl PostMorphRestorer {
	fn capture(document: &Document, before: NodeId, after: NodeId, policy: UpdatePolicy) -> Self {
		let ids_after: Vec<String> = document.element_children(after).into_iter().filter_map(|child| element_id(document, child).map(str::to_owned)).collect();
		let mut ids_before = HashSet::new();
		let mut elements_to_modify = Vec::new();
		for child in document.element_children(before) {
			if let Some(id) = element_id(document, child) {
				ids_before.insert(id.to_owned());
				if ids_after.iter().any(|after| after == id) {
					let previous = document.previous_element_sibling(child).and_then(|previous| element_id(document, previous)).map(str::to_owned);
					elements_to_modify.push((id.to_owned(), previous));
				}
			}
		}
		Self {
			container_id: element_id(document, after).map(str::to_owned),
			policy,
			elements_to_modify,
			ids_to_add: ids_after.into_iter().filter(|id| !ids_before.contains(id)).collect(),
		}
	}

	fn perform(&self, document: &mut Document, root: NodeId) {
		let container = match self.container_id.as_deref().and_then(|id| document.element_by_id(root, id)) {
			Some(container) => container,
			None => return warn!("Append/prepend container {:?} is gone. Not restoring its order.", self.container_id),
		};

		for (id, previous_id) in &self.elements_to_modify {
			let element = match document.element_by_id(root, id) {
				Some(element) => element,
				None => continue,
			};
			match previous_id {
				Some(previous_id) => {
					if let Some(previous) = document.element_by_id(root, previous_id) {
						let in_place = document
							.previous_element_sibling(element)
							.and_then(|sibling| element_id(document, sibling))
							== Some(previous_id.as_str());
						if !in_place {
							document.insert_after(previous, element);
						}
					}
				}
				None => {
					if document.previous_element_sibling(element).is_some() {
						document.prepend_child(container, element);
					}
				}
			}
		}

		if self.policy == UpdatePolicy::Prepend {
			for id in self.ids_to_add.iter().rev() {
				if let Some(element) = document.element_by_id(root, id) {
					document.prepend_child(container, element);
				}
			}
		}
	}
}

#[derive(Clone, Debug)]
struct PendingInsert {
	reference: String,
	at: i64,
	limit: Option<i64>,
	reset: bool,
}

fn to_index(value: i64) -> usize {
	usize::try_from(value.unsigned_abs()).unwrap_or(usize::MAX)
}

/// Pass state shared with the reconciler.
struct PassHooks<'a, L: LifecycleHooks + ?Sized> {
	bindings: &'a Bindings,
	join: bool,
	root_id: String,
	focused: Option<NodeId>,
	lifecycle: &'a mut L,
	locked: &'a mut LockedTargets,
	stream_inserts: HashMap<String, PendingInsert>,
	stream_restore: HashMap<String, NodeId>,
	restorers: Vec<PostMorphRestorer>,
	outcome: PatchOutcome,
	/// Nodes that left the live tree or were never inserted. Freed once the pass is done.
	garbage: Vec<NodeId>,
}

impl<'a, L: LifecycleHooks + ?Sized> PassHooks<'a, L> {
	#[allow(clippy::too_many_arguments)]
	fn new(document: &Document, container: NodeId, bindings: &'a Bindings, join: bool, focused: Option<NodeId>, lifecycle: &'a mut L, locked: &'a mut LockedTargets) -> Self {
		Self {
			bindings,
			join,
			root_id: document.attribute(container, "id").unwrap_or_default().to_owned(),
			focused,
			lifecycle,
			locked,
			stream_inserts: HashMap::new(),
			stream_restore: HashMap::new(),
			restorers: Vec::new(),
			outcome: PatchOutcome::default(),
			garbage: Vec::new(),
		}
	}

	/// Restores what the morph can't see, fires the deferred callbacks and frees what the pass left behind.
	fn finish(mut self, document: &mut Document, container: NodeId, focus: &FocusSnapshot) -> PatchOutcome {
		for stashed in mem::take(&mut self.stream_restore).into_values() {
			trace!(%stashed, "Stashed stream child wasn't inserted again.");
			self.discard(document, stashed);
		}
		for restorer in mem::take(&mut self.restorers) {
			restorer.perform(document, container);
		}
		focus.restore(document, container);

		let components_discarded = unmounted_components(document, container, self.bindings, &self.outcome.discarded);
		let Self {
			mut outcome,
			lifecycle,
			locked,
			garbage,
			..
		} = self;
		outcome.components_discarded = components_discarded;
		for &element in &outcome.added {
			lifecycle.on_after_add(document, element);
		}
		for &element in &outcome.updated {
			lifecycle.on_after_update(document, element);
		}
		release(document, container, garbage, locked);
		trace!(
			added = outcome.added.len(),
			updated = outcome.updated.len(),
			discarded = outcome.discarded.len(),
			"Pass complete."
		);
		outcome
	}

	fn stream_insert(&self, document: &Document, node: NodeId) -> Option<PendingInsert> {
		element_id(document, node).and_then(|id| self.stream_inserts.get(id)).cloned()
	}

	fn apply_streams(&mut self, document: &mut Document, container: NodeId, streams: &[StreamOp]) {
		let bindings = self.bindings;
		for stream in streams {
			for insert in &stream.inserts {
				self.stream_inserts.insert(
					insert.key.clone(),
					PendingInsert {
						reference: stream.reference.clone(),
						at: insert.at,
						limit: insert.limit,
						reset: stream.reset,
					},
				);
			}
			if stream.reset {
				let members = document.query_all(container, |document, node| document.attribute(node, &bindings.stream_ref) == Some(stream.reference.as_str()));
				for member in members {
					self.remove_stream_child(document, member);
				}
			}
			for id in &stream.delete_ids {
				if let Some(child) = document.element_by_id(container, id) {
					self.remove_stream_child(document, child);
				}
			}
		}
	}

	/// Removes the children of this view's stream containers that a join doesn't insert again.
	fn clear_stream_children(&mut self, document: &mut Document, container: NodeId) {
		let bindings = self.bindings;
		let stream_containers = document.query_all(container, |document, node| {
			update_policy(document, node, bindings) == Some(UpdatePolicy::Stream) && owned_by_view(document, container, node, bindings)
		});
		for stream_container in stream_containers {
			for child in document.element_children(stream_container) {
				self.remove_stream_child(document, child);
			}
		}
	}

	/// Stashes a child that the same pass inserts again, otherwise removes it through the normal discard path.
	fn remove_stream_child(&mut self, document: &mut Document, child: NodeId) {
		match element_id(document, child).map(str::to_owned) {
			Some(id) if self.stream_inserts.contains_key(&id) => {
				document.remove(child);
				self.stream_restore.insert(id, child);
			}
			_ => {
				if !self.maybe_pending_remove(document, child) {
					document.remove(child);
					self.discard(document, child);
				}
			}
		}
	}

	fn maybe_pending_remove(&mut self, document: &Document, node: NodeId) -> bool {
		if document.has_attribute(node, &self.bindings.remove) {
			if !self.outcome.pending_removals.contains(&node) {
				self.outcome.pending_removals.push(node);
			}
			true
		} else {
			false
		}
	}

	fn discard(&mut self, document: &Document, node: NodeId) {
		self.garbage.push(node);
		if !document.is_element(node) {
			return;
		}
		self.outcome.discarded.push(node);
		if document.has_attribute(node, &self.bindings.parent_id) {
			self.outcome.child_views_discarded.push(node);
		}
		self.lifecycle.on_discard(document, node);
	}

	fn maybe_reorder_stream(&mut self, document: &mut Document, element: NodeId, is_new: bool) {
		let insert = match self.stream_insert(document, element) {
			Some(insert) => insert,
			None => return,
		};
		document.set_attribute(element, &self.bindings.stream_ref, &insert.reference);
		if !insert.reset && !is_new {
			return;
		}
		let parent = match document.parent(element) {
			Some(parent) => parent,
			None => return,
		};

		if insert.at == 0 {
			let first = document.first_element_child(parent);
			document.insert_before(parent, element, first);
		} else if insert.at > 0 {
			let at = to_index(insert.at);
			let children = document.element_children(parent);
			let old_index = children.iter().position(|&child| child == element);
			if at >= children.len().saturating_sub(1) {
				document.append_child(parent, element);
			} else {
				let sibling = children[at];
				if old_index.map_or(false, |old_index| old_index > at) {
					document.insert_before(parent, element, Some(sibling));
				} else {
					let next = document.next_element_sibling(sibling);
					document.insert_before(parent, element, next);
				}
			}
		}

		self.maybe_limit_stream(document, element, &insert);
	}

	/// A negative limit keeps the last `-limit` children, a positive one the first `limit`.
	fn maybe_limit_stream(&mut self, document: &mut Document, element: NodeId, insert: &PendingInsert) {
		let limit = match insert.limit {
			Some(limit) if limit != 0 => limit,
			_ => return,
		};
		let parent = match document.parent(element) {
			Some(parent) => parent,
			None => return,
		};
		let children = document.element_children(parent);
		let keep = to_index(limit);
		if children.len() <= keep {
			return;
		}
		let evicted = if limit < 0 { &children[..children.len() - keep] } else { &children[keep..] };
		trace!(evicted = evicted.len(), limit, "Limiting stream.");
		for &child in evicted {
			self.remove_stream_child(document, child);
		}
	}
}

impl<'a, L: LifecycleHooks + ?Sized> ReconcileHooks for PassHooks<'a, L> {
	fn node_key(&self, document: &Document, node: NodeId) -> Option<String> {
		if !document.is_element(node) || document.has_attribute(node, &self.bindings.replace) {
			return None;
		}
		let id = element_id(document, node);
		if self.join {
			// Nothing rendered before the join carries a fingerprint.
			return id.map(str::to_owned);
		}
		id.or_else(|| document.attribute(node, &self.bindings.fingerprint)).map(str::to_owned)
	}

	fn skip_from_children(&mut self, document: &Document, from: NodeId) -> bool {
		update_policy(document, from, self.bindings) == Some(UpdatePolicy::Stream)
	}

	fn add_child(&mut self, document: &mut Document, parent: NodeId, child: NodeId) {
		let insert = match self.stream_insert(document, child) {
			Some(insert) => insert,
			None => return document.append_child(parent, child),
		};
		document.set_attribute(child, &self.bindings.stream_ref, &insert.reference);
		match insert.at {
			0 => document.prepend_child(parent, child),
			at if at > 0 => {
				let sibling = document.element_children(parent).get(to_index(at)).copied();
				document.insert_before(parent, child, sibling);
			}
			_ => document.append_child(parent, child),
		}
	}

	fn before_node_added(&mut self, document: &mut Document, node: NodeId) -> AddAction {
		if !document.is_element(node) {
			return AddAction::Insert;
		}
		if document.has_attribute(node, &self.bindings.skip) {
			error!(
				"Skipped root {:?} has no live counterpart. Leaving it out.",
				document.attribute(node, &self.bindings.fingerprint)
			);
			return AddAction::Skip;
		}
		self.lifecycle.on_before_add(document, node);
		if !self.join {
			if let Some(stashed) = element_id(document, node).and_then(|id| self.stream_restore.remove(id)) {
				return AddAction::Substitute(stashed);
			}
		}
		AddAction::Insert
	}

	fn node_added(&mut self, document: &mut Document, node: NodeId) {
		if !document.is_element(node) {
			return;
		}
		document.remove_attribute(node, &self.bindings.replace);
		self.maybe_reorder_stream(document, node, true);
		if document.has_attribute(node, &self.bindings.parent_id) {
			self.outcome.child_views_added.push(node);
		}
		self.outcome.added.push(node);
	}

	fn before_element_updated(&mut self, document: &mut Document, from: NodeId, to: NodeId) -> UpdateAction {
		let bindings = self.bindings;
		let illegal = clean_child_nodes(document, to, bindings);
		self.garbage.extend(illegal);

		if document.has_attribute(to, &bindings.skip) {
			self.maybe_reorder_stream(document, from, false);
			return UpdateAction::Skip;
		}
		if document.has_attribute(to, &bindings.replace) {
			return UpdateAction::Replace;
		}

		if update_policy(document, from, bindings) == Some(UpdatePolicy::Ignore) {
			self.lifecycle.on_before_update(document, from, to);
			merge_attributes(document, from, to, &[], true, bindings);
			self.outcome.updated.push(from);
			return UpdateAction::Skip;
		}

		if document.has_attribute(from, &bindings.lock_ref) {
			trace!(%from, "Element is locked. Stashing its target.");
			document.remove(to);
			if let Some(previous) = self.locked.insert(from, to) {
				self.garbage.push(previous);
			}
			return UpdateAction::Skip;
		}

		if document.has_attribute(to, &bindings.parent_id) {
			let session = document.attribute(from, &bindings.session).filter(|session| !session.is_empty()).map(str::to_owned);
			merge_attributes(document, from, to, &[bindings.static_token.as_str()], false, bindings);
			if let Some(session) = session {
				document.set_attribute(from, &bindings.session, &session);
			}
			document.set_attribute(from, &bindings.root_id, &self.root_id);
			return UpdateAction::Skip;
		}

		let focused_input = self.focused == Some(from) && is_form_input(document, from);
		let changed_select = focused_input && is_changed_select(document, from, to);
		if focused_input && document.input_type(from) != "hidden" && !changed_select {
			self.lifecycle.on_before_update(document, from, to);
			merge_focused_input(document, from, to, bindings);
			self.outcome.updated.push(from);
			return UpdateAction::Skip;
		}
		if changed_select {
			document.blur();
		}

		if let Some(policy @ (UpdatePolicy::Append | UpdatePolicy::Prepend)) = update_policy(document, to, bindings) {
			self.restorers.push(PostMorphRestorer::capture(document, from, to, policy));
		}
		self.lifecycle.on_before_update(document, from, to);
		UpdateAction::Morph
	}

	fn element_updated(&mut self, document: &mut Document, element: NodeId) {
		self.outcome.updated.push(element);
		self.maybe_reorder_stream(document, element, false);
	}

	fn before_node_discarded(&mut self, document: &mut Document, node: NodeId) -> bool {
		if !document.is_element(node) || document.has_attribute(node, &self.bindings.prune) {
			return true;
		}
		let in_managed_container = element_id(document, node).is_some()
			&& document.parent(node).map_or(false, |parent| {
				matches!(
					update_policy(document, parent, self.bindings),
					Some(UpdatePolicy::Stream | UpdatePolicy::Append | UpdatePolicy::Prepend)
				)
			});
		if in_managed_container {
			return false;
		}
		!self.maybe_pending_remove(document, node)
	}

	fn node_discarded(&mut self, document: &mut Document, node: NodeId) {
		self.discard(document, node);
	}
}

/// Focus and selection inside a view, taken before a pass.
struct FocusSnapshot {
	element: Option<NodeId>,
	id: Option<String>,
	selection: Option<(usize, usize)>,
}

impl FocusSnapshot {
	fn capture(document: &Document, container: NodeId) -> Self {
		let element = document.active_element().filter(|&focused| document.contains(container, focused));
		Self {
			element,
			id: element.and_then(|focused| element_id(document, focused)).map(str::to_owned),
			selection: element.filter(|&focused| has_selection_range(document, focused)).and_then(|focused| document.selection_range(focused)),
		}
	}

	fn restore(&self, document: &mut Document, container: NodeId) {
		let mut focused = match self.element {
			Some(focused) => focused,
			None => return,
		};
		if !document.contains(container, focused) {
			let equivalent = self
				.id
				.as_deref()
				.and_then(|id| document.element_by_id(container, id))
				.filter(|&equivalent| document.tag_name(equivalent) == document.tag_name(focused));
			match equivalent {
				Some(equivalent) => focused = equivalent,
				None => return debug!("Focused element left the view."),
			}
		}

		if document.tag_name(focused) == Some("select") {
			document.focus(focused);
		}
		if !is_textual_input(document, focused) {
			return;
		}
		if document.active_element() != Some(focused) {
			document.focus(focused);
		}
		if let Some((start, end)) = self.selection.filter(|_| has_selection_range(document, focused)) {
			document.set_selection_range(focused, start, end);
		}
	}
}

/// Drives one pass against a view container.
pub struct PatchCoordinator<'a, L: LifecycleHooks + ?Sized> {
	document: &'a mut Document,
	container: NodeId,
	config: &'a PatchConfig,
	lifecycle: &'a mut L,
	locked: &'a mut LockedTargets,
}

impl<'a, L: LifecycleHooks + ?Sized> PatchCoordinator<'a, L> {
	pub fn new(document: &'a mut Document, container: NodeId, config: &'a PatchConfig, lifecycle: &'a mut L, locked: &'a mut LockedTargets) -> Self {
		Self {
			document,
			container,
			config,
			lifecycle,
			locked,
		}
	}

	/// Applies `pass`.
	///
	/// Markup is parsed before anything is mutated, so a [`PatchError`] leaves the live tree untouched.
	/// A component that isn't mounted makes the pass a no-op.
	#[instrument(skip_all, fields(target = ?pass.target, join = pass.join))]
	pub fn perform(self, pass: PatchPass) -> Result<PatchOutcome, PatchError> {
		let Self {
			document,
			container,
			config,
			lifecycle,
			locked,
		} = self;
		let bindings = &config.bindings;

		let instances = match pass.target {
			PatchTarget::View => vec![container],
			PatchTarget::Component(cid) => {
				let instances = find_component_elements(document, container, bindings, cid);
				if instances.is_empty() {
					debug!(cid, "Component is not mounted. Skipping its patch.");
					return Ok(PatchOutcome::default());
				}
				instances
			}
		};

		let mut targets = Vec::with_capacity(instances.len());
		for _ in &instances {
			let parsed = match pass.target {
				PatchTarget::View => parse_fragment(document, &pass.markup),
				PatchTarget::Component(_) => parse_element(document, &pass.markup),
			};
			match parsed {
				Ok(target) => targets.push(target),
				Err(error) => {
					for target in targets {
						document.free(target);
					}
					return Err(error.into());
				}
			}
		}
		let scope = common_ancestor(document, &instances).unwrap_or(container);

		let focus = FocusSnapshot::capture(document, container);

		if pass.join {
			mark_prunable(document, container, bindings);
		}

		let mut hooks = PassHooks::new(document, container, bindings, pass.join, focus.element, lifecycle, locked);
		hooks.apply_streams(document, container, &pass.streams);
		if pass.join {
			hooks.clear_stream_children(document, container);
		}

		let children_only = pass.target == PatchTarget::View;
		for (&instance, &target) in instances.iter().zip(&targets) {
			TreeReconciler::new(&mut hooks).reconcile(document, instance, target, children_only);
		}

		if config.debug {
			debug::duplicate_keys(document, scope);
			debug::invalid_stream_inserts(document, container, bindings, hooks.stream_inserts.keys().map(String::as_str));
		}

		hooks.garbage.extend(targets);
		Ok(hooks.finish(document, container, &focus))
	}

	/// Applies the target stashed for a locked element, after its lock was released.
	#[instrument(skip_all, fields(%element))]
	pub fn perform_unlocked(self, element: NodeId, target: NodeId) -> PatchOutcome {
		let Self {
			document,
			container,
			config,
			lifecycle,
			locked,
		} = self;
		let focus = FocusSnapshot::capture(document, container);
		let mut hooks = PassHooks::new(document, container, &config.bindings, false, focus.element, lifecycle, locked);
		TreeReconciler::new(&mut hooks).reconcile(document, element, target, false);
		hooks.garbage.push(target);
		hooks.finish(document, container, &focus)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::markup::outer_html;

	#[test]
	fn ignored_merge_touches_data_attributes_only() {
		let mut document = Document::new();
		let bindings = Bindings::default();
		let target = parse_element(&mut document, "<div class=\"a\" data-x=\"1\" data-live-ref=\"3\" data-gone=\"\"></div>").unwrap();
		let source = parse_element(&mut document, "<div class=\"b\" data-x=\"2\"></div>").unwrap();
		merge_attributes(&mut document, target, source, &[], true, &bindings);
		assert_eq!(outer_html(&document, target), "<div class=\"a\" data-x=\"2\" data-live-ref=\"3\"></div>");
	}

	#[test]
	fn parent_cids_exclude_nested() {
		let mut document = Document::new();
		let bindings = Bindings::default();
		let container = parse_element(
			&mut document,
			"<div><section data-live-component=\"1\"><p data-live-component=\"2\"></p></section><p data-live-component=\"3\"></p></div>",
		)
		.unwrap();
		assert_eq!(find_existing_parent_cids(&document, container, &bindings, &[2, 1, 3, 4]), vec![1, 3]);
	}

	#[test]
	fn common_ancestor_of_siblings() {
		let mut document = Document::new();
		let root = parse_element(&mut document, "<ul><li><b></b></li><li><i></i></li></ul>").unwrap();
		let b = document.descendants(root).find(|&node| document.tag_name(node) == Some("b")).unwrap();
		let i = document.descendants(root).find(|&node| document.tag_name(node) == Some("i")).unwrap();
		assert_eq!(common_ancestor(&document, &[b, i]), Some(root));
		assert_eq!(common_ancestor(&document, &[b]), Some(b));
	}
}
