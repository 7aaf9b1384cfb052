//! The running template of one view.

use crate::{
	config::Bindings,
	render::{FragmentRenderer, ModifiedRoot, RenderError, RenderOutput},
	resolve::{ComponentResolver, IncomingComponents},
	template::{truthy, Cid, ComponentEntry, ComponentTable, TemplateNode, COMPONENTS, STATICS},
};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{instrument, trace, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiffError {
	#[error("diff payload must be an object, found {found}")]
	NotAnObject { found: &'static str },
	#[error("component table must be an object, found {found}")]
	ComponentsNotAnObject { found: &'static str },
}

fn kind(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "a boolean",
		Value::Number(_) => "a number",
		Value::String(_) => "a string",
		Value::Array(_) => "an array",
		Value::Object(_) => "an object",
	}
}

/// Owns the statics, dynamics and component table of one view and folds diffs into them.
#[derive(Debug, Default)]
pub struct TemplateStore {
	view_id: String,
	root: TemplateNode,
	components: ComponentTable,
	next_fingerprint: u64,
}

impl TemplateStore {
	pub fn new(view_id: impl Into<String>) -> Self {
		Self {
			view_id: view_id.into(),
			..Self::default()
		}
	}

	#[must_use]
	pub fn view_id(&self) -> &str {
		&self.view_id
	}

	#[must_use]
	pub fn root(&self) -> &TemplateNode {
		&self.root
	}

	#[must_use]
	pub fn component(&self, cid: Cid) -> Option<&ComponentEntry> {
		self.components.get(&cid)
	}

	pub fn cids(&self) -> impl Iterator<Item = Cid> + '_ {
		self.components.keys().copied()
	}

	/// Whether this level of a diff replaces its fragment instead of updating it.
	#[must_use]
	pub fn is_new_fingerprint(diff: &Value) -> bool {
		diff.get(STATICS).map_or(false, truthy)
	}

	/// Whether a diff only touches the component table.
	#[must_use]
	pub fn is_component_only_diff(diff: &Value) -> bool {
		matches!(diff, Value::Object(map) if map.len() == 1 && map.contains_key(COMPONENTS))
	}

	/// Ids of the components a diff updates.
	#[must_use]
	pub fn component_cids(diff: &Value) -> Vec<Cid> {
		match diff.get(COMPONENTS) {
			Some(Value::Object(components)) => components.keys().filter_map(|cid| cid.parse().ok()).collect(),
			_ => Vec::new(),
		}
	}

	/// Folds `diff` into the template.
	///
	/// A level carrying statics replaces its fragment wholesale; any other level merges into the existing one in place.
	/// The component table is merged last, after resolving statics shared between entries.
	#[instrument(skip(self, diff), fields(view = %self.view_id))]
	pub fn merge_diff(&mut self, diff: Value) -> Result<(), DiffError> {
		let mut diff = match diff {
			Value::Object(diff) => diff,
			other => return Err(DiffError::NotAnObject { found: kind(&other) }),
		};
		let components = diff.remove(COMPONENTS);

		if diff.contains_key(STATICS) {
			trace!("Replacing the root fragment.");
			self.root = TemplateNode::from_json(diff);
		} else {
			self.root.merge(diff);
		}

		match components {
			None => Ok(()),
			Some(Value::Object(components)) => {
				self.merge_components(components);
				Ok(())
			}
			Some(other) => Err(DiffError::ComponentsNotAnObject { found: kind(&other) }),
		}
	}

	fn merge_components(&mut self, components: Map<String, Value>) {
		let mut incoming = IncomingComponents::new();
		for (key, entry) in components {
			match (key.parse::<Cid>(), entry) {
				(Ok(cid), Value::Object(entry)) => {
					incoming.insert(cid, entry);
				}
				(_, entry) => warn!("Ignoring component table entry {:?} holding {}.", key, kind(&entry)),
			}
		}

		let mut resolver = ComponentResolver::new(&self.components, &incoming);
		for &cid in incoming.keys() {
			resolver.resolve(cid);
		}
		trace!(resolutions = resolver.resolutions(), "Resolved components.");
		let resolved = resolver.into_resolved();

		for (cid, node) in resolved {
			let was_reset = !incoming.get(&cid).map_or(false, |entry| entry.contains_key(STATICS)) && self.components.get(&cid).map_or(false, |prior| prior.was_reset);
			self.components.insert(cid, ComponentEntry { node, was_reset });
		}
	}

	/// Forces the next render of `cid` to ignore its change tracking, for components that are being mounted again.
	pub fn reset_component(&mut self, cid: Cid) {
		match self.components.get_mut(&cid) {
			Some(entry) => entry.was_reset = true,
			None => trace!(cid, "Not resetting unknown component."),
		}
	}

	pub fn prune_components(&mut self, cids: impl IntoIterator<Item = Cid>) {
		for cid in cids {
			self.components.remove(&cid);
		}
	}

	/// Renders the whole view.
	///
	/// With `only_cids`, components outside the set render as skip placeholders.
	pub fn render(&mut self, bindings: &Bindings, only_cids: Option<&[Cid]>) -> Result<RenderOutput, RenderError> {
		let mut renderer = FragmentRenderer::new(&mut self.components, &self.view_id, &mut self.next_fingerprint, bindings);
		if let Some(only_cids) = only_cids {
			renderer = renderer.only_cids(only_cids.iter().copied());
		}
		let markup = renderer.render(&mut self.root, true)?;
		Ok(RenderOutput {
			markup,
			streams: renderer.finish(),
		})
	}

	/// Renders a single component fully, without the whitespace and comments around its root element.
	pub fn render_component(&mut self, bindings: &Bindings, cid: Cid) -> Result<RenderOutput, RenderError> {
		let mut renderer = FragmentRenderer::new(&mut self.components, &self.view_id, &mut self.next_fingerprint, bindings);
		let markup = renderer.render_component(cid)?;
		let streams = renderer.finish();
		let markup = if markup.is_empty() {
			markup
		} else {
			let ModifiedRoot { element, .. } = crate::render::modify_root(&markup, &[], false)?;
			element
		};
		Ok(RenderOutput { markup, streams })
	}
}
