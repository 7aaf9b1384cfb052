//! One mounted view: its template, its container in the live tree and the passes waiting to run against it.

use crate::{
	config::PatchConfig,
	dom::{Document, NodeId},
	patch::{find_existing_parent_cids, release, unmounted_components, LifecycleHooks, LockedTargets, PatchCoordinator, PatchError, PatchOutcome, PatchPass, PatchTarget},
	queue::{TransitionId, TransitionSet},
	store::TemplateStore,
	template::Cid,
};
use serde_json::Value;
use tracing::{debug, instrument, trace, warn};

/// Sequences merges and passes for one view.
///
/// Every payload is merged before its pass runs, and passes run strictly in the order their payloads arrived.
#[derive(Debug)]
pub struct View {
	store: TemplateStore,
	config: PatchConfig,
	container: NodeId,
	transitions: TransitionSet<Value>,
	locked: LockedTargets,
	next_ref: u64,
}

impl View {
	pub fn new(container: NodeId, view_id: impl Into<String>, config: PatchConfig) -> Self {
		Self {
			store: TemplateStore::new(view_id),
			config,
			container,
			transitions: TransitionSet::new(),
			locked: LockedTargets::new(),
			next_ref: 0,
		}
	}

	#[must_use]
	pub fn container(&self) -> NodeId {
		self.container
	}

	#[must_use]
	pub fn id(&self) -> &str {
		self.store.view_id()
	}

	#[must_use]
	pub fn store(&self) -> &TemplateStore {
		&self.store
	}

	#[must_use]
	pub fn config(&self) -> &PatchConfig {
		&self.config
	}

	/// Renders the first payload after (re)connecting into the container.
	///
	/// Any previous template is dropped.
	/// Append and prepend children that the payload doesn't render again are removed.
	#[instrument(skip_all, fields(view = %self.store.view_id()))]
	pub fn join<L: LifecycleHooks + ?Sized>(&mut self, document: &mut Document, diff: Value, lifecycle: &mut L) -> Result<PatchOutcome, PatchError> {
		self.store = TemplateStore::new(self.store.view_id().to_owned());
		self.store.merge_diff(diff)?;
		let rendered = self.store.render(&self.config.bindings, None)?;
		let pass = PatchPass {
			markup: rendered.markup,
			streams: rendered.streams,
			target: PatchTarget::View,
			join: true,
		};
		let outcome = PatchCoordinator::new(document, self.container, &self.config, lifecycle, &mut self.locked).perform(pass)?;
		Ok(self.reset_components(outcome))
	}

	/// Merges `diff` and patches what it changed.
	///
	/// A diff touching only components patches the outermost of them that are mounted, each on its own.
	#[instrument(skip_all, fields(view = %self.store.view_id()))]
	pub fn update<L: LifecycleHooks + ?Sized>(&mut self, document: &mut Document, diff: Value, lifecycle: &mut L) -> Result<PatchOutcome, PatchError> {
		if matches!(&diff, Value::Object(map) if map.is_empty()) {
			trace!("Empty diff.");
			return Ok(PatchOutcome::default());
		}

		let component_only = TemplateStore::is_component_only_diff(&diff);
		let cids = TemplateStore::component_cids(&diff);
		self.store.merge_diff(diff)?;

		let mut outcome = PatchOutcome::default();
		if component_only {
			let parents = find_existing_parent_cids(document, self.container, &self.config.bindings, &cids);
			debug!(?parents, "Patching components.");
			for cid in parents {
				let rendered = self.store.render_component(&self.config.bindings, cid)?;
				let pass = PatchPass {
					markup: rendered.markup,
					streams: rendered.streams,
					target: PatchTarget::Component(cid),
					join: false,
				};
				outcome.extend(PatchCoordinator::new(document, self.container, &self.config, lifecycle, &mut self.locked).perform(pass)?);
			}
		} else {
			let rendered = self.store.render(&self.config.bindings, Some(&cids))?;
			let pass = PatchPass {
				markup: rendered.markup,
				streams: rendered.streams,
				target: PatchTarget::View,
				join: false,
			};
			outcome = PatchCoordinator::new(document, self.container, &self.config, lifecycle, &mut self.locked).perform(pass)?;
		}
		Ok(self.reset_components(outcome))
	}

	/// Updates with `diff` now, or queues it while a transition is outstanding.
	///
	/// Diffs left queued by an earlier failure run first.
	/// Returns [`None`] if the diff was queued.
	pub fn push_diff<L: LifecycleHooks + ?Sized>(&mut self, document: &mut Document, diff: Value, lifecycle: &mut L) -> Result<Option<PatchOutcome>, PatchError> {
		match self.transitions.defer(diff) {
			Some(diff) => self.update(document, diff, lifecycle).map(Some),
			None if self.transitions.is_idle() => self.flush(document, lifecycle).map(Some),
			None => Ok(None),
		}
	}

	/// Runs queued diffs in arrival order if no transition is outstanding.
	pub fn flush<L: LifecycleHooks + ?Sized>(&mut self, document: &mut Document, lifecycle: &mut L) -> Result<PatchOutcome, PatchError> {
		let ready = self.transitions.take_ready();
		self.run(document, ready, lifecycle)
	}

	pub fn begin_transition(&mut self) -> TransitionId {
		self.transitions.begin()
	}

	/// Ends a transition and runs the diffs it held back, if it was the last one.
	pub fn end_transition<L: LifecycleHooks + ?Sized>(&mut self, document: &mut Document, id: TransitionId, lifecycle: &mut L) -> Result<PatchOutcome, PatchError> {
		let ready = self.transitions.end(id);
		self.run(document, ready, lifecycle)
	}

	/// Updates with each diff in turn. On error, the diffs after the failing one are queued again.
	fn run<L: LifecycleHooks + ?Sized>(&mut self, document: &mut Document, diffs: Vec<Value>, lifecycle: &mut L) -> Result<PatchOutcome, PatchError> {
		let mut outcome = PatchOutcome::default();
		let mut diffs = diffs.into_iter();
		while let Some(diff) = diffs.next() {
			match self.update(document, diff, lifecycle) {
				Ok(next) => outcome.extend(next),
				Err(error) => {
					self.transitions.requeue(diffs);
					return Err(error);
				}
			}
		}
		Ok(outcome)
	}

	/// Detaches elements whose removal transition completed.
	///
	/// Elements that were re-attached elsewhere or already removed are left alone.
	pub fn finish_pending_removals<L: LifecycleHooks + ?Sized>(&mut self, document: &mut Document, elements: &[NodeId], lifecycle: &mut L) -> PatchOutcome {
		let mut outcome = PatchOutcome::default();
		let mut detached = Vec::new();
		for &element in elements {
			if element == self.container || !document.is_live(element) || !document.contains(self.container, element) {
				trace!(%element, "Pending removal is no longer part of the view.");
				continue;
			}
			document.remove(element);
			let mut subtree = vec![element];
			subtree.extend(document.descendants(element).filter(|&node| document.is_element(node)));
			for node in subtree {
				outcome.discarded.push(node);
				if document.has_attribute(node, &self.config.bindings.parent_id) {
					outcome.child_views_discarded.push(node);
				}
				lifecycle.on_discard(document, node);
			}
			detached.push(element);
		}
		outcome.components_discarded = unmounted_components(document, self.container, &self.config.bindings, &outcome.discarded);
		release(document, self.container, detached, &mut self.locked);
		self.reset_components(outcome)
	}

	/// Locks `element` until [`acknowledge`](`View::acknowledge`) is called with the returned ref or a later one.
	///
	/// Passes leave a locked element as it is and keep its most recent target instead.
	pub fn lock(&mut self, document: &mut Document, element: NodeId) -> u64 {
		self.next_ref += 1;
		document.set_attribute(element, &self.config.bindings.lock_ref, &self.next_ref.to_string());
		self.next_ref
	}

	/// Releases locks up to and including `lock_ref` and applies the targets stashed for them.
	#[instrument(skip(self, document, lifecycle), fields(view = %self.store.view_id()))]
	pub fn acknowledge<L: LifecycleHooks + ?Sized>(&mut self, document: &mut Document, lock_ref: u64, lifecycle: &mut L) -> PatchOutcome {
		let bindings = &self.config.bindings;
		let released = document.query_all(self.container, |document, node| {
			document
				.attribute(node, &bindings.lock_ref)
				.and_then(|value| value.parse::<u64>().ok())
				.map_or(false, |value| value <= lock_ref)
		});

		let mut outcome = PatchOutcome::default();
		for element in released {
			document.remove_attribute(element, &self.config.bindings.lock_ref);
			if let Some(target) = self.locked.remove(&element) {
				trace!(%element, "Applying stashed target.");
				outcome.extend(PatchCoordinator::new(document, self.container, &self.config, lifecycle, &mut self.locked).perform_unlocked(element, target));
			}
		}
		self.reset_components(outcome)
	}

	pub fn prune_components(&mut self, cids: impl IntoIterator<Item = Cid>) {
		self.store.prune_components(cids);
	}

	/// Drops queued diffs, outstanding transitions and stashed targets.
	pub fn destroy(&mut self, document: &mut Document) {
		if self.transitions.pending() > 0 {
			warn!(pending = self.transitions.pending(), "Destroying view with queued diffs.");
		}
		self.transitions.reset();
		for target in self.locked.drain().map(|(_, target)| target) {
			document.free(target);
		}
	}

	/// Resets the components that are no longer mounted, so they render in full if they come back.
	fn reset_components(&mut self, outcome: PatchOutcome) -> PatchOutcome {
		for &cid in &outcome.components_discarded {
			self.store.reset_component(cid);
		}
		outcome
	}
}
