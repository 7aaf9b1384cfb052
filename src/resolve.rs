//! Resolution of incoming component entries that share statics with other entries.

use crate::template::{Cid, ComponentTable, TemplateNode, STATICS};
use hashbrown::{HashMap, HashSet};
use serde_json::{Map, Value};
use tracing::error;

/// Incoming component entries, keyed by cid.
pub type IncomingComponents = HashMap<Cid, Map<String, Value>>;

/// Resolves the entries of one component table diff against the stored table.
///
/// An entry whose statics slot is an integer borrows the statics of another component:
/// a positive reference names an entry of the same payload, a negative one an already stored entry.
/// Each cid is resolved at most once per resolver, so long or converging reference chains stay linear.
pub struct ComponentResolver<'a> {
	stored: &'a ComponentTable,
	incoming: &'a IncomingComponents,
	cache: HashMap<Cid, TemplateNode>,
	failed: HashSet<Cid>,
	resolutions: usize,
}

fn statics_reference(entry: &Map<String, Value>) -> Option<i64> {
	entry.get(STATICS).and_then(Value::as_i64)
}

impl<'a> ComponentResolver<'a> {
	#[must_use]
	pub fn new(stored: &'a ComponentTable, incoming: &'a IncomingComponents) -> Self {
		Self {
			stored,
			incoming,
			cache: HashMap::new(),
			failed: HashSet::new(),
			resolutions: 0,
		}
	}

	/// Resolves `cid`, following positive references iteratively.
	///
	/// Returns [`None`] (after logging an error) if the entry is missing, references a missing source or is part of a reference cycle.
	pub fn resolve(&mut self, cid: Cid) -> Option<&TemplateNode> {
		let mut chain = Vec::new();
		let mut visiting = HashSet::new();
		let mut current = cid;
		loop {
			if self.cache.contains_key(&current) || self.failed.contains(&current) {
				break;
			}
			if !visiting.insert(current) {
				error!("Component {} is part of a statics reference cycle.", current);
				self.failed.extend(chain);
				return None;
			}
			chain.push(current);
			match self.incoming.get(&current).and_then(statics_reference) {
				Some(source) if source > 0 => match Cid::try_from(source) {
					Ok(source) => current = source,
					Err(_) => break,
				},
				_ => break,
			}
		}

		for &link in chain.iter().rev() {
			self.resolve_one(link);
		}
		self.cache.get(&cid)
	}

	/// Number of entries actually built, as opposed to served from the memo.
	#[must_use]
	pub fn resolutions(&self) -> usize {
		self.resolutions
	}

	#[must_use]
	pub fn into_resolved(self) -> HashMap<Cid, TemplateNode> {
		self.cache
	}

	fn resolve_one(&mut self, cid: Cid) {
		self.resolutions += 1;
		let resolved = match self.incoming.get(&cid) {
			Some(entry) => self.build(cid, entry),
			None => {
				error!("Component {} is referenced for its statics but not part of the payload.", cid);
				None
			}
		};
		match resolved {
			Some(node) => {
				self.cache.insert(cid, node);
			}
			None => {
				self.failed.insert(cid);
			}
		}
	}

	fn build(&self, cid: Cid, entry: &Map<String, Value>) -> Option<TemplateNode> {
		if let Some(source) = statics_reference(entry) {
			let template = Cid::try_from(source.unsigned_abs()).ok().and_then(|source_cid| {
				if source > 0 {
					self.cache.get(&source_cid)
				} else {
					self.stored.get(&source_cid).map(|stored| &stored.node)
				}
			});
			let template = match template {
				Some(template) => template,
				None => {
					error!("Component {} borrows statics from missing component {}.", cid, source);
					return None;
				}
			};
			let mut diff = entry.clone();
			diff.remove(STATICS);
			let mut node = template.clone();
			node.merge(diff);
			node.rebrand(true);
			return Some(node);
		}

		match self.stored.get(&cid) {
			Some(prior) if !entry.contains_key(STATICS) => {
				let mut node = prior.node.clone();
				node.merge(entry.clone());
				node.rebrand(false);
				Some(node)
			}
			_ => Some(TemplateNode::from_json(entry.clone())),
		}
	}
}
