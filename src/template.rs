//! Typed representation of rendered templates and their conversion from diff payloads.
//!
//! Payload keys are single characters to keep diffs compact:
//!
//! | key      | meaning                                                           |
//! |----------|-------------------------------------------------------------------|
//! | `s`      | statics: literal segments, or an index into the template pool     |
//! | `r`      | marks the fragment as a renderable root                           |
//! | `c`      | component table, keyed by decimal component id                    |
//! | `0`..`N` | dynamic slots                                                     |
//! | `d`      | rows of a comprehension                                           |
//! | `p`      | template pool shared by nested statics                            |
//! | `stream` | `[ref, [[key, at, limit], …], [deleted ids…], reset]`             |

use hashbrown::HashMap;
use serde_json::{Map, Value};
use std::rc::Rc;
use tracing::warn;

pub(crate) const STATICS: &str = "s";
pub(crate) const ROOT: &str = "r";
pub(crate) const COMPONENTS: &str = "c";
pub(crate) const DYNAMICS: &str = "d";
pub(crate) const TEMPLATES: &str = "p";
pub(crate) const STREAM: &str = "stream";

/// Component id.
pub type Cid = u32;

pub type TemplatePool = Rc<[Rc<[String]>]>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Statics {
	/// Shared by reference between every fragment cloned from the same source.
	Literal(Rc<[String]>),
	/// Index into the nearest template pool.
	Template(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub enum TemplateValue {
	Scalar(String),
	Fragment(TemplateNode),
	ComponentRef(Cid),
	List(ListNode),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TemplateNode {
	/// [`None`] only for a malformed diff that never supplied statics. Rendering such a node fails.
	pub statics: Option<Statics>,
	pub dynamics: HashMap<usize, TemplateValue>,
	pub root: bool,
	pub fingerprint: Option<String>,
	pub needs_full_render: bool,
	pub templates: Option<TemplatePool>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListNode {
	pub statics: Option<Statics>,
	pub rows: Vec<Vec<TemplateValue>>,
	pub stream: Option<StreamOp>,
	pub templates: Option<TemplatePool>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamInsert {
	pub key: String,
	/// `-1` appends, `0` prepends, anything else is an element index.
	pub at: i64,
	/// Negative keeps the last `-limit` children, positive the first `limit`.
	pub limit: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOp {
	pub reference: String,
	pub inserts: Vec<StreamInsert>,
	pub delete_ids: Vec<String>,
	pub reset: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComponentEntry {
	pub node: TemplateNode,
	/// Set when the component was detached from the tree. Its next render disables change tracking.
	pub was_reset: bool,
}

pub type ComponentTable = HashMap<Cid, ComponentEntry>;

pub(crate) fn truthy(value: &Value) -> bool {
	match value {
		Value::Null => false,
		Value::Bool(b) => *b,
		Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
		Value::String(s) => !s.is_empty(),
		Value::Array(_) | Value::Object(_) => true,
	}
}

fn json_text(value: Value) -> String {
	match value {
		Value::String(s) => s,
		Value::Null => String::new(),
		other => other.to_string(),
	}
}

pub(crate) fn parse_statics(value: Value) -> Option<Statics> {
	match value {
		Value::Array(segments) => Some(Statics::Literal(segments.into_iter().map(json_text).collect())),
		Value::Number(n) => match n.as_u64() {
			Some(index) => Some(Statics::Template(index as usize)),
			None => {
				warn!("Ignoring statics reference {} outside a component table.", n);
				None
			}
		},
		other => {
			warn!("Ignoring malformed statics: {}", other);
			None
		}
	}
}

pub(crate) fn parse_pool(value: Value) -> Option<TemplatePool> {
	match value {
		Value::Object(templates) => {
			let mut indexed: Vec<(usize, Rc<[String]>)> = templates
				.into_iter()
				.filter_map(|(key, template)| match (key.parse(), template) {
					(Ok(index), Value::Array(segments)) => Some((index, segments.into_iter().map(json_text).collect())),
					(_, _) => None,
				})
				.collect();
			indexed.sort_by_key(|(index, _)| *index);
			let length = indexed.last().map_or(0, |(index, _)| index + 1);
			let mut pool: Vec<Rc<[String]>> = vec![Rc::from(Vec::new()); length];
			for (index, template) in indexed {
				pool[index] = template;
			}
			Some(pool.into())
		}
		Value::Array(templates) => Some(
			templates
				.into_iter()
				.map(|template| match template {
					Value::Array(segments) => segments.into_iter().map(json_text).collect(),
					_ => Rc::from(Vec::new()),
				})
				.collect(),
		),
		_ => None,
	}
}

pub(crate) fn parse_stream(value: Value) -> Option<StreamOp> {
	let mut parts = match value {
		Value::Array(parts) => parts.into_iter(),
		other => {
			warn!("Ignoring malformed stream descriptor: {}", other);
			return None;
		}
	};
	let reference = json_text(parts.next()?);
	let inserts = match parts.next() {
		Some(Value::Array(inserts)) => inserts
			.into_iter()
			.filter_map(|insert| match insert {
				Value::Array(fields) => {
					let mut fields = fields.into_iter();
					let key = json_text(fields.next()?);
					let at = fields.next().and_then(|at| at.as_i64()).unwrap_or(-1);
					let limit = fields.next().and_then(|limit| limit.as_i64());
					Some(StreamInsert { key, at, limit })
				}
				_ => None,
			})
			.collect(),
		_ => Vec::new(),
	};
	let delete_ids = match parts.next() {
		Some(Value::Array(ids)) => ids.into_iter().map(json_text).collect(),
		_ => Vec::new(),
	};
	let reset = parts.next().map_or(false, |reset| truthy(&reset));
	Some(StreamOp { reference, inserts, delete_ids, reset })
}

impl TemplateValue {
	#[must_use]
	pub fn from_json(value: Value) -> Self {
		match value {
			Value::String(s) => Self::Scalar(s),
			Value::Number(n) => match n.as_u64().and_then(|cid| Cid::try_from(cid).ok()) {
				Some(cid) => Self::ComponentRef(cid),
				None => Self::Scalar(n.to_string()),
			},
			Value::Bool(b) => Self::Scalar(b.to_string()),
			Value::Null => Self::Scalar(String::new()),
			Value::Array(_) => {
				warn!("Dynamic slot holds an array, which isn't a renderable value. Rendering it as empty.");
				Self::Scalar(String::new())
			}
			Value::Object(map) => {
				if map.contains_key(DYNAMICS) {
					Self::List(ListNode::from_json(map))
				} else {
					Self::Fragment(TemplateNode::from_json(map))
				}
			}
		}
	}

	/// Merges a statics-free diff into this value in place, or replaces the value if it can't hold one.
	pub(crate) fn merge(&mut self, diff: Map<String, Value>) {
		match self {
			Self::Fragment(node) => node.merge(diff),
			Self::List(list) => list.merge(diff),
			Self::Scalar(_) | Self::ComponentRef(_) => *self = Self::from_json(Value::Object(diff)),
		}
	}
}

impl TemplateNode {
	#[must_use]
	pub fn from_json(map: Map<String, Value>) -> Self {
		let mut node = Self::default();
		node.merge(map);
		node
	}

	/// Builds a non-root fragment from literal statics and scalar dynamics.
	#[must_use]
	pub fn literal<S: Into<String>>(statics: impl IntoIterator<Item = S>, dynamics: impl IntoIterator<Item = TemplateValue>) -> Self {
		Self {
			statics: Some(Statics::Literal(statics.into_iter().map(Into::into).collect())),
			dynamics: dynamics.into_iter().enumerate().collect(),
			..Self::default()
		}
	}

	/// Mutable merge: statics-free nested diffs merge deeper, everything else overwrites.
	/// A root touched by a merge is flagged for a full render.
	pub(crate) fn merge(&mut self, diff: Map<String, Value>) {
		for (key, value) in diff {
			match key.as_str() {
				STATICS => self.statics = parse_statics(value),
				ROOT => self.root = truthy(&value),
				TEMPLATES => self.templates = parse_pool(value),
				COMPONENTS => warn!("Ignoring nested component table."),
				_ => match key.parse::<usize>() {
					Ok(index) => match (self.dynamics.get_mut(&index), value) {
						(Some(existing), Value::Object(nested)) if !nested.contains_key(STATICS) => existing.merge(nested),
						(_, value) => {
							self.dynamics.insert(index, TemplateValue::from_json(value));
						}
					},
					Err(_) => warn!("Ignoring unknown fragment key {:?}.", key),
				},
			}
		}
		if self.root {
			self.needs_full_render = true;
		}
	}

	/// Prepares a deep copy for a new owner.
	///
	/// With `prune`, fingerprints and full-render flags are dropped throughout so the owner assigns fresh ones.
	/// Otherwise every root in the copy is flagged for a full render.
	pub(crate) fn rebrand(&mut self, prune: bool) {
		if prune {
			self.fingerprint = None;
			self.needs_full_render = false;
		} else if self.root {
			self.needs_full_render = true;
		}
		for value in self.dynamics.values_mut() {
			if let TemplateValue::Fragment(node) = value {
				node.rebrand(prune);
			}
		}
	}

	/// Iterates over nested fragments, not descending into lists or components.
	pub fn fragments(&self) -> impl Iterator<Item = &TemplateNode> {
		self.dynamics.values().filter_map(|value| match value {
			TemplateValue::Fragment(node) => Some(node),
			_ => None,
		})
	}
}

impl ListNode {
	#[must_use]
	pub fn from_json(map: Map<String, Value>) -> Self {
		let mut list = Self::default();
		list.merge(map);
		list
	}

	pub(crate) fn merge(&mut self, diff: Map<String, Value>) {
		for (key, value) in diff {
			match key.as_str() {
				STATICS => self.statics = parse_statics(value),
				TEMPLATES => self.templates = parse_pool(value),
				STREAM => self.stream = parse_stream(value),
				DYNAMICS => {
					self.rows = match value {
						Value::Array(rows) => rows
							.into_iter()
							.map(|row| match row {
								Value::Array(values) => values.into_iter().map(TemplateValue::from_json).collect(),
								other => vec![TemplateValue::from_json(other)],
							})
							.collect(),
						other => {
							warn!("Ignoring malformed comprehension rows: {}", other);
							Vec::new()
						}
					}
				}
				_ => warn!("Ignoring unknown comprehension key {:?}.", key),
			}
		}
	}
}
