//! Attribute names the engine reads and writes, and per-view patch settings.

/// Names of the marker attributes and bindings, all derived from one prefix.
///
/// With the default prefix `live`, the fingerprint attribute is `data-live-id`
/// and the update policy binding is `live-update`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bindings {
	/// Identity tag of a rendered root.
	pub fingerprint: String,
	/// Marks a rendered root as provably unchanged.
	pub skip: String,
	/// Forces a rendered root to be recreated instead of morphed.
	pub replace: String,
	/// Carries the component id on a component's root element.
	pub component: String,
	/// Children of append/prepend containers that may be removed on join.
	pub prune: String,
	/// Stream reference of an element inserted through a stream.
	pub stream_ref: String,
	/// Locks an element while a request it triggered is in flight.
	pub lock_ref: String,
	/// Session of a (child) view container.
	pub session: String,
	/// Static token of a child view, owned by the child.
	pub static_token: String,
	/// Marks an element as a child view boundary.
	pub parent_id: String,
	/// Root view id of a child view.
	pub root_id: String,
	/// Update policy binding (`ignore`, `stream`, `append`, `prepend`, `replace`).
	pub update: String,
	/// Elements carrying this binding are removed only after their removal transition completes.
	pub remove: String,
}

impl Bindings {
	#[must_use]
	pub fn with_prefix(prefix: &str) -> Self {
		let data = |name: &str| format!("data-{}-{}", prefix, name);
		Self {
			fingerprint: data("id"),
			skip: data("skip"),
			replace: data("replace"),
			component: data("component"),
			prune: data("prune"),
			stream_ref: data("stream"),
			lock_ref: data("ref"),
			session: data("session"),
			static_token: data("static"),
			parent_id: data("parent-id"),
			root_id: data("root-id"),
			update: format!("{}-update", prefix),
			remove: format!("{}-remove", prefix),
		}
	}
}

impl Default for Bindings {
	fn default() -> Self {
		Self::with_prefix("live")
	}
}

/// Values of the update policy binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdatePolicy {
	Replace,
	Ignore,
	Stream,
	Append,
	Prepend,
}

impl UpdatePolicy {
	#[must_use]
	pub fn parse(value: &str) -> Option<Self> {
		Some(match value {
			"replace" => Self::Replace,
			"ignore" => Self::Ignore,
			"stream" => Self::Stream,
			"append" => Self::Append,
			"prepend" => Self::Prepend,
			_ => return None,
		})
	}
}

#[derive(Clone, Debug, Default)]
pub struct PatchConfig {
	pub bindings: Bindings,
	/// Runs the duplicate key scan and stream insert validation after each pass.
	pub debug: bool,
}
