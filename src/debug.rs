//! Consistency scans run after a pass in debug mode.

use crate::{
	config::{Bindings, UpdatePolicy},
	count_map::CountMap,
	dom::{Document, NodeId},
};
use tracing::{error, warn};

/// Element ids occurring more than once under `root`, with their counts.
///
/// Duplicate ids break keyed matching, so each one is also reported as an error.
pub fn duplicate_keys(document: &Document, root: NodeId) -> Vec<(String, usize)> {
	let mut counts = CountMap::<String>::new();
	for node in document.descendants(root) {
		if let Some(id) = document.attribute(node, "id").filter(|id| !id.is_empty()) {
			if counts.increment(id.to_owned()).is_err() {
				warn!("Stopped counting ids after saturation.");
				break;
			}
		}
	}

	let duplicates: Vec<(String, usize)> = counts.repeated().map(|(id, count)| (id.clone(), count)).collect();
	for (id, count) in &duplicates {
		error!("Multiple IDs detected: {} ({} occurrences). Ensure unique element ids.", id, count);
	}
	duplicates
}

/// Stream-inserted elements whose parent is not a stream container.
pub fn invalid_stream_inserts<'a>(document: &Document, root: NodeId, bindings: &Bindings, keys: impl IntoIterator<Item = &'a str>) -> Vec<NodeId> {
	let mut invalid = Vec::new();
	for key in keys {
		if let Some(element) = document.element_by_id(root, key) {
			let in_stream = document
				.parent(element)
				.and_then(|parent| document.attribute(parent, &bindings.update))
				.and_then(UpdatePolicy::parse)
				== Some(UpdatePolicy::Stream);
			if !in_stream {
				if cfg!(feature = "log-paths") {
					error!(
						"The stream container of element {:?} at {} must have the {}=\"stream\" attribute.",
						key,
						document.path(element),
						bindings.update
					);
				} else {
					error!(
						"The stream container of element {:?} must have the {}=\"stream\" attribute.",
						key, bindings.update
					);
				}
				invalid.push(element);
			}
		}
	}
	invalid
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::markup::parse_element;

	#[test]
	fn reports_each_duplicate_once() {
		let mut document = Document::new();
		let root = parse_element(&mut document, "<div><p id=\"a\"></p><p id=\"b\"></p><p id=\"a\"></p><p id=\"a\"></p></div>").unwrap();
		assert_eq!(duplicate_keys(&document, root), vec![("a".to_owned(), 3)]);
	}

	#[test]
	fn stream_parent_required() {
		let mut document = Document::new();
		let root = parse_element(&mut document, "<div><ul live-update=\"stream\"><li id=\"i-1\"></li></ul><p id=\"i-2\"></p></div>").unwrap();
		let invalid = invalid_stream_inserts(&document, root, &Bindings::default(), ["i-1", "i-2", "i-3"]);
		assert_eq!(invalid.len(), 1);
		assert_eq!(document.attribute(invalid[0], "id"), Some("i-2"));
	}
}
