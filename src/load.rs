//! Adopting an existing browser subtree, so a view mounted in a real page can be patched.

use crate::dom::{Document, NodeId};
use thiserror::Error;
use tracing::{instrument, trace, warn};
use wasm_bindgen::JsCast;
use web_sys::{Attr, Comment, Element, HtmlInputElement, HtmlTextAreaElement, NamedNodeMap, Node, NodeList, Text};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
	#[error("node list shrank while loading: item {index} of {length} is missing")]
	MissingChild { index: u32, length: u32 },
	#[error("attribute map shrank while loading: item {index} of {length} is missing")]
	MissingAttribute { index: u32, length: u32 },
}

/// Mirrors `element` and its subtree into a new detached element of `document`.
///
/// Live form state (`value` and `checked`) is copied along with the attributes.
#[instrument(skip_all)]
pub fn load_element(document: &mut Document, element: &Element) -> Result<NodeId, LoadError> {
	let loaded = document.create_element(&element.local_name());
	load_attributes(document, loaded, &element.attributes())?;

	if let Some(input) = element.dyn_ref::<HtmlInputElement>() {
		document.set_value(loaded, &input.value());
		document.set_checked(loaded, input.checked());
	} else if let Some(textarea) = element.dyn_ref::<HtmlTextAreaElement>() {
		document.set_value(loaded, &textarea.value());
	}

	let node: &Node = element.as_ref();
	load_child_nodes(document, loaded, &node.child_nodes())?;
	Ok(loaded)
}

/// Appends mirrors of `child_nodes` to `parent`. Node types the engine doesn't model are left out.
pub fn load_child_nodes(document: &mut Document, parent: NodeId, child_nodes: &NodeList) -> Result<(), LoadError> {
	let length = child_nodes.length();
	for index in 0..length {
		let child = child_nodes.item(index).ok_or(LoadError::MissingChild { index, length })?;
		let loaded = if let Some(element) = child.dyn_ref::<Element>() {
			load_element(document, element)?
		} else if let Some(text) = child.dyn_ref::<Text>() {
			document.create_text(&text.data())
		} else if let Some(comment) = child.dyn_ref::<Comment>() {
			document.create_comment(&comment.data())
		} else {
			warn!("Skipping unrecognised child node of type {}.", child.node_type());
			continue;
		};
		document.append_child(parent, loaded);
	}
	trace!(parent = %parent, length, "Loaded child nodes.");
	Ok(())
}

pub fn load_attributes(document: &mut Document, element: NodeId, attributes: &NamedNodeMap) -> Result<(), LoadError> {
	let length = attributes.length();
	for index in 0..length {
		let attribute: Attr = attributes.item(index).ok_or(LoadError::MissingAttribute { index, length })?;
		document.set_attribute(element, &attribute.name(), &attribute.value());
	}
	Ok(())
}
