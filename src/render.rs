//! Expansion of template nodes into markup.

use crate::{
	config::Bindings,
	markup::{escape_attribute, is_void_element},
	template::{Cid, ComponentTable, ListNode, Statics, StreamOp, TemplateNode, TemplatePool, TemplateValue},
};
use hashbrown::HashSet;
use std::rc::Rc;
use thiserror::Error;
use tracing::{error, trace_span, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
	#[error("fragment has no statics")]
	MissingStatics,
	#[error("dynamic slot {index} is missing")]
	MissingDynamic { index: usize },
	#[error("template {index} is not part of the template pool")]
	UnknownTemplate { index: usize },
	#[error("rendered root contains no element")]
	MissingRoot,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderOutput {
	pub markup: String,
	/// Stream operations consumed by this render, in document order.
	pub streams: Vec<StreamOp>,
}

/// Renders a single node without a component table, using the default bindings.
pub fn render(node: &mut TemplateNode, change_tracking: bool) -> Result<RenderOutput, RenderError> {
	let mut components = ComponentTable::new();
	let mut next_fingerprint = 0;
	let bindings = Bindings::default();
	let mut renderer = FragmentRenderer::new(&mut components, "", &mut next_fingerprint, &bindings);
	let markup = renderer.render(node, change_tracking)?;
	Ok(RenderOutput {
		markup,
		streams: renderer.finish(),
	})
}

/// One render pass over a view's template.
///
/// Roots rendered under change tracking get a fingerprint the first time around.
/// Later renders of an untouched root emit only a skip placeholder.
pub struct FragmentRenderer<'a> {
	components: &'a mut ComponentTable,
	view_id: &'a str,
	next_fingerprint: &'a mut u64,
	bindings: &'a Bindings,
	only_cids: Option<HashSet<Cid>>,
	emitted: HashSet<String>,
	streams: Vec<StreamOp>,
}

impl<'a> FragmentRenderer<'a> {
	pub fn new(components: &'a mut ComponentTable, view_id: &'a str, next_fingerprint: &'a mut u64, bindings: &'a Bindings) -> Self {
		Self {
			components,
			view_id,
			next_fingerprint,
			bindings,
			only_cids: None,
			emitted: HashSet::new(),
			streams: Vec::new(),
		}
	}

	/// Renders every component outside `cids` as a skip placeholder and every component inside it fully.
	#[must_use]
	pub fn only_cids(mut self, cids: impl IntoIterator<Item = Cid>) -> Self {
		self.only_cids = Some(cids.into_iter().collect());
		self
	}

	pub fn render(&mut self, node: &mut TemplateNode, change_tracking: bool) -> Result<String, RenderError> {
		let mut out = String::new();
		self.render_node(node, None, change_tracking, &[], false, &mut out)?;
		Ok(out)
	}

	/// Renders one component as if it were referenced from the view's template.
	pub fn render_component(&mut self, cid: Cid) -> Result<String, RenderError> {
		let mut out = String::new();
		self.component(cid, &mut out)?;
		Ok(out)
	}

	#[must_use]
	pub fn finish(self) -> Vec<StreamOp> {
		self.streams
	}

	fn fresh_fingerprint(&mut self) -> String {
		*self.next_fingerprint += 1;
		format!("m{}-{}", self.next_fingerprint, self.view_id)
	}

	fn render_node(
		&mut self,
		node: &mut TemplateNode,
		inherited: Option<&TemplatePool>,
		change_tracking: bool,
		root_attributes: &[(&str, &str)],
		force_root: bool,
		out: &mut String,
	) -> Result<(), RenderError> {
		let templates = inherited.cloned().or_else(|| node.templates.clone());
		let statics = resolve_statics(node.statics.as_ref(), templates.as_ref())?;
		let is_root = node.root || force_root;

		if change_tracking && is_root && node.fingerprint.is_none() {
			node.needs_full_render = true;
			node.fingerprint = Some(self.fresh_fingerprint());
		}

		let mut body = String::new();
		let (first, rest) = statics.split_first().ok_or(RenderError::MissingStatics)?;
		body.push_str(first);
		for (index, segment) in rest.iter().enumerate() {
			let value = node.dynamics.get_mut(&index).ok_or(RenderError::MissingDynamic { index })?;
			self.render_value(value, templates.as_ref(), change_tracking, &mut body)?;
			body.push_str(segment);
		}

		if !is_root {
			out.push_str(&body);
			return Ok(());
		}

		let bindings = self.bindings;
		let fingerprint = node.fingerprint.clone();
		let mut skip = false;
		let mut attributes: Vec<(&str, &str)> = Vec::with_capacity(root_attributes.len() + 2);
		if change_tracking || fingerprint.is_some() {
			skip = change_tracking && !node.needs_full_render;
			if let Some(fingerprint) = &fingerprint {
				attributes.push((bindings.fingerprint.as_str(), fingerprint.as_str()));
			}
		}
		attributes.extend_from_slice(root_attributes);
		if let Some(fingerprint) = &fingerprint {
			if !self.emitted.insert(fingerprint.clone()) {
				warn!("Root {} was rendered more than once in the same pass. Replacing it instead of skipping or morphing.", fingerprint);
				skip = false;
				attributes.push((bindings.replace.as_str(), ""));
			}
		}
		if skip {
			attributes.push((bindings.skip.as_str(), ""));
		}

		let root = modify_root(&body, &attributes, skip)?;
		node.needs_full_render = false;
		out.push_str(&root.before);
		out.push_str(&root.element);
		out.push_str(&root.after);
		Ok(())
	}

	fn render_value(&mut self, value: &mut TemplateValue, templates: Option<&TemplatePool>, change_tracking: bool, out: &mut String) -> Result<(), RenderError> {
		match value {
			TemplateValue::Scalar(text) => out.push_str(text),
			TemplateValue::Fragment(node) => self.render_node(node, templates, change_tracking, &[], false, out)?,
			TemplateValue::ComponentRef(cid) => self.component(*cid, out)?,
			TemplateValue::List(list) => self.render_list(list, templates, out)?,
		}
		Ok(())
	}

	fn render_list(&mut self, list: &mut ListNode, inherited: Option<&TemplatePool>, out: &mut String) -> Result<(), RenderError> {
		let templates = inherited.cloned().or_else(|| list.templates.clone());
		let statics = resolve_statics(list.statics.as_ref(), templates.as_ref())?;
		let (first, rest) = statics.split_first().ok_or(RenderError::MissingStatics)?;
		for row in &mut list.rows {
			out.push_str(first);
			for (index, segment) in rest.iter().enumerate() {
				let value = row.get_mut(index).ok_or(RenderError::MissingDynamic { index })?;
				self.render_value(value, templates.as_ref(), false, out)?;
				out.push_str(segment);
			}
		}

		let consumed = list
			.stream
			.as_ref()
			.map_or(false, |stream| !list.rows.is_empty() || !stream.delete_ids.is_empty() || stream.reset);
		if consumed {
			if let Some(stream) = list.stream.take() {
				self.streams.push(stream);
			}
			list.rows.clear();
		}
		Ok(())
	}

	fn component(&mut self, cid: Cid, out: &mut String) -> Result<(), RenderError> {
		let _span = trace_span!("component", cid).entered();
		let mut entry = match self.components.remove(&cid) {
			Some(entry) => entry,
			None => {
				error!("No component for CID {}. Rendering it as empty.", cid);
				return Ok(());
			}
		};

		let skip = self.only_cids.as_ref().map_or(false, |only| !only.contains(&cid));
		entry.node.needs_full_render = !skip;
		entry.node.fingerprint = Some(format!("c{}-{}", cid, self.view_id));
		let change_tracking = !entry.was_reset;
		let cid_text = cid.to_string();
		let bindings = self.bindings;
		let result = self.render_node(&mut entry.node, None, change_tracking, &[(bindings.component.as_str(), cid_text.as_str())], true, out);
		entry.was_reset = false;
		self.components.insert(cid, entry);
		result
	}
}

fn resolve_statics(statics: Option<&Statics>, templates: Option<&TemplatePool>) -> Result<Rc<[String]>, RenderError> {
	match statics {
		None => Err(RenderError::MissingStatics),
		Some(Statics::Literal(segments)) => Ok(Rc::clone(segments)),
		Some(Statics::Template(index)) => templates
			.and_then(|pool| pool.get(*index))
			.cloned()
			.ok_or(RenderError::UnknownTemplate { index: *index }),
	}
}

/// A rendered root split around its single top-level element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModifiedRoot {
	/// Whitespace and comments ahead of the element.
	pub before: String,
	pub element: String,
	/// Whitespace and comments behind the element.
	pub after: String,
}

/// Injects `attributes` right after the root element's tag name.
///
/// With `clear_inner`, the element's body is dropped and only its `id` (if any) and the new attributes are kept.
/// Attributes with an empty value are written without one.
pub fn modify_root(html: &str, attributes: &[(&str, &str)], clear_inner: bool) -> Result<ModifiedRoot, RenderError> {
	let start = skip_leading_comments(html);
	let after_tag_open = start + 1;
	if html[start..].chars().next() != Some('<') {
		return Err(RenderError::MissingRoot);
	}
	let name_length = html[after_tag_open..]
		.find(|c: char| c.is_ascii_whitespace() || c == '>' || c == '/')
		.unwrap_or(html.len() - after_tag_open);
	if name_length == 0 {
		return Err(RenderError::MissingRoot);
	}
	let name_end = after_tag_open + name_length;
	let tag_name = &html[after_tag_open..name_end];

	let end = trim_trailing_comments(html);
	if end <= name_end || !html[..end].ends_with('>') {
		return Err(RenderError::MissingRoot);
	}

	let mut injected = String::new();
	for (name, value) in attributes {
		injected.push(' ');
		injected.push_str(name);
		if !value.is_empty() {
			injected.push_str("=\"");
			escape_attribute(value, &mut injected);
			injected.push('"');
		}
	}

	let element = if clear_inner {
		let id = opening_tag_end(html, name_end)
			.and_then(|tag_end| attribute_value(&html[name_end..tag_end], "id"))
			.map(|id| format!(" id=\"{}\"", id))
			.unwrap_or_default();
		if is_void_element(&tag_name.to_ascii_lowercase()) {
			format!("<{}{}{}/>", tag_name, id, injected)
		} else {
			format!("<{}{}{}></{}>", tag_name, id, injected, tag_name)
		}
	} else {
		format!("<{}{}{}", tag_name, injected, &html[name_end..end])
	};

	Ok(ModifiedRoot {
		before: html[..start].to_owned(),
		element,
		after: html[end..].to_owned(),
	})
}

fn skip_leading_comments(html: &str) -> usize {
	let mut position = 0;
	loop {
		let trimmed = html[position..].trim_start();
		position = html.len() - trimmed.len();
		if !trimmed.starts_with("<!--") {
			return position;
		}
		match trimmed.find("-->") {
			Some(close) => position += close + 3,
			None => return position,
		}
	}
}

fn trim_trailing_comments(html: &str) -> usize {
	let mut end = html.len();
	loop {
		let trimmed = html[..end].trim_end();
		if !trimmed.ends_with("-->") {
			return trimmed.len();
		}
		match trimmed.rfind("<!--") {
			Some(open) => end = open,
			None => return trimmed.len(),
		}
	}
}

fn opening_tag_end(html: &str, from: usize) -> Option<usize> {
	let mut quote = None;
	for (offset, c) in html[from..].char_indices() {
		match (quote, c) {
			(None, '"' | '\'') => quote = Some(c),
			(Some(open), _) if open == c => quote = None,
			(None, '>') => return Some(from + offset),
			_ => (),
		}
	}
	None
}

/// Finds a quoted, unquoted or bare attribute in the attribute section of an opening tag.
fn attribute_value<'a>(tag: &'a str, wanted: &str) -> Option<&'a str> {
	let bytes = tag.as_bytes();
	let mut i = 0;
	while i < bytes.len() {
		while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
			i += 1;
		}
		let name_start = i;
		while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'=' && bytes[i] != b'/' {
			i += 1;
		}
		let name = &tag[name_start..i];
		if name.is_empty() {
			break;
		}
		while i < bytes.len() && bytes[i].is_ascii_whitespace() {
			i += 1;
		}
		let value = if bytes.get(i) == Some(&b'=') {
			i += 1;
			while i < bytes.len() && bytes[i].is_ascii_whitespace() {
				i += 1;
			}
			match bytes.get(i) {
				Some(&quote @ (b'"' | b'\'')) => {
					let value_start = i + 1;
					let value_end = tag[value_start..].find(quote as char).map_or(tag.len(), |length| value_start + length);
					i = (value_end + 1).min(tag.len());
					&tag[value_start..value_end]
				}
				_ => {
					let value_start = i;
					while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
						i += 1;
					}
					&tag[value_start..i]
				}
			}
		} else {
			""
		};
		if name.eq_ignore_ascii_case(wanted) {
			return Some(value);
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn injects_after_tag_name() {
		let root = modify_root("<div class=\"a\">x</div>", &[("data-live-id", "m1-v")], false).unwrap();
		assert_eq!(root.element, "<div data-live-id=\"m1-v\" class=\"a\">x</div>");
		assert_eq!(root.before, "");
		assert_eq!(root.after, "");
	}

	#[test]
	fn skip_keeps_id_and_comments() {
		let root = modify_root("\n<!-- a -->\n<section id=\"s\" class=\"c\">body</section>\n<!-- b -->", &[("data-live-skip", "")], true).unwrap();
		assert_eq!(root.before, "\n<!-- a -->\n");
		assert_eq!(root.element, "<section id=\"s\" data-live-skip></section>");
		assert_eq!(root.after, "\n<!-- b -->");
	}

	#[test]
	fn void_root() {
		let root = modify_root("<input value=\"1\">", &[("data-live-skip", "")], true).unwrap();
		assert_eq!(root.element, "<input data-live-skip/>");
	}

	#[test]
	fn text_only_is_not_a_root() {
		assert_eq!(modify_root("just text", &[], false), Err(RenderError::MissingRoot));
		assert_eq!(modify_root("<!-- only -->", &[], false), Err(RenderError::MissingRoot));
	}

	#[test]
	fn attribute_lookup() {
		assert_eq!(attribute_value(" class=\"a b\" id='x' hidden", "id"), Some("x"));
		assert_eq!(attribute_value(" data-id=\"y\" id=z", "id"), Some("z"));
		assert_eq!(attribute_value(" data-id=\"y\"", "id"), None);
	}
}
