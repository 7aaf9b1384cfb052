//! Parsing rendered markup into detached [`Document`] nodes, and serializing nodes back.
//!
//! The parser is strict about structure: a closing tag that doesn't match the innermost open element,
//! or an element left open at the end of input, is a [`MarkupError`].
//! Parsing never touches attached nodes, so a failed parse leaves the live tree exactly as it was.

use crate::dom::{Document, NodeId, NodeType};
use thiserror::Error;
use tracing::{instrument, trace};

/// Elements that never have content or a closing tag.
pub const VOID_ELEMENTS: &[&str] = &["area", "base", "br", "col", "embed", "hr", "img", "input", "keygen", "link", "meta", "param", "source", "track", "wbr"];

/// Elements whose content is taken verbatim up to their closing tag.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

#[must_use]
pub fn is_void_element(name: &str) -> bool {
	VOID_ELEMENTS.iter().any(|void| void.eq_ignore_ascii_case(name))
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MarkupError {
	#[error("closing tag </{found}> at byte {offset} doesn't match open <{expected}>")]
	MismatchedClosingTag { expected: String, found: String, offset: usize },
	#[error("closing tag </{found}> at byte {offset} has no open element")]
	UnexpectedClosingTag { found: String, offset: usize },
	#[error("<{name}> is never closed")]
	UnclosedElement { name: String },
	#[error("unterminated {what} starting at byte {offset}")]
	Unterminated { what: &'static str, offset: usize },
	#[error("expected a single root element but found {count}")]
	RootCount { count: usize },
}

/// Parses `markup` into a new detached fragment of `document`.
#[instrument(skip(document, markup), fields(markup.len = markup.len()))]
pub fn parse_fragment(document: &mut Document, markup: &str) -> Result<NodeId, MarkupError> {
	#[cfg(feature = "dangerous-logging")]
	trace!(markup, "Parsing fragment.");

	let fragment = document.create_fragment();
	if let Err(error) = (Parser { document, input: markup, position: 0, root: fragment, open: Vec::new() }.run()) {
		document.free(fragment);
		return Err(error);
	}
	trace!("Parsed {} top-level node(s).", document.children(fragment).count());
	Ok(fragment)
}

/// Parses `markup` that must contain exactly one element at its top level, ignoring surrounding whitespace and comments.
pub fn parse_element(document: &mut Document, markup: &str) -> Result<NodeId, MarkupError> {
	let fragment = parse_fragment(document, markup)?;
	let elements = document.element_children(fragment);
	let result = match elements.as_slice() {
		[element] => {
			document.remove(*element);
			Ok(*element)
		}
		_ => Err(MarkupError::RootCount { count: elements.len() }),
	};
	document.free(fragment);
	result
}

struct Parser<'a> {
	document: &'a mut Document,
	input: &'a str,
	position: usize,
	root: NodeId,
	open: Vec<NodeId>,
}

impl<'a> Parser<'a> {
	fn rest(&self) -> &'a str {
		let input: &'a str = self.input;
		&input[self.position..]
	}

	fn current(&self) -> NodeId {
		self.open.last().copied().unwrap_or(self.root)
	}

	fn run(mut self) -> Result<(), MarkupError> {
		while self.position < self.input.len() {
			let rest = self.rest();
			if rest.starts_with("<!--") {
				self.comment()?;
			} else if rest.starts_with("</") {
				self.closing_tag()?;
			} else if rest.starts_with("<!") || rest.starts_with("<?") {
				// Doctype or processing instruction: dropped.
				let start = self.position;
				let end = rest.find('>').ok_or(MarkupError::Unterminated { what: "declaration", offset: start })?;
				self.position += end + 1;
			} else if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
				self.opening_tag()?;
			} else {
				self.text();
			}
		}

		if let Some(&unclosed) = self.open.last() {
			let name = self.document.tag_name(unclosed).unwrap_or_default().to_owned();
			return Err(MarkupError::UnclosedElement { name });
		}
		Ok(())
	}

	fn text(&mut self) {
		let rest = self.rest();
		// Skip the first character so that a stray '<' becomes text.
		let end = rest.char_indices().skip(1).find(|&(_, c)| c == '<').map_or(rest.len(), |(i, _)| i);
		let text = decode_entities(&rest[..end]);
		self.position += end;
		self.append_text(&text);
	}

	fn append_text(&mut self, text: &str) {
		if text.is_empty() {
			return;
		}
		let parent = self.current();
		if let Some(last) = self.document.last_child(parent) {
			if self.document.node_type(last) == NodeType::Text {
				let mut merged = self.document.text(last).unwrap_or_default().to_owned();
				merged.push_str(text);
				self.document.set_text(last, &merged);
				return;
			}
		}
		let node = self.document.create_text(text);
		self.document.append_child(parent, node);
	}

	fn comment(&mut self) -> Result<(), MarkupError> {
		let start = self.position;
		let body = &self.rest()[4..];
		let end = body.find("-->").ok_or(MarkupError::Unterminated { what: "comment", offset: start })?;
		let comment = self.document.create_comment(&body[..end]);
		self.position += 4 + end + 3;
		let parent = self.current();
		self.document.append_child(parent, comment);
		Ok(())
	}

	fn closing_tag(&mut self) -> Result<(), MarkupError> {
		let offset = self.position;
		let rest = &self.rest()[2..];
		let end = rest.find('>').ok_or(MarkupError::Unterminated { what: "closing tag", offset })?;
		let found = rest[..end].trim().to_ascii_lowercase();
		self.position += 2 + end + 1;

		if self.open.is_empty() {
			return Err(MarkupError::UnexpectedClosingTag { found, offset });
		}
		let expected = self.document.tag_name(self.current()).unwrap_or_default();
		if expected != found {
			return Err(MarkupError::MismatchedClosingTag { expected: expected.to_owned(), found, offset });
		}
		self.open.pop();
		Ok(())
	}

	fn opening_tag(&mut self) -> Result<(), MarkupError> {
		let offset = self.position;
		let bytes = self.input.as_bytes();
		let mut i = self.position + 1;
		let name_start = i;
		while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'/' && bytes[i] != b'>' {
			i += 1;
		}
		let name = self.input[name_start..i].to_ascii_lowercase();
		let element = self.document.create_element(&name);

		let mut self_closing = false;
		loop {
			while i < bytes.len() && bytes[i].is_ascii_whitespace() {
				i += 1;
			}
			match bytes.get(i) {
				None => return Err(MarkupError::Unterminated { what: "opening tag", offset }),
				Some(b'>') => {
					i += 1;
					break;
				}
				Some(b'/') if bytes.get(i + 1) == Some(&b'>') => {
					self_closing = true;
					i += 2;
					break;
				}
				Some(b'/') => i += 1,
				Some(_) => {
					let attribute_start = i;
					while i < bytes.len() && !bytes[i].is_ascii_whitespace() && !matches!(bytes[i], b'=' | b'>') && !(bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'>')) {
						i += 1;
					}
					let attribute_name = self.input[attribute_start..i].to_ascii_lowercase();
					while i < bytes.len() && bytes[i].is_ascii_whitespace() {
						i += 1;
					}
					let mut value = String::new();
					if bytes.get(i) == Some(&b'=') {
						i += 1;
						while i < bytes.len() && bytes[i].is_ascii_whitespace() {
							i += 1;
						}
						match bytes.get(i) {
							Some(&quote) if quote == b'"' || quote == b'\'' => {
								let value_start = i + 1;
								let length = self.input[value_start..].find(quote as char).ok_or(MarkupError::Unterminated { what: "attribute value", offset: attribute_start })?;
								value = decode_entities(&self.input[value_start..value_start + length]);
								i = value_start + length + 1;
							}
							_ => {
								let value_start = i;
								while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
									i += 1;
								}
								value = decode_entities(&self.input[value_start..i]);
							}
						}
					}
					// The first occurrence of an attribute wins.
					if !attribute_name.is_empty() && !self.document.has_attribute(element, &attribute_name) {
						self.document.set_attribute(element, &attribute_name, &value);
					}
				}
			}
		}
		self.position = i;

		let parent = self.current();
		self.document.append_child(parent, element);

		if self_closing || is_void_element(&name) {
			return Ok(());
		}

		if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
			let closing = format!("</{}", name);
			let rest = self.rest();
			let end = find_ignore_ascii_case(rest, &closing).ok_or_else(|| MarkupError::UnclosedElement { name: name.clone() })?;
			let raw = &rest[..end];
			let text = if name == "textarea" || name == "title" { decode_entities(raw) } else { raw.to_owned() };
			if !text.is_empty() {
				let text_node = self.document.create_text(&text);
				self.document.append_child(element, text_node);
			}
			let after = &rest[end..];
			let close = after.find('>').ok_or(MarkupError::Unterminated { what: "closing tag", offset: self.position + end })?;
			self.position += end + close + 1;
			return Ok(());
		}

		self.open.push(element);
		Ok(())
	}
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
	let needle = needle.as_bytes();
	haystack.as_bytes().windows(needle.len()).position(|window| window.eq_ignore_ascii_case(needle))
}

/// Decodes the character references markup producers emit in practice.
/// Unknown references are kept verbatim.
#[must_use]
pub fn decode_entities(text: &str) -> String {
	if !text.contains('&') {
		return text.to_owned();
	}

	let mut decoded = String::with_capacity(text.len());
	let mut rest = text;
	while let Some(start) = rest.find('&') {
		decoded.push_str(&rest[..start]);
		rest = &rest[start..];
		let end = match rest.find(';') {
			Some(end) if end <= 10 => end,
			_ => {
				decoded.push('&');
				rest = &rest[1..];
				continue;
			}
		};
		let entity = &rest[1..end];
		let character = match entity {
			"amp" => Some('&'),
			"lt" => Some('<'),
			"gt" => Some('>'),
			"quot" => Some('"'),
			"apos" => Some('\''),
			"nbsp" => Some('\u{a0}'),
			_ if entity.starts_with("#x") || entity.starts_with("#X") => u32::from_str_radix(&entity[2..], 16).ok().and_then(char::from_u32),
			_ if entity.starts_with('#') => entity[1..].parse().ok().and_then(char::from_u32),
			_ => None,
		};
		match character {
			Some(character) => {
				decoded.push(character);
				rest = &rest[end + 1..];
			}
			None => {
				decoded.push('&');
				rest = &rest[1..];
			}
		}
	}
	decoded.push_str(rest);
	decoded
}

pub(crate) fn escape_text(text: &str, out: &mut String) {
	for c in text.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			c => out.push(c),
		}
	}
}

pub(crate) fn escape_attribute(value: &str, out: &mut String) {
	for c in value.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'"' => out.push_str("&quot;"),
			c => out.push(c),
		}
	}
}

/// Serializes `node` including itself. Attributes with an empty value are written without one.
#[must_use]
pub fn outer_html(document: &Document, node: NodeId) -> String {
	let mut out = String::new();
	write_node(document, node, &mut out);
	out
}

#[must_use]
pub fn inner_html(document: &Document, node: NodeId) -> String {
	let mut out = String::new();
	for child in document.children(node) {
		write_node(document, child, &mut out);
	}
	out
}

fn write_node(document: &Document, node: NodeId, out: &mut String) {
	match document.node_type(node) {
		NodeType::Text => {
			let raw = document.parent(node).and_then(|parent| document.tag_name(parent)).map_or(false, |parent| parent == "script" || parent == "style");
			let text = document.text(node).unwrap_or_default();
			if raw {
				out.push_str(text);
			} else {
				escape_text(text, out);
			}
		}
		NodeType::Comment => {
			out.push_str("<!--");
			out.push_str(document.text(node).unwrap_or_default());
			out.push_str("-->");
		}
		NodeType::Fragment => {
			for child in document.children(node) {
				write_node(document, child, out);
			}
		}
		NodeType::Element => {
			let name = document.tag_name(node).unwrap_or_default();
			out.push('<');
			out.push_str(name);
			for attribute in document.attributes(node) {
				out.push(' ');
				out.push_str(&attribute.name);
				if !attribute.value.is_empty() {
					out.push_str("=\"");
					escape_attribute(&attribute.value, out);
					out.push('"');
				}
			}
			out.push('>');
			if is_void_element(name) {
				return;
			}
			for child in document.children(node) {
				write_node(document, child, out);
			}
			out.push_str("</");
			out.push_str(name);
			out.push('>');
		}
	}
}
