#![forbid(unsafe_code)]

use quick_xml::Reader;
use quick_xml::events::Event;
use serde_json::{Map, Value};

/// Parse an embedded XML metadata document into a JSON-like tree.
///
/// Fixed conversion rules: attributes are ignored, leaf text becomes the
/// element's value, repeated sibling names fold into arrays, mixed content
/// keeps its trimmed text under the key `"text"`, and all text is
/// whitespace-trimmed. Any parse failure yields `None` — the caller treats
/// the field as absent.
pub fn parse_embedded_metadata(text: &str) -> Option<Value> {
	let trimmed = text.trim();
	if !trimmed.starts_with('<') {
		return None;
	}

	let mut reader = Reader::from_str(trimmed);
	let mut stack: Vec<PendingNode> = Vec::new();
	let mut root: Option<(String, Value)> = None;

	loop {
		match reader.read_event() {
			Ok(Event::Start(e)) => {
				if stack.is_empty() && root.is_some() {
					return None;
				}
				stack.push(PendingNode::new(String::from_utf8_lossy(e.name().as_ref()).into_owned()));
			}
			Ok(Event::Empty(e)) => {
				let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
				match stack.last_mut() {
					Some(parent) => parent.children.push((name, Value::String(String::new()))),
					None => {
						if root.is_some() {
							return None;
						}
						root = Some((name, Value::String(String::new())));
					}
				}
			}
			Ok(Event::Text(t)) => {
				let s = t.unescape().ok()?;
				match stack.last_mut() {
					Some(top) => top.text.push_str(&s),
					None => {
						if !s.trim().is_empty() {
							return None;
						}
					}
				}
			}
			Ok(Event::CData(c)) => {
				let s = String::from_utf8_lossy(&c.into_inner()).into_owned();
				match stack.last_mut() {
					Some(top) => top.text.push_str(&s),
					None => return None,
				}
			}
			Ok(Event::End(_)) => {
				let node = stack.pop()?;
				let (name, value) = node.finish();
				match stack.last_mut() {
					Some(parent) => parent.children.push((name, value)),
					None => root = Some((name, value)),
				}
			}
			Ok(Event::Eof) => break,
			Ok(_) => {}
			Err(_) => return None,
		}
	}

	if !stack.is_empty() {
		return None;
	}

	let (name, value) = root?;
	let mut doc = Map::new();
	doc.insert(name, value);
	Some(Value::Object(doc))
}

struct PendingNode {
	name: String,
	text: String,
	children: Vec<(String, Value)>,
}

impl PendingNode {
	fn new(name: String) -> Self {
		Self {
			name,
			text: String::new(),
			children: Vec::new(),
		}
	}

	fn finish(self) -> (String, Value) {
		let text = self.text.trim().to_string();

		if self.children.is_empty() {
			return (self.name, Value::String(text));
		}

		let mut map = Map::new();
		for (name, value) in self.children {
			match map.get_mut(&name) {
				None => {
					map.insert(name, value);
				}
				Some(Value::Array(items)) => items.push(value),
				Some(existing) => {
					let first = existing.take();
					*existing = Value::Array(vec![first, value]);
				}
			}
		}

		if !text.is_empty() {
			map.insert("text".to_string(), Value::String(text));
		}

		(self.name, Value::Object(map))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn parses_msgsource_document() {
		let tree = parse_embedded_metadata(
			"<msgsource><atuserlist>wxid_bot,wxid_b</atuserlist><silence>1</silence><membercount>42</membercount></msgsource>",
		)
		.expect("parse");

		assert_eq!(
			tree,
			json!({
				"msgsource": {
					"atuserlist": "wxid_bot,wxid_b",
					"silence": "1",
					"membercount": "42"
				}
			})
		);
	}

	#[test]
	fn single_leaf_becomes_string() {
		assert_eq!(parse_embedded_metadata("<a>x</a>"), Some(json!({"a": "x"})));
	}

	#[test]
	fn repeated_siblings_fold_into_array() {
		let tree = parse_embedded_metadata("<list><item>1</item><item>2</item><item>3</item></list>").expect("parse");
		assert_eq!(tree, json!({"list": {"item": ["1", "2", "3"]}}));
	}

	#[test]
	fn attributes_are_ignored() {
		let tree = parse_embedded_metadata(r#"<a href="https://example.com" id="7">x</a>"#).expect("parse");
		assert_eq!(tree, json!({"a": "x"}));
	}

	#[test]
	fn mixed_content_keeps_text_key() {
		let tree = parse_embedded_metadata("<a>lead <b>c</b></a>").expect("parse");
		assert_eq!(tree, json!({"a": {"b": "c", "text": "lead"}}));
	}

	#[test]
	fn text_is_trimmed() {
		assert_eq!(parse_embedded_metadata("<a>\n\t  spaced out \n</a>"), Some(json!({"a": "spaced out"})));
	}

	#[test]
	fn empty_elements_become_empty_strings() {
		assert_eq!(parse_embedded_metadata("<a/>"), Some(json!({"a": ""})));
		assert_eq!(parse_embedded_metadata("<a></a>"), Some(json!({"a": ""})));
	}

	#[test]
	fn cdata_is_captured() {
		assert_eq!(
			parse_embedded_metadata("<a><![CDATA[<kept as text>]]></a>"),
			Some(json!({"a": "<kept as text>"}))
		);
	}

	#[test]
	fn failure_is_absence() {
		assert_eq!(parse_embedded_metadata("plain text message"), None);
		assert_eq!(parse_embedded_metadata("<a><b></a>"), None);
		assert_eq!(parse_embedded_metadata("<unclosed>"), None);
		assert_eq!(parse_embedded_metadata(""), None);
		assert_eq!(parse_embedded_metadata("<a>1</a><b>2</b>"), None);
	}
}
