use std::borrow::Cow;

use quick_xml::{Reader, events::Event};
use serde_json::{Map, Value};
use snafu::prelude::*;

use crate::error::{DecodeError, XmlAttributeSnafu, XmlSnafu, XmlStructureSnafu};

/// A parsed XML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    root: XmlElement,
}

impl XmlDocument {
    /// Returns the root element.
    #[must_use]
    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    /// Consumes the document and returns its root element.
    #[must_use]
    pub fn into_root(self) -> XmlElement {
        self.root
    }

    /// Merges adjacent text nodes and removes empty ones, throughout the
    /// tree.
    pub fn normalize(&mut self) {
        self.root.normalize();
    }
}

/// An element and its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

/// A child of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    /// A nested element.
    Element(XmlElement),
    /// Character data. CDATA sections are read as text.
    Text(String),
}

impl XmlElement {
    fn new(name: String, attributes: Vec<(String, String)>) -> Self {
        Self {
            name,
            attributes,
            children: Vec::new(),
        }
    }

    /// Returns the qualified element name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the attributes in document order.
    #[must_use]
    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// Returns the value of an attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the child nodes.
    #[must_use]
    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    /// Returns the child elements.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// Returns the first child element with the given name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|element| element.name == name)
    }

    /// Returns the text of this element and all its descendants.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                XmlNode::Text(text) => out.push_str(text),
                XmlNode::Element(element) => element.collect_text(out),
            }
        }
    }

    fn own_text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(text) => Some(text.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect::<String>()
            .trim()
            .to_string()
    }

    fn push_text(&mut self, text: Cow<'_, str>) {
        if let Some(XmlNode::Text(last)) = self.children.last_mut() {
            last.push_str(&text);
        } else {
            self.children.push(XmlNode::Text(text.into_owned()));
        }
    }

    fn normalize(&mut self) {
        let mut merged: Vec<XmlNode> = Vec::with_capacity(self.children.len());
        for node in self.children.drain(..) {
            match (merged.last_mut(), node) {
                (_, XmlNode::Text(text)) if text.is_empty() => {}
                (Some(XmlNode::Text(last)), XmlNode::Text(text)) => last.push_str(&text),
                (_, XmlNode::Element(mut element)) => {
                    element.normalize();
                    merged.push(XmlNode::Element(element));
                }
                (_, node) => merged.push(node),
            }
        }
        self.children = merged;
    }
}

/// Parses a document with exactly one root element.
pub(super) fn parse(input: &str) -> Result<XmlDocument, DecodeError> {
    let mut reader = Reader::from_str(input);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event().context(XmlSnafu)? {
            Event::Start(start) => {
                stack.push(open_element(&reader, &start)?);
            }
            Event::Empty(start) => {
                let element = open_element(&reader, &start)?;
                close_element(element, &mut stack, &mut root)?;
            }
            Event::End(_) => {
                let element = stack.pop().context(XmlStructureSnafu {
                    reason: "closing tag without an open element",
                })?;
                close_element(element, &mut stack, &mut root)?;
            }
            Event::Text(text) => {
                let text = text.unescape().context(XmlSnafu)?;
                push_text(&mut stack, text)?;
            }
            Event::CData(data) => {
                let bytes = data.into_inner();
                let text = reader.decoder().decode(&bytes).context(XmlSnafu)?;
                push_text(&mut stack, Cow::Owned(text.into_owned()))?;
            }
            Event::Eof => break,
            Event::Decl(_) | Event::PI(_) | Event::DocType(_) | Event::Comment(_) => {}
        }
    }

    if let Some(open) = stack.last() {
        return XmlStructureSnafu {
            reason: format!("unclosed element `{}`", open.name),
        }
        .fail();
    }
    let root = root.context(XmlStructureSnafu {
        reason: "no root element",
    })?;
    Ok(XmlDocument { root })
}

fn open_element(
    reader: &Reader<&[u8]>,
    start: &quick_xml::events::BytesStart<'_>,
) -> Result<XmlElement, DecodeError> {
    let decoder = reader.decoder();
    let qname = start.name();
    let name = decoder
        .decode(qname.as_ref())
        .context(XmlSnafu)?
        .into_owned();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.context(XmlAttributeSnafu)?;
        let key = decoder
            .decode(attribute.key.as_ref())
            .context(XmlSnafu)?
            .into_owned();
        let value = attribute.unescape_value().context(XmlSnafu)?.into_owned();
        attributes.push((key, value));
    }
    Ok(XmlElement::new(name, attributes))
}

fn close_element(
    element: XmlElement,
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
) -> Result<(), DecodeError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(XmlNode::Element(element));
        return Ok(());
    }
    ensure!(
        root.is_none(),
        XmlStructureSnafu {
            reason: "more than one root element",
        }
    );
    *root = Some(element);
    Ok(())
}

fn push_text(stack: &mut [XmlElement], text: Cow<'_, str>) -> Result<(), DecodeError> {
    match stack.last_mut() {
        Some(parent) => {
            // Indentation between elements is not content.
            if !text.trim().is_empty() || matches!(parent.children.last(), Some(XmlNode::Text(_))) {
                parent.push_text(text);
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => XmlStructureSnafu {
            reason: "text outside the root element",
        }
        .fail(),
    }
}

/// Converts the root element to the object shape of `xml_map`.
pub(super) fn root_to_map(root: &XmlElement) -> Map<String, Value> {
    match element_to_value(root) {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("0".to_string(), other);
            map
        }
    }
}

fn element_to_value(element: &XmlElement) -> Value {
    let mut map = Map::new();
    if !element.attributes.is_empty() {
        let attributes = element
            .attributes
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        map.insert("@attributes".to_string(), Value::Object(attributes));
    }

    let mut has_children = false;
    for child in element.elements() {
        has_children = true;
        let value = element_to_value(child);
        match map.get_mut(&child.name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(child.name.clone(), value);
            }
        }
    }

    if !has_children {
        let text = element.own_text();
        if !text.is_empty() {
            if map.is_empty() {
                return Value::String(text);
            }
            map.insert("0".to_string(), Value::String(text));
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn builds_element_tree() {
        let document = parse(
            r#"<?xml version="1.0"?>
            <!-- catalog -->
            <catalog lang="en">
                <book id="1"><title>Dune &amp; more</title></book>
                <book id="2"/>
            </catalog>"#,
        )
        .unwrap();

        let root = document.root();
        assert_eq!(root.name(), "catalog");
        assert_eq!(root.attribute("lang"), Some("en"));
        assert_eq!(root.elements().count(), 2);
        let first = root.child("book").unwrap();
        assert_eq!(first.attribute("id"), Some("1"));
        assert_eq!(first.text(), "Dune & more");
    }

    #[test]
    fn cdata_joins_adjacent_text() {
        let document = parse("<note>a<![CDATA[<b>]]>c</note>").unwrap();
        assert_eq!(document.root().children(), &[XmlNode::Text("a<b>c".into())]);
    }

    #[test]
    fn rejects_structural_problems() {
        assert!(matches!(
            parse("<a></a><b></b>").unwrap_err(),
            DecodeError::XmlStructure { .. }
        ));
        assert!(matches!(
            parse("<a><b>").unwrap_err(),
            DecodeError::XmlStructure { .. }
        ));
        assert!(matches!(
            parse("   ").unwrap_err(),
            DecodeError::XmlStructure { .. }
        ));
        assert!(parse("<a></b>").is_err());
    }

    #[test]
    fn normalize_drops_empty_text() {
        let mut element = XmlElement::new("a".into(), Vec::new());
        element.children = vec![
            XmlNode::Text("x".into()),
            XmlNode::Text(String::new()),
            XmlNode::Text("y".into()),
            XmlNode::Element(XmlElement::new("b".into(), Vec::new())),
            XmlNode::Text(String::new()),
        ];
        let mut document = XmlDocument { root: element };
        document.normalize();
        assert_eq!(document.root().children().len(), 2);
        assert_eq!(document.root().children()[0], XmlNode::Text("xy".into()));
    }

    #[test]
    fn map_shape_follows_simplexml() {
        let document = parse(
            r#"<r><empty/><tagged kind="x">value</tagged><n>1</n><n>2</n><n>3</n></r>"#,
        )
        .unwrap();
        assert_eq!(
            Value::Object(root_to_map(document.root())),
            json!({
                "empty": {},
                "tagged": {"@attributes": {"kind": "x"}, "0": "value"},
                "n": ["1", "2", "3"]
            })
        );
    }

    #[test]
    fn text_only_root_maps_under_zero() {
        let document = parse("<greeting>hello</greeting>").unwrap();
        assert_eq!(
            Value::Object(root_to_map(document.root())),
            json!({"0": "hello"})
        );
    }
}
