//! Mutable XML element tree for SOAP documents
//!
//! Requests and responses are small documents that routing code needs to
//! read, patch and re-serialize (rewriting an id attribute before forwarding,
//! rewriting folder ids after). A plain owned tree is the simplest thing that
//! supports that.
//!
//! Names are kept exactly as written (`soap:Body`, `GetFolderRequest`);
//! lookups by child name compare the local part only, so callers never have
//! to care which namespace prefix a peer chose.

use crate::{Result, RouteError};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};

/// An XML element with attributes, child elements and text content
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    /// Create an empty element
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder-style attribute setter
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Builder-style child appender
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Builder-style text setter
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Qualified name as written
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name without namespace prefix
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    /// Text content (empty if none)
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Attribute value by exact name
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value parsed as a boolean (`1`/`true`)
    pub fn attribute_bool(&self, name: &str) -> bool {
        matches!(self.attribute(name), Some("1") | Some("true") | Some("TRUE"))
    }

    /// Set an attribute, replacing any existing value in place
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// Remove an attribute, returning its old value
    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        let pos = self.attributes.iter().position(|(k, _)| k == name)?;
        Some(self.attributes.remove(pos).1)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Element> {
        &mut self.children
    }

    /// First child with the given local name
    pub fn child(&self, local_name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.local_name() == local_name)
    }

    /// First child with the given local name, mutably
    pub fn child_mut(&mut self, local_name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find(|c| c.local_name() == local_name)
    }

    /// First child element regardless of name
    pub fn first_child(&self) -> Option<&Element> {
        self.children.first()
    }

    /// Required child, failing with `InvalidRequest` when missing
    pub fn require_child(&self, local_name: &str) -> Result<&Element> {
        self.child(local_name).ok_or_else(|| {
            RouteError::InvalidRequest(format!(
                "missing required element: {} in {}",
                local_name,
                self.local_name()
            ))
        })
    }

    /// Required attribute, failing with `InvalidRequest` when missing
    pub fn require_attribute(&self, name: &str) -> Result<&str> {
        self.attribute(name).ok_or_else(|| {
            RouteError::InvalidRequest(format!(
                "missing required attribute: {} on {}",
                name,
                self.local_name()
            ))
        })
    }

    /// Append a child and return a handle to it
    pub fn add_child(&mut self, child: Element) -> &mut Element {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Parse a document, returning its root element
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    stack.push(element_from_start(e)?);
                }
                Ok(Event::Empty(ref e)) => {
                    let element = element_from_start(e)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Ok(Event::End(_)) => {
                    let mut element = stack
                        .pop()
                        .ok_or_else(|| RouteError::Parse("unbalanced end tag".to_string()))?;
                    if !element.children.is_empty() && element.text.trim().is_empty() {
                        element.text.clear();
                    }
                    attach(&mut stack, &mut root, element)?;
                }
                Ok(Event::Text(ref t)) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(t));
                    }
                }
                Ok(Event::CData(ref c)) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(c));
                    }
                }
                Ok(Event::GeneralRef(ref r)) => {
                    if let Some(top) = stack.last_mut() {
                        let name = String::from_utf8_lossy(r).to_string();
                        let resolved = resolve_entity(&name).ok_or_else(|| {
                            RouteError::Parse(format!("unknown entity: &{};", name))
                        })?;
                        top.text.push(resolved);
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(RouteError::Parse(format!(
                        "error parsing XML at position {}: {}",
                        reader.error_position(),
                        e
                    )));
                }
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(RouteError::Parse("unexpected end of document".to_string()));
        }
        root.ok_or_else(|| RouteError::Parse("document has no root element".to_string()))
    }

    /// Serialize to an XML string (no declaration)
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        write_element(&mut writer, self)?;
        String::from_utf8(writer.into_inner())
            .map_err(|e| RouteError::Parse(format!("non UTF-8 output: {}", e)))
    }

    /// Render as a JSON value in the `_content`/attribute style used by JS clients
    ///
    /// Attributes become string fields, children are grouped into arrays by
    /// local name, and text content goes to `_content`.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (k, v) in &self.attributes {
            if k == "xmlns" || k.starts_with("xmlns:") {
                continue;
            }
            map.insert(local_part(k).to_string(), Value::String(v.clone()));
        }
        for child in &self.children {
            let entry = map
                .entry(child.local_name().to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(items) = entry {
                items.push(child.to_json());
            }
        }
        if !self.text.is_empty() {
            map.insert("_content".to_string(), Value::String(self.text.clone()));
        }
        Value::Object(map)
    }
}

fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name)
}

fn element_from_start(e: &BytesStart) -> Result<Element> {
    let mut element = Element::new(String::from_utf8_lossy(e.name().as_ref()).to_string());
    for attr in e.attributes() {
        let attr = attr.map_err(|e| RouteError::Parse(format!("Invalid attribute: {}", e)))?;
        let value = attr
            .unescape_value()
            .map_err(|e| RouteError::Parse(format!("Invalid attribute value: {}", e)))?;
        element.attributes.push((
            String::from_utf8_lossy(attr.key.as_ref()).to_string(),
            value.to_string(),
        ));
    }
    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    } else if root.is_none() {
        *root = Some(element);
    } else {
        return Err(RouteError::Parse("multiple root elements".to_string()));
    }
    Ok(())
}

fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (k, v) in &element.attributes {
        start.push_attribute((k.as_str(), v.as_str()));
    }

    if element.children.is_empty() && element.text.is_empty() {
        return writer
            .write_event(Event::Empty(start))
            .map_err(|e| RouteError::Parse(e.to_string()));
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| RouteError::Parse(e.to_string()))?;
    if !element.text.is_empty() {
        writer
            .write_event(Event::Text(BytesText::new(&element.text)))
            .map_err(|e| RouteError::Parse(e.to_string()))?;
    }
    for child in &element.children {
        write_element(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(|e| RouteError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested() {
        let xml = r#"<CreateFolderRequest xmlns="urn:zimbraMail">
            <folder name="Shared Stuff" l="42"/>
        </CreateFolderRequest>"#;
        let root = Element::parse(xml).unwrap();
        assert_eq!(root.name(), "CreateFolderRequest");
        assert_eq!(root.attribute("xmlns"), Some("urn:zimbraMail"));
        assert_eq!(root.text(), "");

        let folder = root.child("folder").unwrap();
        assert_eq!(folder.attribute("name"), Some("Shared Stuff"));
        assert_eq!(folder.attribute("l"), Some("42"));
    }

    #[test]
    fn test_prefixed_names_match_by_local_part() {
        let xml = r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body><NoOpRequest/></soap:Body></soap:Envelope>"#;
        let env = Element::parse(xml).unwrap();
        assert_eq!(env.local_name(), "Envelope");
        let body = env.child("Body").unwrap();
        assert_eq!(body.name(), "soap:Body");
        assert_eq!(body.first_child().unwrap().name(), "NoOpRequest");
    }

    #[test]
    fn test_text_and_entities() {
        let root = Element::parse("<a>fish &amp; chips &#x41;</a>").unwrap();
        assert_eq!(root.text(), "fish & chips A");

        let attr = Element::parse(r#"<a n="x &lt; y"/>"#).unwrap();
        assert_eq!(attr.attribute("n"), Some("x < y"));
    }

    #[test]
    fn test_set_attribute_replaces_in_place() {
        let mut e = Element::new("action").with_attr("op", "move").with_attr("id", "1,2");
        e.set_attribute("id", "acct-b:5");
        let attrs: Vec<_> = e.attributes().collect();
        assert_eq!(attrs, vec![("op", "move"), ("id", "acct-b:5")]);
        assert_eq!(e.remove_attribute("op"), Some("move".to_string()));
        assert_eq!(e.attribute("op"), None);
    }

    #[test]
    fn test_serialize_and_reparse() {
        let e = Element::new("GetItemResponse").with_child(
            Element::new("folder")
                .with_attr("id", "acct-b:99")
                .with_attr("name", "Tom & Jerry")
                .with_child(Element::new("note").with_text("a < b")),
        );
        let xml = e.to_xml().unwrap();
        assert!(xml.contains("Tom &amp; Jerry"));
        assert!(xml.contains("a &lt; b"));
        assert_eq!(Element::parse(&xml).unwrap(), e);
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(
            Element::parse("<a><b></a>"),
            Err(RouteError::Parse(_))
        ));
        assert!(matches!(Element::parse("<a>"), Err(RouteError::Parse(_))));
        assert!(matches!(Element::parse(""), Err(RouteError::Parse(_))));
        assert!(matches!(
            Element::parse("<a/><b/>"),
            Err(RouteError::Parse(_))
        ));
    }

    #[test]
    fn test_require_helpers() {
        let e = Element::new("ItemActionRequest").with_child(Element::new("action"));
        assert!(e.require_child("action").is_ok());
        assert!(matches!(
            e.require_child("folder"),
            Err(RouteError::InvalidRequest(_))
        ));
        assert!(matches!(
            e.require_child("action").unwrap().require_attribute("op"),
            Err(RouteError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_to_json() {
        let e = Element::new("GetItemResponse")
            .with_attr("xmlns", "urn:zimbraMail")
            .with_child(Element::new("folder").with_attr("id", "99"))
            .with_child(Element::new("folder").with_attr("id", "100"));
        let json = e.to_json();
        assert_eq!(json["folder"][1]["id"], "100");
        assert!(json.get("xmlns").is_none());
    }
}
