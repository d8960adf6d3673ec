//! Slash-separated paths into a request or response element
//!
//! A path like `action/id` names the `id` attribute of the `action` child.
//! Used as an element path (response rewriting) every segment is a child
//! element name, and the empty path is the root itself.

use super::Element;
use crate::{Result, RouteError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A parsed path of element (and, last, attribute) names
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct XPath(Vec<String>);

impl XPath {
    /// Path from segments
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The empty path, naming the root element
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Split into (element path, attribute name); None for the root path
    fn split_attribute(&self) -> Option<(&[String], &str)> {
        let (attr, elements) = self.0.split_last()?;
        Some((elements, attr.as_str()))
    }
}

impl From<&str> for XPath {
    fn from(s: &str) -> Self {
        Self(
            s.split('/')
                .map(str::trim)
                .filter(|seg| !seg.is_empty())
                .map(String::from)
                .collect(),
        )
    }
}

impl From<String> for XPath {
    fn from(s: String) -> Self {
        XPath::from(s.as_str())
    }
}

impl From<XPath> for String {
    fn from(path: XPath) -> Self {
        path.to_string()
    }
}

impl FromStr for XPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(XPath::from(s))
    }
}

impl fmt::Display for XPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Element reached by following every segment as a child name
pub fn get_xpath_element<'a>(root: &'a Element, path: &XPath) -> Option<&'a Element> {
    walk(root, path.segments())
}

/// Mutable variant of [`get_xpath_element`]
pub fn get_xpath_element_mut<'a>(root: &'a mut Element, path: &XPath) -> Option<&'a mut Element> {
    walk_mut(root, path.segments())
}

/// Attribute named by the last segment, on the element named by the rest
pub fn get_xpath<'a>(root: &'a Element, path: &XPath) -> Option<&'a str> {
    let (elements, attr) = path.split_attribute()?;
    walk(root, elements)?.attribute(attr)
}

/// Set the attribute named by `path`
///
/// The containing element must already exist; the attribute is created if
/// missing.
pub fn set_xpath(root: &mut Element, path: &XPath, value: &str) -> Result<()> {
    let (elements, attr) = path
        .split_attribute()
        .ok_or_else(|| RouteError::InvalidRequest("empty path".to_string()))?;
    let target = walk_mut(root, elements).ok_or_else(|| {
        RouteError::InvalidRequest(format!("could not find path: {}", path))
    })?;
    target.set_attribute(attr, value);
    Ok(())
}

fn walk<'a>(root: &'a Element, segments: &[String]) -> Option<&'a Element> {
    segments
        .iter()
        .try_fold(root, |current, seg| current.child(seg))
}

fn walk_mut<'a>(root: &'a mut Element, segments: &[String]) -> Option<&'a mut Element> {
    let mut current = root;
    for seg in segments {
        current = current.child_mut(seg)?;
    }
    Some(current)
}
