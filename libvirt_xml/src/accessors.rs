// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! Typed properties over a [`ConfigDocument`].
//!
//! A [`PropertyDescriptor`] names one location in the document, the
//! `tag_name` element below `parent_xpath`, and how its value is read and
//! written. Descriptors hold no data; [`get`], [`set`] and [`del`] evaluate
//! them against a document at call time. None of these touch libvirt, the
//! owning entity commits explicitly through [`LibvirtXml::define`].

use std::fmt;

use log::debug;
use virsh::Virsh;
use xml_store::{ConfigDocument, Node, NodePath};

use crate::{LibvirtXmlError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Get,
    Set,
    Del,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Operation::Get => "get",
            Operation::Set => "set",
            Operation::Del => "del",
        };
        write!(f, "{s}")
    }
}

/// Which part of the located element carries the value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selector {
    Text,
    Attribute(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Int,
    Bool,
    /// Every `tag_name` child of the parent element, in document order.
    NodeList,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ValueKind::Text => "text",
            ValueKind::Int => "integer",
            ValueKind::Bool => "boolean",
            ValueKind::NodeList => "node list",
        };
        write!(f, "{s}")
    }
}

/// A property value. Node lists borrow from the document they were read
/// from and are invalidated by any mutation of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value<'a> {
    Text(String),
    Int(i64),
    Bool(bool),
    Nodes(Vec<&'a Node>),
}

impl Value<'_> {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Text(_) => ValueKind::Text,
            Value::Int(_) => ValueKind::Int,
            Value::Bool(_) => ValueKind::Bool,
            Value::Nodes(_) => ValueKind::NodeList,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{s}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{}", if *b { "yes" } else { "no" }),
            Value::Nodes(nodes) => {
                for node in nodes {
                    write!(f, "{}", ConfigDocument::new((*node).clone()))?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Value<'_> {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value<'_> {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value<'_> {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value<'_> {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "yes" | "on" | "true" => Some(true),
        "no" | "off" | "false" => Some(false),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: &'static str,
    pub parent_xpath: &'static str,
    pub tag_name: &'static str,
    pub selector: Selector,
    pub kind: ValueKind,
    pub forbidden: &'static [Operation],
    /// Returned by `get` instead of failing when the value is absent.
    pub default: Option<&'static str>,
}

impl PropertyDescriptor {
    const fn new(
        name: &'static str,
        parent_xpath: &'static str,
        tag_name: &'static str,
        selector: Selector,
        kind: ValueKind,
    ) -> Self {
        PropertyDescriptor {
            name,
            parent_xpath,
            tag_name,
            selector,
            kind,
            forbidden: &[],
            default: None,
        }
    }

    /// Text content of an element.
    pub const fn text(name: &'static str, parent_xpath: &'static str, tag: &'static str) -> Self {
        Self::new(name, parent_xpath, tag, Selector::Text, ValueKind::Text)
    }

    /// Base-10 integer text content of an element.
    pub const fn int(name: &'static str, parent_xpath: &'static str, tag: &'static str) -> Self {
        Self::new(name, parent_xpath, tag, Selector::Text, ValueKind::Int)
    }

    pub const fn boolean(
        name: &'static str,
        parent_xpath: &'static str,
        tag: &'static str,
    ) -> Self {
        Self::new(name, parent_xpath, tag, Selector::Text, ValueKind::Bool)
    }

    /// One attribute of an element. Using the root tag with a `/` parent
    /// addresses the root element itself.
    pub const fn attribute(
        name: &'static str,
        parent_xpath: &'static str,
        tag: &'static str,
        attribute: &'static str,
    ) -> Self {
        Self::new(
            name,
            parent_xpath,
            tag,
            Selector::Attribute(attribute),
            ValueKind::Text,
        )
    }

    pub const fn node_list(
        name: &'static str,
        parent_xpath: &'static str,
        tag: &'static str,
    ) -> Self {
        Self::new(name, parent_xpath, tag, Selector::Text, ValueKind::NodeList)
    }

    pub const fn forbid(self, forbidden: &'static [Operation]) -> Self {
        PropertyDescriptor { forbidden, ..self }
    }

    pub const fn with_default(self, default: &'static str) -> Self {
        PropertyDescriptor {
            default: Some(default),
            ..self
        }
    }

    pub const fn with_kind(self, kind: ValueKind) -> Self {
        PropertyDescriptor { kind, ..self }
    }

    pub fn is_forbidden(&self, operation: Operation) -> bool {
        self.forbidden.contains(&operation)
    }

    fn check(&self, operation: Operation) -> Result<()> {
        if self.is_forbidden(operation) {
            return Err(LibvirtXmlError::Forbidden {
                property: self.name.to_owned(),
                operation,
            });
        }
        Ok(())
    }

    fn mismatch(&self) -> LibvirtXmlError {
        LibvirtXmlError::ValueKindMismatch {
            property: self.name.to_owned(),
            expected: self.kind,
        }
    }

    fn not_found(&self) -> LibvirtXmlError {
        let location = match self.selector {
            Selector::Text => format!("{}/{}", self.parent_xpath, self.tag_name),
            Selector::Attribute(attr) => {
                format!("{}/{}@{attr}", self.parent_xpath, self.tag_name)
            }
        };
        LibvirtXmlError::NotFound {
            property: self.name.to_owned(),
            location: location.replace("//", "/"),
        }
    }

    fn element_path(&self, doc: &ConfigDocument) -> Result<NodePath> {
        let parent: NodePath = self.parent_xpath.parse()?;
        if parent.is_root() && doc.root().tag() == self.tag_name {
            return Ok(parent);
        }
        Ok(parent.join(self.tag_name)?)
    }

    /// Converts the textual form of a scalar value to this property's kind.
    pub fn parse_value(&self, raw: &str) -> Result<Value<'static>> {
        match self.kind {
            ValueKind::Text => Ok(Value::Text(raw.to_owned())),
            ValueKind::Int => {
                raw.trim()
                    .parse()
                    .map(Value::Int)
                    .map_err(|source| LibvirtXmlError::InvalidInteger {
                        property: self.name.to_owned(),
                        value: raw.to_owned(),
                        source,
                    })
            }
            ValueKind::Bool => {
                parse_bool(raw)
                    .map(Value::Bool)
                    .ok_or_else(|| LibvirtXmlError::InvalidBool {
                        property: self.name.to_owned(),
                        value: raw.to_owned(),
                    })
            }
            ValueKind::NodeList => Err(self.mismatch()),
        }
    }

    fn format_value(&self, value: &Value) -> Result<String> {
        match (self.kind, value) {
            (ValueKind::Text, Value::Text(s)) => Ok(s.clone()),
            (ValueKind::Int, Value::Int(n)) => Ok(n.to_string()),
            (ValueKind::Bool, Value::Bool(b)) => Ok(if *b { "yes" } else { "no" }.to_owned()),
            _ => Err(self.mismatch()),
        }
    }
}

pub fn get<'a>(doc: &'a ConfigDocument, desc: &PropertyDescriptor) -> Result<Value<'a>> {
    desc.check(Operation::Get)?;

    if desc.kind == ValueKind::NodeList {
        let nodes = match doc.find(desc.parent_xpath)? {
            Some(parent) => parent.children_named(desc.tag_name).collect(),
            None => Vec::new(),
        };
        return Ok(Value::Nodes(nodes));
    }

    let node = doc.find_path(&desc.element_path(doc)?);
    let raw = match (node, desc.selector) {
        (Some(node), Selector::Text) => Some(node.text().unwrap_or_default()),
        (Some(node), Selector::Attribute(attr)) => node.attribute(attr),
        (None, _) => None,
    };

    match raw.or(desc.default) {
        Some(raw) => desc.parse_value(raw),
        None => Err(desc.not_found()),
    }
}

pub fn get_text(doc: &ConfigDocument, desc: &PropertyDescriptor) -> Result<String> {
    match get(doc, desc)? {
        Value::Text(s) => Ok(s),
        _ => Err(desc.mismatch()),
    }
}

pub fn get_int(doc: &ConfigDocument, desc: &PropertyDescriptor) -> Result<i64> {
    get(doc, desc)?.as_int().ok_or_else(|| desc.mismatch())
}

pub fn get_bool(doc: &ConfigDocument, desc: &PropertyDescriptor) -> Result<bool> {
    get(doc, desc)?.as_bool().ok_or_else(|| desc.mismatch())
}

pub fn get_nodes<'a>(doc: &'a ConfigDocument, desc: &PropertyDescriptor) -> Result<Vec<&'a Node>> {
    match get(doc, desc)? {
        Value::Nodes(nodes) => Ok(nodes),
        _ => Err(desc.mismatch()),
    }
}

/// Writes `value`, creating the parent path and the element when missing.
/// A node list replaces every existing `tag_name` child of the parent, in
/// place of the first one.
pub fn set(doc: &mut ConfigDocument, desc: &PropertyDescriptor, value: Value<'_>) -> Result<()> {
    desc.check(Operation::Set)?;

    if desc.kind == ValueKind::NodeList {
        let Value::Nodes(nodes) = value else {
            return Err(desc.mismatch());
        };
        if nodes.iter().any(|n| n.tag() != desc.tag_name) {
            return Err(desc.mismatch());
        }
        let nodes: Vec<Node> = nodes.into_iter().cloned().collect();
        doc.ensure(desc.parent_xpath)?
            .replace_children_named(desc.tag_name, nodes);
        return Ok(());
    }

    let raw = desc.format_value(&value)?;
    let path = desc.element_path(doc)?;
    let node = doc.ensure_path(&path)?;
    match desc.selector {
        Selector::Text => node.set_text(Some(&raw)),
        Selector::Attribute(attr) => node.set_attribute(attr, &raw),
    }
    Ok(())
}

/// Removes the element, attribute or node list. Removing something that is
/// not there is not an error.
pub fn del(doc: &mut ConfigDocument, desc: &PropertyDescriptor) -> Result<()> {
    desc.check(Operation::Del)?;

    if desc.kind == ValueKind::NodeList {
        if let Some(parent) = doc.find_mut(desc.parent_xpath)? {
            parent.remove_children_named(desc.tag_name);
        }
        return Ok(());
    }

    let path = desc.element_path(doc)?;
    let removed = match desc.selector {
        Selector::Text => doc.remove(&path.to_string())?.is_some(),
        Selector::Attribute(attr) => doc
            .find_path_mut(&path)
            .and_then(|node| node.remove_attribute(attr))
            .is_some(),
    };
    if !removed {
        debug!("Property {} already absent", desc.name);
    }
    Ok(())
}

pub fn lookup<'a>(
    properties: &'a [PropertyDescriptor],
    name: &str,
) -> Result<&'a PropertyDescriptor> {
    properties
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| LibvirtXmlError::UnknownProperty(name.to_owned()))
}

/// A libvirt XML entity: one owned document plus the table of properties
/// addressable by name.
pub trait LibvirtXml {
    fn document(&self) -> &ConfigDocument;

    fn document_mut(&mut self) -> &mut ConfigDocument;

    fn properties(&self) -> &'static [PropertyDescriptor];

    fn property(&self, name: &str) -> Result<&'static PropertyDescriptor> {
        lookup(self.properties(), name)
    }

    fn get(&self, name: &str) -> Result<Value<'_>> {
        get(self.document(), self.property(name)?)
    }

    fn set(&mut self, name: &str, value: Value<'_>) -> Result<()> {
        let desc = self.property(name)?;
        set(self.document_mut(), desc, value)
    }

    /// Parses `raw` according to the property kind, then sets it.
    fn set_str(&mut self, name: &str, raw: &str) -> Result<()> {
        let desc = self.property(name)?;
        let value = desc.parse_value(raw)?;
        set(self.document_mut(), desc, value)
    }

    fn del(&mut self, name: &str) -> Result<()> {
        let desc = self.property(name)?;
        del(self.document_mut(), desc)
    }

    fn xml(&self) -> String {
        self.document().serialize()
    }

    /// Defines the domain from this document, replacing any existing
    /// definition with the same name.
    fn define(&mut self, virsh: &dyn Virsh) -> Result<()> {
        let xml_file = self.document_mut().backing_path()?;
        debug!("Defining domain from {}", xml_file.display());
        virsh.define(xml_file)?;
        Ok(())
    }

    /// Removes the libvirt definition of the domain named in this document.
    /// The document is kept so it can be defined again.
    fn undefine(&self, virsh: &dyn Virsh) -> Result<()> {
        let name = get_text(self.document(), self.property("vm_name")?)?;
        virsh.undefine(&name)?;
        Ok(())
    }
}
