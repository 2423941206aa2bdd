// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::backing::BackingFile;
use crate::path::{node_at, node_at_mut};
use crate::{Error, Node, NodePath};

const INDENT: &str = "  ";

/// A parsed configuration document with exactly one root element.
///
/// References handed out by `find` and friends borrow the document and are
/// invalidated by any structural mutation, as enforced by the borrow checker.
#[derive(Debug)]
pub struct ConfigDocument {
    root: Node,
    backing: Option<BackingFile>,
}

struct Frame {
    node: Node,
    text: Option<String>,
}

fn utf8(bytes: &[u8]) -> Result<&str, Error> {
    std::str::from_utf8(bytes).map_err(Error::Utf8)
}

fn start_node(e: &BytesStart, position: u64) -> Result<Node, Error> {
    let mut node = Node::new(utf8(e.name().as_ref())?);
    for attr in e.attributes() {
        let attr = attr.map_err(|source| Error::Xml {
            position,
            source: source.into(),
        })?;
        let value = attr
            .unescape_value()
            .map_err(|source| Error::Xml { position, source })?;
        node.set_attribute(utf8(attr.key.as_ref())?, &value);
    }
    Ok(node)
}

fn attach(stack: &mut [Frame], root: &mut Option<Node>, node: Node) -> Result<(), Error> {
    match stack.last_mut() {
        Some(parent) => {
            parent.node.push_child(node);
        }
        None if root.is_some() => return Err(Error::MultipleRoots),
        None => *root = Some(node),
    }
    Ok(())
}

fn push_text(stack: &mut [Frame], text: &str) -> Result<(), Error> {
    match stack.last_mut() {
        Some(frame) => frame.text.get_or_insert_with(String::new).push_str(text),
        None if text.trim().is_empty() => {}
        None => return Err(Error::TextOutsideRoot),
    }
    Ok(())
}

fn parse(text: &str) -> Result<Node, Error> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        let position = reader.buffer_position() as u64;
        let event = reader
            .read_event()
            .map_err(|source| Error::Xml { position, source })?;
        match event {
            Event::Start(ref e) => {
                if stack.is_empty() && root.is_some() {
                    return Err(Error::MultipleRoots);
                }
                stack.push(Frame {
                    node: start_node(e, position)?,
                    text: None,
                });
            }
            Event::Empty(ref e) => {
                let node = start_node(e, position)?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::End(_) => {
                // quick-xml rejects mismatched end tags itself
                let Frame { mut node, text } = stack.pop().ok_or(Error::UnmatchedEnd)?;
                let text = if node.children().is_empty() {
                    Some(text.unwrap_or_default())
                } else {
                    text.filter(|t| !t.trim().is_empty())
                };
                node.set_text(text.as_deref());
                attach(&mut stack, &mut root, node)?;
            }
            Event::Text(ref e) => {
                let text = e
                    .unescape()
                    .map_err(|source| Error::Xml { position, source })?;
                push_text(&mut stack, &text)?;
            }
            Event::CData(ref e) => {
                push_text(&mut stack, utf8(e)?)?;
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions and doctype
            // carry nothing the accessors look at.
            _ => {}
        }
    }

    if let Some(frame) = stack.pop() {
        return Err(Error::UnclosedElement(frame.node.tag().to_owned()));
    }

    root.ok_or(Error::NoRoot)
}

fn write_open(out: &mut String, node: &Node) {
    out.push('<');
    out.push_str(node.tag());
    for (name, value) in node.attributes() {
        out.push(' ');
        out.push_str(name);
        out.push_str("='");
        out.push_str(&escape(value));
        out.push('\'');
    }
}

fn write_close(out: &mut String, node: &Node) {
    out.push_str("</");
    out.push_str(node.tag());
    out.push('>');
}

// Text-bearing elements with children are written without any added
// whitespace so their text survives a parse unchanged.
fn write_compact(out: &mut String, node: &Node) {
    write_open(out, node);
    if node.text().is_none() && node.children().is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    if let Some(text) = node.text() {
        out.push_str(&escape(text));
    }
    for child in node.children() {
        write_compact(out, child);
    }
    write_close(out, node);
}

fn write_node(out: &mut String, node: &Node, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    match (node.text(), node.children().is_empty()) {
        (None, true) => {
            write_open(out, node);
            out.push_str("/>");
        }
        (Some(text), true) => {
            write_open(out, node);
            out.push('>');
            out.push_str(&escape(text));
            write_close(out, node);
        }
        (None, false) => {
            write_open(out, node);
            out.push_str(">\n");
            for child in node.children() {
                write_node(out, child, depth + 1);
            }
            for _ in 0..depth {
                out.push_str(INDENT);
            }
            write_close(out, node);
        }
        (Some(_), false) => write_compact(out, node),
    }
    out.push('\n');
}

impl ConfigDocument {
    pub fn new(root: Node) -> Self {
        ConfigDocument {
            root,
            backing: None,
        }
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        Ok(ConfigDocument::new(parse(text)?))
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        write_node(&mut out, &self.root, 0);
        out
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Node {
        &mut self.root
    }

    pub fn find_path(&self, path: &NodePath) -> Option<&Node> {
        path.locate(&self.root)
            .and_then(|chain| node_at(&self.root, &chain))
    }

    pub fn find_path_mut(&mut self, path: &NodePath) -> Option<&mut Node> {
        let chain = path.locate(&self.root)?;
        node_at_mut(&mut self.root, &chain)
    }

    /// First element matching `path`, `None` when nothing matches.
    pub fn find(&self, path: &str) -> Result<Option<&Node>, Error> {
        Ok(self.find_path(&path.parse()?))
    }

    pub fn find_mut(&mut self, path: &str) -> Result<Option<&mut Node>, Error> {
        let path: NodePath = path.parse()?;
        Ok(self.find_path_mut(&path))
    }

    pub fn find_all(&self, path: &str) -> Result<Vec<&Node>, Error> {
        let path: NodePath = path.parse()?;
        Ok(path
            .locate_all(&self.root)
            .iter()
            .filter_map(|chain| node_at(&self.root, chain))
            .collect())
    }

    /// Locates the element at `path`, creating every missing element along
    /// the way.
    pub fn ensure_path(&mut self, path: &NodePath) -> Result<&mut Node, Error> {
        if path.is_anywhere() {
            return Err(Error::AmbiguousCreate(path.to_string()));
        }
        let mut node = &mut self.root;
        for step in path.steps() {
            node = node.child_or_insert(step);
        }
        Ok(node)
    }

    pub fn ensure(&mut self, path: &str) -> Result<&mut Node, Error> {
        let path: NodePath = path.parse()?;
        self.ensure_path(&path)
    }

    /// Detaches the first element matching `path`.
    pub fn remove(&mut self, path: &str) -> Result<Option<Node>, Error> {
        let path: NodePath = path.parse()?;
        if path.is_root() {
            return Err(Error::RemoveRoot);
        }
        let Some(chain) = path.locate(&self.root) else {
            return Ok(None);
        };
        let (last, parent) = chain.split_last().ok_or(Error::RemoveRoot)?;
        Ok(node_at_mut(&mut self.root, parent).and_then(|p| p.remove_child(*last)))
    }

    /// Writes the current serialization to the backing file and returns its
    /// path. The file is created on first use and lives as long as `self`.
    pub fn backing_path(&mut self) -> Result<&Path, Error> {
        let contents = self.serialize();
        let backing = match self.backing.take() {
            Some(backing) => backing,
            None => BackingFile::new()?,
        };
        let backing = self.backing.insert(backing);
        backing.write(&contents)?;
        Ok(backing.path())
    }

    pub fn has_backing_file(&self) -> bool {
        self.backing.is_some()
    }
}

impl Clone for ConfigDocument {
    fn clone(&self) -> Self {
        ConfigDocument::new(self.root.clone())
    }
}

impl PartialEq for ConfigDocument {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Eq for ConfigDocument {}

impl FromStr for ConfigDocument {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigDocument::parse(s)
    }
}

impl fmt::Display for ConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}
