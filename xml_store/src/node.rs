// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

/// A single element of a configuration document.
///
/// Attributes keep their insertion order so that serializing a parsed
/// document reproduces the attribute layout of the source.
///
/// An element with children never carries blank text: the parser drops
/// inter-element whitespace, so every mutation that adds a child or sets
/// text drops it as well.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Node {
    tag: String,
    attributes: Vec<(String, String)>,
    text: Option<String>,
    children: Vec<Node>,
}

impl Node {
    pub fn new(tag: &str) -> Self {
        Node {
            tag: tag.to_owned(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.set_text(Some(text));
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.push_child(child);
        self
    }

    fn drop_blank_text(&mut self) {
        let blank = self.text.as_deref().is_some_and(|t| t.trim().is_empty());
        if blank && !self.children.is_empty() {
            self.text = None;
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Updates the attribute in place when it already exists, appends it
    /// otherwise.
    pub fn set_attribute(&mut self, name: &str, value: &str) {
        match self.attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_owned(),
            None => self.attributes.push((name.to_owned(), value.to_owned())),
        }
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        let index = self.attributes.iter().position(|(n, _)| n == name)?;
        Some(self.attributes.remove(index).1)
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn set_text(&mut self, text: Option<&str>) {
        self.text = text.map(str::to_owned);
        self.drop_blank_text();
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn child_at_mut(&mut self, index: usize) -> Option<&mut Node> {
        self.children.get_mut(index)
    }

    pub fn child(&self, tag: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.tag == tag)
    }

    pub fn child_mut(&mut self, tag: &str) -> Option<&mut Node> {
        self.children.iter_mut().find(|c| c.tag == tag)
    }

    pub fn children_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |c| c.tag == tag)
    }

    /// Returns the first child named `tag`, creating it at the end of the
    /// child list when missing.
    pub fn child_or_insert(&mut self, tag: &str) -> &mut Node {
        let index = match self.children.iter().position(|c| c.tag == tag) {
            Some(index) => index,
            None => {
                self.children.push(Node::new(tag));
                self.drop_blank_text();
                self.children.len() - 1
            }
        };
        &mut self.children[index]
    }

    pub fn push_child(&mut self, child: Node) -> &mut Node {
        self.children.push(child);
        self.drop_blank_text();
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Replaces every child named `tag` with `nodes`, placed where the first
    /// of the old children was, or at the end when there was none.
    pub fn replace_children_named(&mut self, tag: &str, nodes: Vec<Node>) {
        let at = self
            .children
            .iter()
            .position(|c| c.tag == tag)
            .unwrap_or(self.children.len());
        self.children.retain(|c| c.tag != tag);
        let tail = self.children.split_off(at);
        self.children.extend(nodes);
        self.children.extend(tail);
        self.drop_blank_text();
    }

    pub fn remove_child(&mut self, index: usize) -> Option<Node> {
        if index < self.children.len() {
            Some(self.children.remove(index))
        } else {
            None
        }
    }

    /// Removes the first child named `tag`.
    pub fn remove_child_named(&mut self, tag: &str) -> Option<Node> {
        let index = self.children.iter().position(|c| c.tag == tag)?;
        Some(self.children.remove(index))
    }

    /// Removes every child named `tag` and returns how many were dropped.
    pub fn remove_children_named(&mut self, tag: &str) -> usize {
        let before = self.children.len();
        self.children.retain(|c| c.tag != tag);
        before - self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.text.is_none() && self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_order_is_kept() {
        let mut node = Node::new("serial")
            .with_attribute("type", "pty")
            .with_attribute("id", "0");
        node.set_attribute("type", "file");
        node.set_attribute("extra", "1");

        let attrs: Vec<_> = node.attributes().collect();
        assert_eq!(attrs, vec![("type", "file"), ("id", "0"), ("extra", "1")]);
        assert_eq!(node.remove_attribute("id"), Some("0".to_owned()));
        assert_eq!(node.remove_attribute("id"), None);
    }

    #[test]
    fn test_blank_text_dropped_with_children() {
        let mut node = Node::new("domain").with_text("");
        node.child_or_insert("name");
        assert_eq!(node.text(), None);

        let mut node = Node::new("cpu").with_text("\n  ");
        node.push_child(Node::new("feature"));
        assert_eq!(node.text(), None);
        node.set_text(Some(" "));
        assert_eq!(node.text(), None);

        // Real text is kept next to children
        let node = Node::new("metadata")
            .with_text(" x ")
            .with_child(Node::new("inner"));
        assert_eq!(node.text(), Some(" x "));

        // Leaves keep blank text
        let node = Node::new("c").with_text(" ");
        assert_eq!(node.text(), Some(" "));
    }

    #[test]
    fn test_replace_children_named() {
        let mut node = Node::new("cpu")
            .with_child(Node::new("model"))
            .with_child(Node::new("feature").with_attribute("name", "a"))
            .with_child(Node::new("feature").with_attribute("name", "b"))
            .with_child(Node::new("numa"));
        node.replace_children_named(
            "feature",
            vec![Node::new("feature").with_attribute("name", "c")],
        );
        let tags: Vec<_> = node.children().iter().map(|n| n.tag()).collect();
        assert_eq!(tags, vec!["model", "feature", "numa"]);
        assert_eq!(node.children()[1].attribute("name"), Some("c"));

        let mut node = Node::new("cpu").with_text("");
        node.replace_children_named("feature", vec![Node::new("feature")]);
        assert_eq!(node.text(), None);
        assert_eq!(node.children().len(), 1);
    }

    #[test]
    fn test_child_or_insert() {
        let mut node = Node::new("domain");
        node.child_or_insert("devices").set_attribute("x", "1");
        node.child_or_insert("devices").set_attribute("y", "2");
        assert_eq!(node.children().len(), 1);
        assert_eq!(node.child("devices").unwrap().attribute("y"), Some("2"));
        assert_eq!(node.remove_children_named("devices"), 1);
        assert!(node.is_empty());
    }
}
