// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fmt;
use std::str::FromStr;

use crate::{Error, Node};

/// A minimal element path, the subset of ElementPath used against domain
/// XML: plain tag steps, either anchored at the root element or searched
/// for anywhere below it (`//tag/...`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodePath {
    anywhere: bool,
    steps: Vec<String>,
}

fn valid_step(step: &str) -> bool {
    !step.is_empty()
        && step
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

impl FromStr for NodePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let (anywhere, rest) = match input
            .strip_prefix(".//")
            .or_else(|| input.strip_prefix("//"))
        {
            Some(rest) => (true, rest),
            None => (
                false,
                input
                    .strip_prefix("./")
                    .or_else(|| input.strip_prefix('/'))
                    .unwrap_or(input),
            ),
        };

        if rest.is_empty() || rest == "." {
            if anywhere {
                return Err(Error::InvalidPath(s.to_owned()));
            }
            return Ok(NodePath::root());
        }

        let mut steps = Vec::new();
        for step in rest.split('/') {
            if step == "." {
                continue;
            }
            if !valid_step(step) {
                return Err(Error::InvalidPath(s.to_owned()));
            }
            steps.push(step.to_owned());
        }

        Ok(NodePath { anywhere, steps })
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.anywhere {
            write!(f, "//{}", self.steps.join("/"))
        } else {
            write!(f, "/{}", self.steps.join("/"))
        }
    }
}

impl NodePath {
    pub fn root() -> Self {
        NodePath::default()
    }

    pub fn is_root(&self) -> bool {
        !self.anywhere && self.steps.is_empty()
    }

    pub fn is_anywhere(&self) -> bool {
        self.anywhere
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn join(&self, tag: &str) -> Result<NodePath, Error> {
        if !valid_step(tag) {
            return Err(Error::InvalidPath(format!("{self}/{tag}")));
        }
        let mut path = self.clone();
        path.steps.push(tag.to_owned());
        Ok(path)
    }

    /// Splits off the last step, returning the parent path and the tag.
    pub fn split_last(&self) -> Option<(NodePath, &str)> {
        let (last, parent) = self.steps.split_last()?;
        if self.anywhere && parent.is_empty() {
            return None;
        }
        Some((
            NodePath {
                anywhere: self.anywhere,
                steps: parent.to_vec(),
            },
            last.as_str(),
        ))
    }

    /// Child index chains, in document order, of every element matching
    /// this path below `root`. The root path yields one empty chain.
    pub(crate) fn locate_all(&self, root: &Node) -> Vec<Vec<usize>> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        if self.anywhere {
            search(root, &self.steps, &mut prefix, &mut out);
        } else {
            descend(root, &self.steps, &mut prefix, &mut out);
        }
        out
    }

    pub(crate) fn locate(&self, root: &Node) -> Option<Vec<usize>> {
        self.locate_all(root).into_iter().next()
    }
}

fn descend(node: &Node, steps: &[String], prefix: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
    let Some((first, rest)) = steps.split_first() else {
        out.push(prefix.clone());
        return;
    };
    for (i, child) in node.children().iter().enumerate() {
        if child.tag() == first {
            prefix.push(i);
            descend(child, rest, prefix, out);
            prefix.pop();
        }
    }
}

fn search(node: &Node, steps: &[String], prefix: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
    for (i, child) in node.children().iter().enumerate() {
        prefix.push(i);
        if child.tag() == steps[0] {
            descend(child, &steps[1..], prefix, out);
        }
        search(child, steps, prefix, out);
        prefix.pop();
    }
}

pub(crate) fn node_at<'a>(root: &'a Node, chain: &[usize]) -> Option<&'a Node> {
    chain
        .iter()
        .try_fold(root, |node, &i| node.children().get(i))
}

pub(crate) fn node_at_mut<'a>(root: &'a mut Node, chain: &[usize]) -> Option<&'a mut Node> {
    chain
        .iter()
        .try_fold(root, |node, &i| node.child_at_mut(i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_paths() {
        assert!(NodePath::from_str("/").unwrap().is_root());
        assert!(NodePath::from_str("").unwrap().is_root());
        assert!(NodePath::from_str(".").unwrap().is_root());

        let p = NodePath::from_str("/cpu/feature").unwrap();
        assert!(!p.is_anywhere());
        assert_eq!(p.steps(), ["cpu", "feature"]);
        assert_eq!(NodePath::from_str("cpu/feature").unwrap(), p);
        assert_eq!(NodePath::from_str("./cpu/./feature").unwrap(), p);

        let p = NodePath::from_str(".//serial/target").unwrap();
        assert!(p.is_anywhere());
        assert_eq!(p.to_string(), "//serial/target");

        NodePath::from_str("//").unwrap_err();
        NodePath::from_str("devices//disk").unwrap_err();
        NodePath::from_str("devices/disk[1]").unwrap_err();
        NodePath::from_str("devices/*").unwrap_err();
        NodePath::from_str("devices/@type").unwrap_err();
    }

    #[test]
    fn test_split_last() {
        let p = NodePath::from_str("/devices/serial").unwrap();
        let (parent, tag) = p.split_last().unwrap();
        assert_eq!(parent.to_string(), "/devices");
        assert_eq!(tag, "serial");
        assert!(NodePath::root().split_last().is_none());
        assert!(NodePath::from_str("//serial").unwrap().split_last().is_none());
    }

    #[test]
    fn test_locate() {
        let root = Node::new("domain")
            .with_child(Node::new("name"))
            .with_child(
                Node::new("devices")
                    .with_child(Node::new("disk").with_child(Node::new("target")))
                    .with_child(Node::new("serial").with_child(Node::new("target"))),
            );

        let p = NodePath::from_str("/devices/serial/target").unwrap();
        assert_eq!(p.locate(&root), Some(vec![1, 1, 0]));

        let p = NodePath::from_str("//target").unwrap();
        assert_eq!(p.locate_all(&root), vec![vec![1, 0, 0], vec![1, 1, 0]]);

        let p = NodePath::from_str("/target").unwrap();
        assert_eq!(p.locate(&root), None);

        assert_eq!(NodePath::root().locate(&root), Some(vec![]));
        assert_eq!(node_at(&root, &[1, 1]).unwrap().tag(), "serial");
        assert!(node_at(&root, &[4]).is_none());
    }
}
