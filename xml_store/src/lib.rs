// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! In-memory store for hierarchical configuration documents such as libvirt
//! domain XML: a parsed element tree, a deterministic serializer, simple
//! path lookups and a temporary file mirroring the serialized form.

mod backing;
mod document;
mod node;
mod path;

use thiserror::Error;

pub use backing::BackingFile;
pub use document::ConfigDocument;
pub use node::Node;
pub use path::NodePath;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed XML near byte {position}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },
    #[error("document is not valid UTF-8")]
    Utf8(#[source] std::str::Utf8Error),
    #[error("element <{0}> is never closed")]
    UnclosedElement(String),
    #[error("closing tag without a matching opening tag")]
    UnmatchedEnd,
    #[error("document has more than one root element")]
    MultipleRoots,
    #[error("document has no root element")]
    NoRoot,
    #[error("text found outside the root element")]
    TextOutsideRoot,
    #[error("invalid path expression: {0:?}")]
    InvalidPath(String),
    #[error("cannot create elements for search path {0}")]
    AmbiguousCreate(String),
    #[error("the root element cannot be removed")]
    RemoveRoot,
    #[error("failed to create backing file")]
    BackingFileCreate(#[source] vmm_sys_util::errno::Error),
    #[error("failed to write backing file")]
    BackingFileWrite(#[source] std::io::Error),
}
