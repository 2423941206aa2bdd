// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::io;
use std::num::ParseIntError;
use std::path::PathBuf;

use thiserror::Error;

use crate::accessors::{Operation, ValueKind};

/// Coarse classification of a [`LibvirtXmlError`], for callers that decide
/// between a test failure and a test error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed document or value.
    Parse,
    /// An expected element or attribute is absent.
    NotFound,
    /// A property declares the attempted operation as forbidden.
    OperationForbidden,
    /// A domain constraint was violated.
    Validation,
    /// `virsh` or the host failed or returned unusable output.
    ExternalTool,
}

#[derive(Error, Debug)]
pub enum LibvirtXmlError {
    #[error("invalid domain document")]
    Document(#[from] xml_store::Error),
    #[error("{property} not found at {location}")]
    NotFound { property: String, location: String },
    #[error("property {property} forbids {operation}")]
    Forbidden {
        property: String,
        operation: Operation,
    },
    #[error("unknown property {0}")]
    UnknownProperty(String),
    #[error("property {property} holds {expected} values")]
    ValueKindMismatch {
        property: String,
        expected: ValueKind,
    },
    #[error("property {property}: {value:?} is not an integer")]
    InvalidInteger {
        property: String,
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("property {property}: {value:?} is not a boolean")]
    InvalidBool { property: String, value: String },
    #[error("the cpu mode {0:?} is invalid")]
    InvalidCpuMode(String),
    #[error("cannot {action} feature {index}, the domain has {count} features")]
    IndexOutOfRange {
        action: &'static str,
        index: usize,
        count: usize,
    },
    #[error("failed to read {}", .path.display())]
    HostInfo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("virsh call failed")]
    Virsh(#[from] virsh::Error),
    #[error("error reported while undefining domain {name}")]
    Undefine {
        name: String,
        #[source]
        source: virsh::Error,
    },
    #[error("error reported while defining domain {name}")]
    Define {
        name: String,
        #[source]
        source: Box<LibvirtXmlError>,
    },
    #[error(
        "defining domain {name} failed and restoring the previous definition also failed \
         ({restore}), the domain is left undefined"
    )]
    RollbackFailed {
        name: String,
        #[source]
        define: Box<LibvirtXmlError>,
        restore: Box<LibvirtXmlError>,
    },
}

impl LibvirtXmlError {
    pub fn kind(&self) -> ErrorKind {
        use LibvirtXmlError::*;
        match self {
            Document(e) => match e {
                xml_store::Error::BackingFileCreate(_) | xml_store::Error::BackingFileWrite(_) => {
                    ErrorKind::ExternalTool
                }
                xml_store::Error::InvalidPath(_)
                | xml_store::Error::AmbiguousCreate(_)
                | xml_store::Error::RemoveRoot => ErrorKind::Validation,
                _ => ErrorKind::Parse,
            },
            NotFound { .. } => ErrorKind::NotFound,
            Forbidden { .. } => ErrorKind::OperationForbidden,
            InvalidInteger { .. } | InvalidBool { .. } => ErrorKind::Parse,
            UnknownProperty(_)
            | ValueKindMismatch { .. }
            | InvalidCpuMode(_)
            | IndexOutOfRange { .. } => ErrorKind::Validation,
            HostInfo { .. }
            | Virsh(_)
            | Undefine { .. }
            | Define { .. }
            | RollbackFailed { .. } => ErrorKind::ExternalTool,
        }
    }

    /// Whether the external definition may be gone after this error.
    pub fn is_undefined_state(&self) -> bool {
        matches!(self, LibvirtXmlError::RollbackFailed { .. })
    }
}
