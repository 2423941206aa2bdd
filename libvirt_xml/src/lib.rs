// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! Typed access to libvirt domain XML, backed by `virsh`.
//!
//! Entities such as [`VmXml`] own their document. Property reads and writes
//! only change the in-memory copy; `define` pushes it back to libvirt.

pub mod accessors;
mod errors;
mod vm_cpu_xml;
mod vm_xml;

pub use accessors::{LibvirtXml, Operation, PropertyDescriptor, Selector, Value, ValueKind};
pub use errors::{ErrorKind, LibvirtXmlError};
pub use vm_cpu_xml::{host_cpu_flags, VmCpuXml, VM_CPU_PROPERTIES};
pub use vm_xml::{check_cpu_mode, CpuMode, NumaParams, PrimarySerial, VmXml, VM_PROPERTIES};

pub type Result<T> = std::result::Result<T, LibvirtXmlError>;
