// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

use virsh::{DumpXmlFlags, Virsh};
use xml_store::{ConfigDocument, Node};

use crate::accessors::{self, LibvirtXml, Operation, PropertyDescriptor};
use crate::vm_xml::{CURRENT_MEM, HYPERVISOR_TYPE, MAX_MEM, UUID, VCPU, VM_NAME};
use crate::{LibvirtXmlError, Result, VmXml};

const CPUINFO: &str = "/proc/cpuinfo";

const MODEL: PropertyDescriptor =
    PropertyDescriptor::text("model", "/cpu", "model").forbid(&[Operation::Del]);
const VENDOR: PropertyDescriptor =
    PropertyDescriptor::text("vendor", "/cpu", "vendor").forbid(&[Operation::Del]);
// Features are changed one at a time through VmCpuXml.
const FEATURE_LIST: PropertyDescriptor =
    PropertyDescriptor::node_list("feature_list", "/cpu", "feature")
        .forbid(&[Operation::Set, Operation::Del]);

pub const VM_CPU_PROPERTIES: &[PropertyDescriptor] = &[
    HYPERVISOR_TYPE,
    VM_NAME,
    UUID,
    VCPU,
    MAX_MEM,
    CURRENT_MEM,
    MODEL,
    VENDOR,
    FEATURE_LIST,
];

/// Flags listed on the `flags` lines of a `/proc/cpuinfo` dump.
pub fn host_cpu_flags(cpuinfo: &str) -> BTreeSet<&str> {
    cpuinfo
        .lines()
        .filter_map(|line| line.split_once(':'))
        .filter(|(key, _)| key.trim() == "flags")
        .flat_map(|(_, flags)| flags.split_whitespace())
        .collect()
}

/// A domain definition as seen through its `<cpu>` element, loaded with
/// the host CPU model expanded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmCpuXml {
    doc: ConfigDocument,
}

impl LibvirtXml for VmCpuXml {
    fn document(&self) -> &ConfigDocument {
        &self.doc
    }

    fn document_mut(&mut self) -> &mut ConfigDocument {
        &mut self.doc
    }

    fn properties(&self) -> &'static [PropertyDescriptor] {
        VM_CPU_PROPERTIES
    }
}

impl fmt::Display for VmCpuXml {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.doc)
    }
}

impl From<VmXml> for VmCpuXml {
    fn from(vmxml: VmXml) -> Self {
        VmCpuXml {
            doc: vmxml.into_document(),
        }
    }
}

impl From<VmCpuXml> for VmXml {
    fn from(cpuxml: VmCpuXml) -> Self {
        VmXml::from_document(cpuxml.doc)
    }
}

impl VmCpuXml {
    /// Switches domain `name` to CPU `mode`, then loads its definition with
    /// `--update-cpu`.
    pub fn new(virsh: &dyn Virsh, name: &str, mode: &str) -> Result<Self> {
        VmXml::set_cpu_mode(virsh, name, mode)?;
        let vmxml = VmXml::dumpxml_with_flags(virsh, name, DumpXmlFlags::UPDATE_CPU)?;
        Ok(vmxml.into())
    }

    pub fn from_xml(xml: &str) -> Result<Self> {
        Ok(VmXml::from_xml(xml)?.into())
    }

    pub fn model(&self) -> Result<String> {
        accessors::get_text(&self.doc, &MODEL)
    }

    pub fn set_model(&mut self, value: &str) -> Result<()> {
        accessors::set(&mut self.doc, &MODEL, value.into())
    }

    pub fn vendor(&self) -> Result<String> {
        accessors::get_text(&self.doc, &VENDOR)
    }

    pub fn set_vendor(&mut self, value: &str) -> Result<()> {
        accessors::set(&mut self.doc, &VENDOR, value.into())
    }

    pub fn feature_list(&self) -> Result<Vec<&Node>> {
        accessors::get_nodes(&self.doc, &FEATURE_LIST)
    }

    pub fn feature_count(&self) -> usize {
        self.doc
            .find("/cpu")
            .ok()
            .flatten()
            .map_or(0, |cpu| cpu.children_named("feature").count())
    }

    // Position of feature `index` among the children of <cpu>.
    fn feature_position(&self, action: &'static str, index: usize) -> Result<usize> {
        let count = self.feature_count();
        let position = self.doc.find("/cpu")?.and_then(|cpu| {
            cpu.children()
                .iter()
                .enumerate()
                .filter(|(_, c)| c.tag() == "feature")
                .nth(index)
                .map(|(i, _)| i)
        });
        position.ok_or(LibvirtXmlError::IndexOutOfRange {
            action,
            index,
            count,
        })
    }

    fn cpu_mut(&mut self) -> Result<&mut Node> {
        self.doc
            .find_mut("/cpu")?
            .ok_or_else(|| LibvirtXmlError::NotFound {
                property: "cpu".to_owned(),
                location: "/cpu".to_owned(),
            })
    }

    /// Name of feature `index`, `None` for a feature without one.
    pub fn get_feature_name(&self, index: usize) -> Result<Option<&str>> {
        let position = self.feature_position("get", index)?;
        Ok(self
            .doc
            .find("/cpu")?
            .and_then(|cpu| cpu.children().get(position))
            .and_then(|feature| feature.attribute("name")))
    }

    pub fn set_feature(&mut self, index: usize, value: &str) -> Result<()> {
        let position = self.feature_position("set", index)?;
        if let Some(feature) = self.cpu_mut()?.child_at_mut(position) {
            feature.set_attribute("name", value);
        }
        Ok(())
    }

    pub fn remove_feature(&mut self, index: usize) -> Result<Node> {
        let count = self.feature_count();
        let position = self.feature_position("remove", index)?;
        self.cpu_mut()?
            .remove_child(position)
            .ok_or(LibvirtXmlError::IndexOutOfRange {
                action: "remove",
                index,
                count,
            })
    }

    /// Appends a feature, creating `<cpu>` when missing.
    pub fn add_feature(&mut self, value: &str) -> Result<()> {
        self.doc
            .ensure("/cpu")?
            .push_child(Node::new("feature").with_attribute("name", value));
        Ok(())
    }

    /// Whether the host CPU advertises `value`.
    pub fn check_feature_name(&self, value: &str) -> Result<bool> {
        check_feature_name_in(Path::new(CPUINFO), value)
    }
}

fn check_feature_name_in(cpuinfo: &Path, value: &str) -> Result<bool> {
    let contents = fs::read_to_string(cpuinfo).map_err(|source| LibvirtXmlError::HostInfo {
        path: cpuinfo.to_path_buf(),
        source,
    })?;
    Ok(host_cpu_flags(&contents).contains(value))
}
