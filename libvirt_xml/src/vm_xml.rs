// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use log::{debug, error, info, warn};
use virsh::{DumpXmlFlags, Virsh};
use xml_store::{ConfigDocument, Node};

use crate::accessors::{self, LibvirtXml, PropertyDescriptor};
use crate::{LibvirtXmlError, Result};

pub(crate) const HYPERVISOR_TYPE: PropertyDescriptor =
    PropertyDescriptor::attribute("hypervisor_type", "/", "domain", "type");
pub(crate) const VM_NAME: PropertyDescriptor = PropertyDescriptor::text("vm_name", "/", "name");
pub(crate) const UUID: PropertyDescriptor = PropertyDescriptor::text("uuid", "/", "uuid");
pub(crate) const VCPU: PropertyDescriptor = PropertyDescriptor::int("vcpu", "/", "vcpu");
pub(crate) const MAX_MEM: PropertyDescriptor = PropertyDescriptor::int("max_mem", "/", "memory");
pub(crate) const CURRENT_MEM: PropertyDescriptor =
    PropertyDescriptor::int("current_mem", "/", "currentMemory");

pub const VM_PROPERTIES: &[PropertyDescriptor] =
    &[HYPERVISOR_TYPE, VM_NAME, UUID, VCPU, MAX_MEM, CURRENT_MEM];

/// CPU modes libvirt accepts in `<cpu mode=...>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuMode {
    Custom,
    HostModel,
    HostPassthrough,
}

impl CpuMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CpuMode::Custom => "custom",
            CpuMode::HostModel => "host-model",
            CpuMode::HostPassthrough => "host-passthrough",
        }
    }
}

impl FromStr for CpuMode {
    type Err = LibvirtXmlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "custom" => Ok(CpuMode::Custom),
            "host-model" => Ok(CpuMode::HostModel),
            "host-passthrough" => Ok(CpuMode::HostPassthrough),
            _ => Err(LibvirtXmlError::InvalidCpuMode(s.to_owned())),
        }
    }
}

impl fmt::Display for CpuMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validates `mode`, surrounding whitespace aside.
pub fn check_cpu_mode(mode: &str) -> Result<CpuMode> {
    mode.parse()
}

/// Memory tuning from `<numatune><memory mode=.. nodeset=../>`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NumaParams {
    pub mode: Option<String>,
    pub nodeset: Option<String>,
}

/// The first `<serial>` device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrimarySerial {
    pub serial_type: String,
    pub port: Option<String>,
    pub path: Option<String>,
}

/// A libvirt domain definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmXml {
    doc: ConfigDocument,
}

impl LibvirtXml for VmXml {
    fn document(&self) -> &ConfigDocument {
        &self.doc
    }

    fn document_mut(&mut self) -> &mut ConfigDocument {
        &mut self.doc
    }

    fn properties(&self) -> &'static [PropertyDescriptor] {
        VM_PROPERTIES
    }
}

impl fmt::Display for VmXml {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.doc)
    }
}

impl VmXml {
    /// A bare `<domain type='..'/>` to build upon.
    pub fn new(hypervisor_type: &str) -> Self {
        VmXml {
            doc: ConfigDocument::new(Node::new("domain").with_attribute("type", hypervisor_type)),
        }
    }

    pub fn from_xml(xml: &str) -> Result<Self> {
        Ok(VmXml {
            doc: ConfigDocument::parse(xml)?,
        })
    }

    pub(crate) fn from_document(doc: ConfigDocument) -> Self {
        VmXml { doc }
    }

    pub(crate) fn into_document(self) -> ConfigDocument {
        self.doc
    }

    /// Loads the current definition of `name`.
    pub fn new_from_dumpxml(virsh: &dyn Virsh, name: &str) -> Result<Self> {
        Self::dumpxml_with_flags(virsh, name, DumpXmlFlags::empty())
    }

    pub(crate) fn dumpxml_with_flags(
        virsh: &dyn Virsh,
        name: &str,
        flags: DumpXmlFlags,
    ) -> Result<Self> {
        let xml = virsh.dumpxml(name, flags)?;
        VmXml::from_xml(&xml)
    }

    pub fn hypervisor_type(&self) -> Result<String> {
        accessors::get_text(&self.doc, &HYPERVISOR_TYPE)
    }

    pub fn set_hypervisor_type(&mut self, value: &str) -> Result<()> {
        accessors::set(&mut self.doc, &HYPERVISOR_TYPE, value.into())
    }

    pub fn vm_name(&self) -> Result<String> {
        accessors::get_text(&self.doc, &VM_NAME)
    }

    pub fn set_vm_name(&mut self, value: &str) -> Result<()> {
        accessors::set(&mut self.doc, &VM_NAME, value.into())
    }

    pub fn uuid(&self) -> Result<String> {
        accessors::get_text(&self.doc, &UUID)
    }

    pub fn set_uuid(&mut self, value: &str) -> Result<()> {
        accessors::set(&mut self.doc, &UUID, value.into())
    }

    pub fn del_uuid(&mut self) -> Result<()> {
        accessors::del(&mut self.doc, &UUID)
    }

    pub fn vcpu(&self) -> Result<i64> {
        accessors::get_int(&self.doc, &VCPU)
    }

    pub fn set_vcpu(&mut self, value: i64) -> Result<()> {
        accessors::set(&mut self.doc, &VCPU, value.into())
    }

    pub fn del_vcpu(&mut self) -> Result<()> {
        accessors::del(&mut self.doc, &VCPU)
    }

    pub fn max_mem(&self) -> Result<i64> {
        accessors::get_int(&self.doc, &MAX_MEM)
    }

    pub fn set_max_mem(&mut self, value: i64) -> Result<()> {
        accessors::set(&mut self.doc, &MAX_MEM, value.into())
    }

    pub fn current_mem(&self) -> Result<i64> {
        accessors::get_int(&self.doc, &CURRENT_MEM)
    }

    pub fn set_current_mem(&mut self, value: i64) -> Result<()> {
        accessors::set(&mut self.doc, &CURRENT_MEM, value.into())
    }

    fn rename_in_place(
        &mut self,
        virsh: &dyn Virsh,
        new_name: &str,
        uuid: Option<&str>,
    ) -> Result<()> {
        self.set_vm_name(new_name)?;
        match uuid {
            Some(uuid) => self.set_uuid(uuid)?,
            // libvirt generates a fresh one
            None => self.del_uuid()?,
        }
        self.define(virsh)
    }

    /// Renames domain `name` to `new_name`, shutting it down first if it is
    /// running. Without `uuid` the identity is dropped and libvirt assigns
    /// a new one.
    ///
    /// When defining the renamed domain fails, the previous definition is
    /// restored and [`LibvirtXmlError::Define`] returned. If the restore
    /// fails as well the domain is left undefined and
    /// [`LibvirtXmlError::RollbackFailed`] carries both failures.
    pub fn vm_rename(
        virsh: &dyn Virsh,
        name: &str,
        new_name: &str,
        uuid: Option<&str>,
        shutdown_timeout: Duration,
    ) -> Result<VmXml> {
        virsh.deactivate(name, shutdown_timeout)?;

        let mut vmxml = VmXml::new_from_dumpxml(virsh, name)?;
        let mut backup = vmxml.clone();

        virsh
            .undefine(name)
            .map_err(|source| LibvirtXmlError::Undefine {
                name: name.to_owned(),
                source,
            })?;

        debug!("Rename {name} to {new_name}");
        if let Err(define) = vmxml.rename_in_place(virsh, new_name, uuid) {
            warn!("Defining {new_name} failed, restoring {name}: {define}");
            return Err(match backup.define(virsh) {
                Ok(()) => LibvirtXmlError::Define {
                    name: new_name.to_owned(),
                    source: Box::new(define),
                },
                Err(restore) => {
                    error!("Restoring {name} failed, the domain is undefined: {restore}");
                    LibvirtXmlError::RollbackFailed {
                        name: name.to_owned(),
                        define: Box::new(define),
                        restore: Box::new(restore),
                    }
                }
            });
        }

        info!("Renamed domain {name} to {new_name}");
        Ok(vmxml)
    }

    /// Sets the vCPU count of domain `name`, or removes the element when
    /// `value` is `None`.
    pub fn set_vm_vcpus(virsh: &dyn Virsh, name: &str, value: Option<i64>) -> Result<()> {
        let mut vmxml = VmXml::new_from_dumpxml(virsh, name)?;
        match value {
            Some(value) => vmxml.set_vcpu(value)?,
            None => vmxml.del_vcpu()?,
        }
        vmxml.define(virsh)
    }

    /// Disk devices keyed by target device name.
    pub fn get_disk_all(&self) -> BTreeMap<String, &Node> {
        let mut disks = BTreeMap::new();
        let Some(devices) = self.doc.root().child("devices") else {
            return disks;
        };
        for disk in devices.children_named("disk") {
            match disk.child("target").and_then(|t| t.attribute("dev")) {
                Some(dev) => {
                    disks.insert(dev.to_owned(), disk);
                }
                None => warn!("Skipping disk without target device"),
            }
        }
        disks
    }

    /// Target device names of the disks of domain `name`.
    pub fn get_disk_blk(virsh: &dyn Virsh, name: &str) -> Result<Vec<String>> {
        let vmxml = VmXml::new_from_dumpxml(virsh, name)?;
        Ok(vmxml.get_disk_all().into_keys().collect())
    }

    pub fn get_disk_count(virsh: &dyn Virsh, name: &str) -> Result<usize> {
        let vmxml = VmXml::new_from_dumpxml(virsh, name)?;
        Ok(vmxml.get_disk_all().len())
    }

    pub fn get_numa_params(&self) -> NumaParams {
        let Some(numatune) = self.doc.root().child("numatune") else {
            warn!("Can't find <numatune> element");
            return NumaParams::default();
        };
        let Some(memory) = numatune.child("memory") else {
            warn!("Can't find <memory> element");
            return NumaParams::default();
        };
        NumaParams {
            mode: memory.attribute("mode").map(str::to_owned),
            nodeset: memory.attribute("nodeset").map(str::to_owned),
        }
    }

    pub fn numa_params(virsh: &dyn Virsh, name: &str) -> Result<NumaParams> {
        Ok(VmXml::new_from_dumpxml(virsh, name)?.get_numa_params())
    }

    pub fn get_primary_serial(&self) -> Result<PrimarySerial> {
        let serial = self
            .doc
            .find("/devices/serial")?
            .ok_or_else(|| LibvirtXmlError::NotFound {
                property: "serial".to_owned(),
                location: "/devices/serial".to_owned(),
            })?;
        let serial_type = serial
            .attribute("type")
            .ok_or_else(|| LibvirtXmlError::NotFound {
                property: "serial type".to_owned(),
                location: "/devices/serial@type".to_owned(),
            })?;
        Ok(PrimarySerial {
            serial_type: serial_type.to_owned(),
            port: serial
                .child("target")
                .and_then(|t| t.attribute("port"))
                .map(str::to_owned),
            path: serial
                .child("source")
                .and_then(|s| s.attribute("path"))
                .map(str::to_owned),
        })
    }

    /// Updates the first serial device, creating a `pty` one on port 0 when
    /// the domain has none. A `None` path drops the source path.
    pub fn apply_primary_serial(
        &mut self,
        serial_type: &str,
        port: &str,
        path: Option<&str>,
    ) -> Result<()> {
        let devices = self.doc.ensure("/devices")?;
        let index = match devices.children().iter().position(|c| c.tag() == "serial") {
            Some(index) => index,
            None => {
                debug!("Can not find any serial, now create one");
                devices.push_child(
                    Node::new("serial")
                        .with_attribute("type", "pty")
                        .with_child(Node::new("target").with_attribute("port", "0")),
                );
                devices.children().len() - 1
            }
        };

        let serial = devices
            .child_at_mut(index)
            .ok_or_else(|| LibvirtXmlError::NotFound {
                property: "serial".to_owned(),
                location: "/devices".to_owned(),
            })?;
        serial.set_attribute("type", serial_type);
        serial.child_or_insert("target").set_attribute("port", port);
        match path {
            Some(path) => serial.child_or_insert("source").set_attribute("path", path),
            None => {
                if let Some(source) = serial.child_mut("source") {
                    source.remove_attribute("path");
                    if source.is_empty() {
                        serial.remove_child_named("source");
                    }
                }
            }
        }
        Ok(())
    }

    pub fn set_primary_serial(
        virsh: &dyn Virsh,
        name: &str,
        serial_type: &str,
        port: &str,
        path: Option<&str>,
    ) -> Result<()> {
        let mut vmxml = VmXml::new_from_dumpxml(virsh, name)?;
        vmxml.apply_primary_serial(serial_type, port, path)?;
        vmxml.define(virsh)
    }

    pub fn apply_cpu_mode(&mut self, mode: CpuMode) -> Result<()> {
        let cpu = self.doc.ensure("/cpu")?;
        match cpu.attribute("mode") {
            Some(current) => debug!("Current cpu mode is {current:?}"),
            None => debug!("No cpu mode set"),
        }
        cpu.set_attribute("mode", mode.as_str());
        Ok(())
    }

    /// Sets the CPU mode of domain `name`. The mode is checked before
    /// libvirt is contacted.
    pub fn set_cpu_mode(virsh: &dyn Virsh, name: &str, mode: &str) -> Result<()> {
        let mode = check_cpu_mode(mode)?;
        let mut vmxml = VmXml::new_from_dumpxml(virsh, name)?;
        vmxml.apply_cpu_mode(mode)?;
        vmxml.define(virsh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_cpu_mode() {
        assert_eq!(check_cpu_mode("custom").unwrap(), CpuMode::Custom);
        assert_eq!(check_cpu_mode(" host-model\n").unwrap(), CpuMode::HostModel);
        assert_eq!(
            check_cpu_mode("host-passthrough").unwrap(),
            CpuMode::HostPassthrough
        );
        for mode in ["", "Custom", "HOST-MODEL", "host_model", "host", "host-model x"] {
            let err = check_cpu_mode(mode).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{mode:?}");
        }
        assert_eq!(CpuMode::HostPassthrough.to_string(), "host-passthrough");
    }

    #[test]
    fn test_bare_template_round_trip() {
        let mut vmxml = VmXml::from_xml("<domain type='kvm'></domain>").unwrap();
        vmxml.set_vm_name("vm1").unwrap();
        vmxml.set_vcpu(2).unwrap();
        vmxml.apply_primary_serial("pty", "0", None).unwrap();

        let xml = vmxml.xml();
        assert!(xml.starts_with("<domain type='kvm'>\n  <name>vm1</name>\n"));
        assert_eq!(VmXml::from_xml(&xml).unwrap(), vmxml);
    }

    #[test]
    fn test_new_and_properties() {
        let mut vmxml = VmXml::new("kvm");
        assert_eq!(vmxml.hypervisor_type().unwrap(), "kvm");
        assert_eq!(vmxml.vm_name().unwrap_err().kind(), ErrorKind::NotFound);

        vmxml.set_vm_name("vm1").unwrap();
        vmxml.set_vcpu(4).unwrap();
        vmxml.set_max_mem(2097152).unwrap();
        vmxml.set_current_mem(1048576).unwrap();
        vmxml.set_uuid("c1e7a1a4-5d9c-4c3b-8e84-3f0f2c9b6a01").unwrap();
        vmxml.set_hypervisor_type("qemu").unwrap();

        let reparsed = VmXml::from_xml(&vmxml.to_string()).unwrap();
        assert_eq!(reparsed, vmxml);
        assert_eq!(reparsed.vm_name().unwrap(), "vm1");
        assert_eq!(reparsed.vcpu().unwrap(), 4);
        assert_eq!(reparsed.max_mem().unwrap(), 2097152);
        assert_eq!(reparsed.current_mem().unwrap(), 1048576);
        assert_eq!(reparsed.hypervisor_type().unwrap(), "qemu");

        vmxml.del_uuid().unwrap();
        vmxml.del_vcpu().unwrap();
        assert!(vmxml.document().find("uuid").unwrap().is_none());
        assert!(vmxml.document().find("vcpu").unwrap().is_none());
    }

    #[test]
    fn test_properties_by_name() {
        let mut vmxml = VmXml::new("kvm");
        vmxml.set_str("vcpu", "8").unwrap();
        assert_eq!(vmxml.get("vcpu").unwrap(), accessors::Value::Int(8));
        vmxml.set("vm_name", "vm2".into()).unwrap();
        assert_eq!(vmxml.get("vm_name").unwrap().to_string(), "vm2");
        vmxml.del("vm_name").unwrap();
        assert!(matches!(
            vmxml.get("model"),
            Err(LibvirtXmlError::UnknownProperty(_))
        ));
        assert!(matches!(
            vmxml.set_str("max_mem", "lots"),
            Err(LibvirtXmlError::InvalidInteger { .. })
        ));
    }

    #[test]
    fn test_disks_and_numa() {
        let vmxml = VmXml::from_xml(
            "<domain type='kvm'>\
             <numatune><memory mode='strict' nodeset='0-1'/></numatune>\
             <devices>\
             <disk type='file'><target dev='vdb'/></disk>\
             <disk type='file'><target dev='vda'/></disk>\
             <disk type='file'/>\
             <interface type='network'/>\
             </devices></domain>",
        )
        .unwrap();
        let disks = vmxml.get_disk_all();
        assert_eq!(disks.keys().collect::<Vec<_>>(), ["vda", "vdb"]);
        assert_eq!(disks["vda"].tag(), "disk");
        assert_eq!(
            vmxml.get_numa_params(),
            NumaParams {
                mode: Some("strict".to_owned()),
                nodeset: Some("0-1".to_owned()),
            }
        );

        let bare = VmXml::new("kvm");
        assert!(bare.get_disk_all().is_empty());
        assert_eq!(bare.get_numa_params(), NumaParams::default());
    }

    #[test]
    fn test_primary_serial() {
        let mut vmxml = VmXml::new("kvm");
        assert_eq!(vmxml.get_primary_serial().unwrap_err().kind(), ErrorKind::NotFound);

        vmxml.apply_primary_serial("pty", "0", None).unwrap();
        assert_eq!(
            vmxml.get_primary_serial().unwrap(),
            PrimarySerial {
                serial_type: "pty".to_owned(),
                port: Some("0".to_owned()),
                path: None,
            }
        );

        vmxml
            .apply_primary_serial("file", "1", Some("/tmp/serial.log"))
            .unwrap();
        let serial = vmxml.get_primary_serial().unwrap();
        assert_eq!(serial.serial_type, "file");
        assert_eq!(serial.port.as_deref(), Some("1"));
        assert_eq!(serial.path.as_deref(), Some("/tmp/serial.log"));

        vmxml.apply_primary_serial("file", "1", None).unwrap();
        assert_eq!(vmxml.get_primary_serial().unwrap().path, None);
        assert!(vmxml
            .document()
            .find("/devices/serial/source")
            .unwrap()
            .is_none());
        assert_eq!(vmxml.document().find_all("//serial").unwrap().len(), 1);
    }

    #[test]
    fn test_serial_source_keeps_other_attributes() {
        let mut vmxml = VmXml::from_xml(
            "<domain><devices><serial type='tcp'>\
             <source mode='bind' path='/x'/><target port='0'/>\
             </serial></devices></domain>",
        )
        .unwrap();
        vmxml.apply_primary_serial("tcp", "0", None).unwrap();
        let source = vmxml
            .document()
            .find("/devices/serial/source")
            .unwrap()
            .unwrap();
        assert_eq!(source.attribute("mode"), Some("bind"));
        assert_eq!(source.attribute("path"), None);
    }

    #[test]
    fn test_apply_cpu_mode() {
        let mut vmxml = VmXml::new("kvm");
        vmxml.apply_cpu_mode(CpuMode::HostModel).unwrap();
        assert_eq!(
            vmxml.document().find("cpu").unwrap().unwrap().attribute("mode"),
            Some("host-model")
        );
        vmxml.apply_cpu_mode(CpuMode::Custom).unwrap();
        assert_eq!(vmxml.document().find_all("cpu").unwrap().len(), 1);
        assert_eq!(
            vmxml.document().find("cpu").unwrap().unwrap().attribute("mode"),
            Some("custom")
        );
    }
}
