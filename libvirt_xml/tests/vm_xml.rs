// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

mod common;

use std::time::Duration;

use common::{FakeVirsh, DOMAIN_XML, NO_TIMEOUT};
use libvirt_xml::{ErrorKind, LibvirtXml, LibvirtXmlError, VmCpuXml, VmXml};
use virsh::DomainState;

#[test]
fn test_load_and_define() {
    let virsh = FakeVirsh::with_domain(DOMAIN_XML);

    let mut vmxml = VmXml::new_from_dumpxml(&virsh, "vm1").unwrap();
    assert_eq!(vmxml.vm_name().unwrap(), "vm1");
    assert_eq!(vmxml.vcpu().unwrap(), 2);
    assert_eq!(vmxml.max_mem().unwrap(), 1048576);

    vmxml.set_current_mem(524288).unwrap();
    // Nothing reaches libvirt before define
    assert_eq!(
        virsh.definition("vm1").unwrap().find("currentMemory").unwrap().unwrap().text(),
        Some("1048576")
    );
    vmxml.define(&virsh).unwrap();
    assert_eq!(virsh.definition("vm1").unwrap(), *vmxml.document());

    vmxml.undefine(&virsh).unwrap();
    assert!(virsh.names().is_empty());
    // The document survives and can be defined again
    vmxml.define(&virsh).unwrap();
    assert_eq!(virsh.names(), ["vm1"]);
}

#[test]
fn test_load_missing_domain() {
    let virsh = FakeVirsh::default();
    let err = VmXml::new_from_dumpxml(&virsh, "ghost").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalTool);
    assert!(matches!(
        err,
        LibvirtXmlError::Virsh(virsh::Error::CommandFailed { .. })
    ));
}

#[test]
fn test_rename() {
    let virsh = FakeVirsh::with_domain(DOMAIN_XML);

    let vmxml = VmXml::vm_rename(&virsh, "vm1", "vm2", None, NO_TIMEOUT).unwrap();
    assert_eq!(vmxml.vm_name().unwrap(), "vm2");
    assert_eq!(virsh.names(), ["vm2"]);
    let defined = virsh.definition("vm2").unwrap();
    assert!(defined.find("uuid").unwrap().is_none());
    assert_eq!(
        defined.find("/devices/disk/target").unwrap().unwrap().attribute("dev"),
        Some("vda")
    );

    let uuid = "0b4e8a3e-7cf3-4b57-9d39-5a1c6c2f1f10";
    VmXml::vm_rename(&virsh, "vm2", "vm3", Some(uuid), NO_TIMEOUT).unwrap();
    assert_eq!(
        virsh.definition("vm3").unwrap().find("uuid").unwrap().unwrap().text(),
        Some(uuid)
    );
}

#[test]
fn test_rename_shuts_down_running_domain() {
    let virsh = FakeVirsh::with_domain(DOMAIN_XML);
    virsh.set_state("vm1", DomainState::Running);

    VmXml::vm_rename(&virsh, "vm1", "vm2", None, Duration::from_secs(5)).unwrap();
    assert_eq!(
        &virsh.calls()[..5],
        [
            "domstate vm1",
            "shutdown vm1",
            "domstate vm1",
            "dumpxml vm1",
            "undefine vm1"
        ]
    );
}

#[test]
fn test_rename_undefine_failure() {
    let virsh = FakeVirsh::with_domain(DOMAIN_XML);
    virsh.undefine_fails.set(true);

    let err = VmXml::vm_rename(&virsh, "vm1", "vm2", None, NO_TIMEOUT).unwrap_err();
    assert!(matches!(err, LibvirtXmlError::Undefine { ref name, .. } if name == "vm1"));
    assert_eq!(virsh.names(), ["vm1"]);
    assert!(!virsh.calls().iter().any(|c| c.starts_with("define")));
}

#[test]
fn test_rename_define_failure_restores() {
    let virsh = FakeVirsh::with_domain(DOMAIN_XML);
    virsh.define_failures.set(1);

    let err = VmXml::vm_rename(&virsh, "vm1", "vm2", None, NO_TIMEOUT).unwrap_err();
    assert!(matches!(err, LibvirtXmlError::Define { ref name, .. } if name == "vm2"));
    assert!(!err.is_undefined_state());
    assert_eq!(virsh.names(), ["vm1"]);
    assert_eq!(
        virsh.definition("vm1"),
        Some(xml_store::ConfigDocument::parse(DOMAIN_XML).unwrap())
    );
    assert_eq!(
        &virsh.calls()[virsh.calls().len() - 2..],
        ["define vm2", "define vm1"]
    );
}

#[test]
fn test_rename_rollback_failure_reports_both() {
    let virsh = FakeVirsh::with_domain(DOMAIN_XML);
    virsh.define_failures.set(2);

    let err = VmXml::vm_rename(&virsh, "vm1", "vm2", None, NO_TIMEOUT).unwrap_err();
    assert!(err.is_undefined_state());
    match err {
        LibvirtXmlError::RollbackFailed {
            name,
            define,
            restore,
        } => {
            assert_eq!(name, "vm1");
            assert!(matches!(*define, LibvirtXmlError::Virsh(_)));
            assert!(matches!(*restore, LibvirtXmlError::Virsh(_)));
        }
        e => panic!("unexpected error: {e}"),
    }
    assert!(virsh.names().is_empty());
}

#[test]
fn test_set_vm_vcpus() {
    let virsh = FakeVirsh::with_domain(DOMAIN_XML);

    VmXml::set_vm_vcpus(&virsh, "vm1", Some(8)).unwrap();
    assert_eq!(VmXml::new_from_dumpxml(&virsh, "vm1").unwrap().vcpu().unwrap(), 8);

    VmXml::set_vm_vcpus(&virsh, "vm1", None).unwrap();
    let vmxml = VmXml::new_from_dumpxml(&virsh, "vm1").unwrap();
    assert_eq!(vmxml.vcpu().unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn test_disks_of_defined_domain() {
    let virsh = FakeVirsh::with_domain(DOMAIN_XML);
    assert_eq!(VmXml::get_disk_blk(&virsh, "vm1").unwrap(), ["hdc", "vda"]);
    assert_eq!(VmXml::get_disk_count(&virsh, "vm1").unwrap(), 2);
    assert_eq!(
        VmXml::numa_params(&virsh, "vm1").unwrap(),
        libvirt_xml::NumaParams::default()
    );
}

#[test]
fn test_set_primary_serial() {
    let virsh = FakeVirsh::with_domain(DOMAIN_XML);

    VmXml::set_primary_serial(&virsh, "vm1", "pty", "0", None).unwrap();
    let doc = virsh.definition("vm1").unwrap();
    let serials = doc.find_all("/devices/serial").unwrap();
    assert_eq!(serials.len(), 1);
    assert_eq!(serials[0].attribute("type"), Some("pty"));
    assert_eq!(
        serials[0].child("target").unwrap().attribute("port"),
        Some("0")
    );
    assert!(serials[0].child("source").is_none());

    VmXml::set_primary_serial(&virsh, "vm1", "pty", "0", Some("/dev/pts/3")).unwrap();
    let serial = VmXml::new_from_dumpxml(&virsh, "vm1")
        .unwrap()
        .get_primary_serial()
        .unwrap();
    assert_eq!(serial.path.as_deref(), Some("/dev/pts/3"));

    VmXml::set_primary_serial(&virsh, "vm1", "pty", "0", None).unwrap();
    let serial = VmXml::new_from_dumpxml(&virsh, "vm1")
        .unwrap()
        .get_primary_serial()
        .unwrap();
    assert_eq!(serial.serial_type, "pty");
    assert_eq!(serial.port.as_deref(), Some("0"));
    assert_eq!(serial.path, None);
    assert_eq!(
        virsh.definition("vm1").unwrap().find_all("//serial").unwrap().len(),
        1
    );
}

#[test]
fn test_set_cpu_mode() {
    let virsh = FakeVirsh::with_domain(DOMAIN_XML);

    let err = VmXml::set_cpu_mode(&virsh, "vm1", "Host-Model").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(virsh.calls().is_empty());

    VmXml::set_cpu_mode(&virsh, "vm1", " host-passthrough ").unwrap();
    assert_eq!(
        virsh.definition("vm1").unwrap().find("cpu").unwrap().unwrap().attribute("mode"),
        Some("host-passthrough")
    );
}

#[test]
fn test_vm_cpu_xml() {
    let virsh = FakeVirsh::with_domain(DOMAIN_XML);

    let mut cpuxml = VmCpuXml::new(&virsh, "vm1", "custom").unwrap();
    assert_eq!(
        virsh.calls(),
        ["dumpxml vm1", "define vm1", "dumpxml --update-cpu vm1"]
    );
    assert_eq!(cpuxml.feature_count(), 0);

    cpuxml.add_feature("vmx").unwrap();
    cpuxml.set_model("Westmere").unwrap();
    cpuxml.define(&virsh).unwrap();

    let defined = virsh.definition("vm1").unwrap();
    let cpu = defined.find("cpu").unwrap().unwrap();
    assert_eq!(cpu.attribute("mode"), Some("custom"));
    assert_eq!(cpu.child("feature").unwrap().attribute("name"), Some("vmx"));
    assert_eq!(cpu.child("model").unwrap().text(), Some("Westmere"));

    assert_eq!(cpuxml.get("vcpu").unwrap().to_string(), "2");

    cpuxml.undefine(&virsh).unwrap();
    assert!(virsh.definition("vm1").is_none());
    assert_eq!(virsh.calls().last().unwrap(), "undefine vm1");

    assert!(VmCpuXml::new(&virsh, "vm1", "bogus").is_err());
}
