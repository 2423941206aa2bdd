// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use virsh::{DomainState, DumpXmlFlags, Error, Result, Virsh};
use xml_store::ConfigDocument;

pub const DOMAIN_XML: &str = r#"<domain type='kvm'>
  <name>vm1</name>
  <uuid>9f1b3e0a-1d4c-4e36-a9a2-1b1f2f0a5c11</uuid>
  <memory unit='KiB'>1048576</memory>
  <currentMemory unit='KiB'>1048576</currentMemory>
  <vcpu placement='static'>2</vcpu>
  <os>
    <type arch='x86_64' machine='pc'>hvm</type>
  </os>
  <devices>
    <disk type='file' device='disk'>
      <source file='/var/lib/libvirt/images/vm1.qcow2'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <target dev='hdc' bus='ide'/>
    </disk>
  </devices>
</domain>
"#;

pub const NO_TIMEOUT: Duration = Duration::ZERO;

fn failure(command: &str, stderr: &str) -> Error {
    Error::CommandFailed {
        command: command.to_owned(),
        status: Some(1),
        stderr: stderr.to_owned(),
    }
}

/// In-memory libvirt: a map of domain name to definition, with switches to
/// make individual calls fail.
#[derive(Default)]
pub struct FakeVirsh {
    pub definitions: RefCell<BTreeMap<String, String>>,
    pub states: RefCell<BTreeMap<String, DomainState>>,
    pub calls: RefCell<Vec<String>>,
    /// Number of upcoming `define` calls to reject.
    pub define_failures: Cell<usize>,
    pub undefine_fails: Cell<bool>,
}

impl FakeVirsh {
    pub fn with_domain(xml: &str) -> Self {
        let virsh = FakeVirsh::default();
        let doc = ConfigDocument::parse(xml).unwrap();
        let name = doc.find("name").unwrap().unwrap().text().unwrap().to_owned();
        virsh.definitions.borrow_mut().insert(name, xml.to_owned());
        virsh
    }

    pub fn set_state(&self, name: &str, state: DomainState) {
        self.states.borrow_mut().insert(name.to_owned(), state);
    }

    pub fn definition(&self, name: &str) -> Option<ConfigDocument> {
        self.definitions
            .borrow()
            .get(name)
            .map(|xml| ConfigDocument::parse(xml).unwrap())
    }

    pub fn names(&self) -> Vec<String> {
        self.definitions.borrow().keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl Virsh for FakeVirsh {
    fn dumpxml(&self, name: &str, flags: DumpXmlFlags) -> Result<String> {
        let mut call = vec!["dumpxml"];
        call.extend(flags.options());
        call.push(name);
        self.record(call.join(" "));
        self.definitions
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| failure("dumpxml", &format!("error: failed to get domain '{name}'")))
    }

    fn define(&self, xml_file: &Path) -> Result<()> {
        let xml = fs::read_to_string(xml_file).unwrap();
        let doc = ConfigDocument::parse(&xml).unwrap();
        let name = doc.find("name").unwrap().unwrap().text().unwrap().to_owned();
        self.record(format!("define {name}"));

        let remaining = self.define_failures.get();
        if remaining > 0 {
            self.define_failures.set(remaining - 1);
            return Err(failure("define", "error: operation failed"));
        }
        self.definitions.borrow_mut().insert(name, xml);
        Ok(())
    }

    fn undefine(&self, name: &str) -> Result<()> {
        self.record(format!("undefine {name}"));
        if self.undefine_fails.get() {
            return Err(failure("undefine", "error: domain is busy"));
        }
        self.definitions
            .borrow_mut()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| failure("undefine", &format!("error: failed to get domain '{name}'")))
    }

    fn domstate(&self, name: &str) -> Result<DomainState> {
        self.record(format!("domstate {name}"));
        Ok(self
            .states
            .borrow()
            .get(name)
            .cloned()
            .unwrap_or(DomainState::ShutOff))
    }

    fn shutdown(&self, name: &str) -> Result<()> {
        self.record(format!("shutdown {name}"));
        self.set_state(name, DomainState::ShutOff);
        Ok(())
    }

    fn destroy(&self, name: &str, graceful: bool) -> Result<()> {
        self.record(format!("destroy {name} {graceful}"));
        self.set_state(name, DomainState::ShutOff);
        Ok(())
    }
}
