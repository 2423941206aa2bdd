// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0

#![no_main]
use libfuzzer_sys::fuzz_target;
use libvirt_xml::{LibvirtXml, VmCpuXml, VM_CPU_PROPERTIES};
use xml_store::ConfigDocument;

fuzz_target!(|bytes: &[u8]| {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return;
    };
    let Ok(doc) = ConfigDocument::parse(text) else {
        return;
    };

    let serialized = doc.serialize();
    let reparsed = ConfigDocument::parse(&serialized).unwrap();
    assert_eq!(reparsed, doc);
    assert_eq!(reparsed.serialize(), serialized);

    let Ok(mut cpuxml) = VmCpuXml::from_xml(&serialized) else {
        return;
    };
    for desc in VM_CPU_PROPERTIES {
        let _ = cpuxml.get(desc.name);
    }
    for index in 0..cpuxml.feature_count() {
        let _ = cpuxml.get_feature_name(index);
    }
    let _ = cpuxml.set_str("vcpu", "4");
    let _ = cpuxml.add_feature("vmx");
    // Mutated documents read back unchanged
    assert_eq!(VmCpuXml::from_xml(&cpuxml.xml()).unwrap(), cpuxml);
});
