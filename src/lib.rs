// Copyright © 2025 Cyberus Technology GmbH
//
// SPDX-License-Identifier: Apache-2.0
//

//! Output helpers for the `vmxml` command line tool.

use std::collections::BTreeMap;
use std::error::Error;

use libvirt_xml::{NumaParams, PrimarySerial, Value};
use serde_json::{json, Map};
use xml_store::Node;

/// Prints a chain of errors to the user in a consistent manner.
/// The user will see a clear chain of errors, followed by debug output
/// for opening issues.
pub fn cli_print_error_chain(top_error: &dyn Error, component: &str) {
    eprint!("Error: {component} exited with the following ");
    if top_error.source().is_none() {
        eprintln!("error:");
        eprintln!("  {top_error}");
    } else {
        eprintln!("chain of errors:");
        std::iter::successors(Some(top_error), |sub_error| (*sub_error).source())
            .enumerate()
            .for_each(|(level, error)| {
                eprintln!("  {level}: {error}");
            });
    }

    eprintln!();
    eprintln!("Debug Info: {top_error:?}");
}

/// Element as `{"tag", "attributes", "text", "children"}`, omitting empty
/// members.
pub fn node_to_json(node: &Node) -> serde_json::Value {
    let mut object = Map::new();
    object.insert("tag".to_owned(), json!(node.tag()));

    let attributes: Map<String, serde_json::Value> = node
        .attributes()
        .map(|(name, value)| (name.to_owned(), json!(value)))
        .collect();
    if !attributes.is_empty() {
        object.insert("attributes".to_owned(), attributes.into());
    }
    if let Some(text) = node.text() {
        object.insert("text".to_owned(), json!(text));
    }
    if !node.children().is_empty() {
        let children: Vec<_> = node.children().iter().map(node_to_json).collect();
        object.insert("children".to_owned(), children.into());
    }
    object.into()
}

pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Text(s) => json!(s),
        Value::Int(n) => json!(n),
        Value::Bool(b) => json!(b),
        Value::Nodes(nodes) => nodes.iter().map(|n| node_to_json(n)).collect(),
    }
}

pub fn serial_to_json(serial: &PrimarySerial) -> serde_json::Value {
    json!({
        "type": serial.serial_type,
        "port": serial.port,
        "path": serial.path,
    })
}

pub fn numa_to_json(numa: &NumaParams) -> serde_json::Value {
    json!({
        "mode": numa.mode,
        "nodeset": numa.nodeset,
    })
}

/// Disk source: the file, block device or volume backing it.
pub fn disk_source(disk: &Node) -> Option<&str> {
    let source = disk.child("source")?;
    ["file", "dev", "volume", "name"]
        .iter()
        .find_map(|attr| source.attribute(attr))
}

pub fn disks_to_json(disks: &BTreeMap<String, &Node>) -> serde_json::Value {
    disks
        .iter()
        .map(|(target, disk)| {
            (
                target.clone(),
                json!({
                    "device": disk.attribute("device"),
                    "type": disk.attribute("type"),
                    "source": disk_source(disk),
                }),
            )
        })
        .collect::<Map<_, _>>()
        .into()
}

#[cfg(test)]
mod tests {
    use libvirt_xml::VmXml;

    use super::*;

    const DOMAIN: &str = r#"<domain type="kvm">
  <name>vm1</name>
  <devices>
    <disk type="file" device="disk">
      <source file="/var/lib/libvirt/images/vm1.qcow2"/>
      <target dev="vda" bus="virtio"/>
    </disk>
    <disk type="block" device="cdrom">
      <target dev="hdc" bus="ide"/>
    </disk>
  </devices>
</domain>"#;

    #[test]
    fn test_node_to_json() {
        let node = Node::new("feature")
            .with_attribute("policy", "require")
            .with_attribute("name", "vmx");
        assert_eq!(
            node_to_json(&node),
            json!({"tag": "feature", "attributes": {"policy": "require", "name": "vmx"}})
        );

        let node = Node::new("cpu").with_child(Node::new("model").with_text("Westmere"));
        assert_eq!(
            node_to_json(&node),
            json!({"tag": "cpu", "children": [{"tag": "model", "text": "Westmere"}]})
        );
    }

    #[test]
    fn test_value_to_json() {
        assert_eq!(value_to_json(&Value::from("vm1")), json!("vm1"));
        assert_eq!(value_to_json(&Value::from(4i64)), json!(4));
        assert_eq!(value_to_json(&Value::from(true)), json!(true));
        let feature = Node::new("feature").with_attribute("name", "vmx");
        assert_eq!(
            value_to_json(&Value::Nodes(vec![&feature])),
            json!([{"tag": "feature", "attributes": {"name": "vmx"}}])
        );
    }

    #[test]
    fn test_disks_to_json() {
        let vmxml = VmXml::from_xml(DOMAIN).unwrap();
        assert_eq!(
            disks_to_json(&vmxml.get_disk_all()),
            json!({
                "hdc": {"device": "cdrom", "type": "block", "source": null},
                "vda": {
                    "device": "disk",
                    "type": "file",
                    "source": "/var/lib/libvirt/images/vm1.qcow2",
                },
            })
        );
    }

    #[test]
    fn test_serial_and_numa_to_json() {
        let serial = PrimarySerial {
            serial_type: "pty".to_owned(),
            port: Some("0".to_owned()),
            path: None,
        };
        assert_eq!(
            serial_to_json(&serial),
            json!({"type": "pty", "port": "0", "path": null})
        );
        assert_eq!(
            numa_to_json(&NumaParams::default()),
            json!({"mode": null, "nodeset": null})
        );
    }
}
