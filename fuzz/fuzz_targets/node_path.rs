// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0

#![no_main]
use libfuzzer_sys::fuzz_target;
use xml_store::{ConfigDocument, Node, NodePath};

fuzz_target!(|bytes: &[u8]| {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return;
    };
    let Ok(path) = text.parse::<NodePath>() else {
        return;
    };
    assert_eq!(path.to_string().parse::<NodePath>().unwrap(), path);

    let mut doc = ConfigDocument::new(Node::new("domain"));
    let _ = doc.find_all(text);
    if doc.ensure(text).is_ok() {
        assert!(doc.find(text).unwrap().is_some());
    }
    let _ = doc.remove(text);
});
