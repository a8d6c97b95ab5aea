//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashSet;

use conifer_yang::schema::{IntWidth, LeafType, SchemaNodeKind};
use serde_json::{Map, Value, json};

use crate::tree::{DataTree, NodeIndex};

// ===== impl DataTree =====

impl DataTree {
    /// Projects the tree to its JSON encoding. One-way; the persisted and
    /// round-tripped form is XML.
    pub fn to_json(&self) -> Value {
        Value::Object(self.children_json(self.root_index(), None))
    }

    pub fn print_json_string(&self, pretty: bool) -> String {
        let value = self.to_json();
        if pretty {
            serde_json::to_string_pretty(&value).unwrap_or_default()
        } else {
            value.to_string()
        }
    }

    fn children_json(
        &self,
        index: NodeIndex,
        parent_module: Option<&str>,
    ) -> Map<String, Value> {
        let mut map = Map::new();
        let mut emitted = HashSet::new();

        for child in self.node(index).children.clone() {
            let child_node = self.node(child);
            let Some(snode_id) = child_node.snode else {
                continue;
            };
            if !emitted.insert(snode_id) {
                // Array siblings were collected on first encounter.
                continue;
            }
            let snode = self.context().snode_by_id(snode_id);

            // Names are module-qualified at the top level and wherever the
            // module changes.
            let module = child_node.module.as_deref();
            let key = match module {
                Some(module) if parent_module != Some(module) => {
                    format!("{module}:{}", child_node.name)
                }
                _ => child_node.name.clone(),
            };

            let value = match snode.kind() {
                SchemaNodeKind::Container => {
                    Value::Object(self.children_json(child, module))
                }
                SchemaNodeKind::Leaf => {
                    leaf_json(snode.leaf_type(), child_node.value.as_deref())
                }
                SchemaNodeKind::List => Value::Array(
                    self.node(index)
                        .children
                        .iter()
                        .filter(|sibling| {
                            self.node(**sibling).snode == Some(snode_id)
                        })
                        .map(|sibling| {
                            Value::Object(
                                self.children_json(*sibling, module),
                            )
                        })
                        .collect(),
                ),
                SchemaNodeKind::LeafList => Value::Array(
                    self.node(index)
                        .children
                        .iter()
                        .filter(|sibling| {
                            self.node(**sibling).snode == Some(snode_id)
                        })
                        .map(|sibling| {
                            leaf_json(
                                snode.leaf_type(),
                                self.node(*sibling).value.as_deref(),
                            )
                        })
                        .collect(),
                ),
            };
            map.insert(key, value);
        }
        map
    }
}

// ===== helper functions =====

// Encodes a leaf value. Numbers up to 32 bits and booleans are native JSON
// values; 64-bit integers and decimal64 stay strings, as the JSON encoding
// of YANG data requires.
fn leaf_json(ltype: Option<&LeafType>, value: Option<&str>) -> Value {
    let text = value.unwrap_or("");
    match ltype {
        Some(LeafType::Boolean) => match text {
            "true" => json!(true),
            "false" => json!(false),
            _ => json!(text),
        },
        Some(LeafType::Empty) => json!([Value::Null]),
        Some(LeafType::Int { width, .. }) if *width != IntWidth::W64 => {
            match text.parse::<i64>() {
                Ok(parsed) => json!(parsed),
                Err(_) => json!(text),
            }
        }
        Some(LeafType::Uint { width, .. }) if *width != IntWidth::W64 => {
            match text.parse::<u64>() {
                Ok(parsed) => json!(parsed),
                Err(_) => json!(text),
            }
        }
        _ => json!(text),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::testlib;

    #[test]
    fn test_json_projection() {
        let tree = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>router1</hostname>\
             <user><name>admin</name><uid>1000</uid></user>\
             <user><name>guest</name><uid>1001</uid></user>\
             </system></config>",
        );

        let expected = json!({
            "conifer-system:system": {
                "hostname": "router1",
                "user": [
                    {"name": "admin", "uid": 1000},
                    {"name": "guest", "uid": 1001},
                ],
            }
        });
        assert_eq!(tree.to_json(), expected);
    }

    #[test]
    fn test_json_empty_tree() {
        let tree = testlib::tree("<config/>");
        assert_eq!(tree.to_json(), json!({}));
    }
}
