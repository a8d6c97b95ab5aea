//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod diff;
pub mod edit;
pub mod error;
pub mod json;
pub mod persist;
pub mod serde;
pub mod store;
pub mod tree;
pub mod validation;
pub mod xml;

pub use crate::diff::{DataDiff, DataDiffEntry, DataDiffOp};
pub use crate::edit::EditOp;
pub use crate::error::{Error, Result};
pub use crate::store::{Datastores, Store, StoreState};
pub use crate::tree::{Attr, DataTree, NodeRef};
pub use crate::validation::{ValidationError, ValidationErrorKind};

// Shared schema and tree fixtures for the crate's tests.
#[cfg(test)]
pub(crate) mod testlib {
    use std::sync::Arc;

    use conifer_yang::schema::{TypeSpec, container, leaf, leaf_list, list};
    use conifer_yang::Context;

    use crate::tree::DataTree;

    pub(crate) fn context() -> Arc<Context> {
        Context::builder()
            .module("conifer-system", "urn:conifer:system", "sys")
            .node(
                container("system")
                    .child(leaf(
                        "hostname",
                        TypeSpec::string().length(1, 63),
                    ))
                    .child(leaf(
                        "timezone",
                        TypeSpec::enumeration(["utc", "local"]),
                    ))
                    .child(
                        list("user")
                            .key("name")
                            .unique(["uid"])
                            .child(leaf("name", TypeSpec::string()))
                            .child(leaf("uid", TypeSpec::uint32()))
                            .child(leaf(
                                "class",
                                TypeSpec::string().pattern("[a-z]+"),
                            )),
                    )
                    .child(leaf_list("dns-server", TypeSpec::string())),
            )
            .build()
            .unwrap()
    }

    pub(crate) fn tree(xml: &str) -> DataTree {
        DataTree::parse_xml_string(context(), xml).unwrap()
    }
}
