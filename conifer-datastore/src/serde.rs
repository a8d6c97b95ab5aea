//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

/// Serde adapter carrying a data tree across serde boundaries as its XML
/// text (e.g. into the transaction rollback log).
pub mod data_tree {
    use std::sync::Arc;

    use conifer_yang::YANG_CTX;
    use serde::{Deserialize, Serializer};

    use crate::tree::DataTree;

    pub fn serialize<S>(dtree: &DataTree, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&dtree.print_xml_string(false))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DataTree, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let ctx = YANG_CTX
            .get()
            .ok_or_else(|| {
                serde::de::Error::custom("YANG context is not initialized")
            })?
            .clone();
        DataTree::parse_xml_string(ctx, &String::deserialize(deserializer)?)
            .map_err(serde::de::Error::custom)
    }

    // DataTree wrapped in an Arc.
    pub mod arc {
        use super::*;

        pub fn serialize<S>(
            dtree: &DataTree,
            s: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            super::serialize(dtree, s)
        }

        pub fn deserialize<'de, D>(
            deserializer: D,
        ) -> Result<Arc<DataTree>, D::Error>
        where
            D: serde::de::Deserializer<'de>,
        {
            super::deserialize(deserializer).map(Arc::new)
        }
    }
}
