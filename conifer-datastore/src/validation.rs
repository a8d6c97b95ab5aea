//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use conifer_yang::schema::{Condition, IntWidth, LeafType, SchemaNodeKind};
use itertools::Itertools;

use crate::tree::{DataTree, NodeRef};

/// Structural validation failure classes, mapped to NETCONF error tags by
/// the northbound layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationErrorKind {
    InvalidValue,
    MissingMandatory,
    MissingKey,
    DuplicateEntry,
    UniqueViolation,
    LeafrefMissing,
    WhenViolation,
    MustViolation,
}

#[derive(Clone, Debug)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub path: String,
    pub message: String,
}

// ===== impl ValidationError =====

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

// ===== impl DataTree =====

impl DataTree {
    /// Evaluates every schema constraint against the tree: leaf types,
    /// mandatory nodes, list keys, duplicate entries, unique tuples,
    /// leafref targets, when and must conditions. Pure; the tree is never
    /// modified. All violations are collected before returning.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        // Mandatory top-level nodes.
        for snode in self.context().roots() {
            if snode.is_mandatory()
                && !self
                    .root()
                    .children()
                    .any(|child| child.schema().map(|s| s.id()) == Some(snode.id()))
            {
                errors.push(ValidationError {
                    kind: ValidationErrorKind::MissingMandatory,
                    path: snode.data_path(),
                    message: format!("mandatory node {} is absent", snode.name()),
                });
            }
        }

        // Top-level list entries hang off the root, which traverse skips.
        self.check_list_entries(&self.root(), &mut errors);

        for node in self.traverse() {
            self.validate_node(&node, &mut errors);
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn validate_node(
        &self,
        node: &NodeRef<'_>,
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(snode) = node.schema() else {
            return;
        };

        // Leaf and leaf-list values.
        if let Some(ltype) = snode.leaf_type()
            && let Err(message) = self.check_value(ltype, node.value())
        {
            let kind = if ltype.is_leafref() {
                ValidationErrorKind::LeafrefMissing
            } else {
                ValidationErrorKind::InvalidValue
            };
            errors.push(ValidationError {
                kind,
                path: node.path(),
                message,
            });
        }

        match snode.kind() {
            SchemaNodeKind::List => {
                // Every key leaf must be present and carry a value.
                for key in snode.keys() {
                    let present = node
                        .find_child(key)
                        .is_some_and(|child| child.value().is_some());
                    if !present {
                        errors.push(ValidationError {
                            kind: ValidationErrorKind::MissingKey,
                            path: node.path(),
                            message: format!("list key {key} is absent"),
                        });
                    }
                }
                self.check_mandatory(node, errors);
            }
            SchemaNodeKind::Container => {
                self.check_mandatory(node, errors);
            }
            _ => (),
        }

        // Duplicate list entries and unique tuples among this node's
        // children.
        self.check_list_entries(node, errors);

        // Conditional constraints.
        if let Some(when) = snode.when()
            && !self.eval_condition(when)
        {
            errors.push(ValidationError {
                kind: ValidationErrorKind::WhenViolation,
                path: node.path(),
                message: format!(
                    "node is present while its when condition on {} is false",
                    when.path
                ),
            });
        }
        for must in snode.musts() {
            if !self.eval_condition(&must.condition) {
                let message = must
                    .error_message
                    .clone()
                    .unwrap_or_else(|| {
                        format!(
                            "must condition on {} is false",
                            must.condition.path
                        )
                    });
                errors.push(ValidationError {
                    kind: ValidationErrorKind::MustViolation,
                    path: node.path(),
                    message,
                });
            }
        }
    }

    // Mandatory children of a present interior node.
    fn check_mandatory(
        &self,
        node: &NodeRef<'_>,
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(snode) = node.schema() else {
            return;
        };
        for child_snode in snode.children() {
            if child_snode.is_mandatory()
                && !node.children().any(|child| {
                    child.schema().map(|s| s.id()) == Some(child_snode.id())
                })
            {
                errors.push(ValidationError {
                    kind: ValidationErrorKind::MissingMandatory,
                    path: node.path(),
                    message: format!(
                        "mandatory node {} is absent",
                        child_snode.name()
                    ),
                });
            }
        }
    }

    fn check_list_entries(
        &self,
        node: &NodeRef<'_>,
        errors: &mut Vec<ValidationError>,
    ) {
        let lists = node
            .children()
            .filter_map(|child| child.schema())
            .filter(|snode| snode.kind() == SchemaNodeKind::List)
            .map(|snode| snode.id())
            .unique()
            .collect::<Vec<_>>();

        for list in lists {
            let entries = node
                .children()
                .filter(|child| {
                    child.schema().map(|s| s.id()) == Some(list)
                })
                .collect::<Vec<_>>();
            let snode = self.context().snode_by_id(list);

            // Duplicate key tuples.
            let duplicates = entries
                .iter()
                .map(|entry| self.list_keys(entry.index()))
                .duplicates()
                .collect::<Vec<_>>();
            if !duplicates.is_empty() {
                errors.push(ValidationError {
                    kind: ValidationErrorKind::DuplicateEntry,
                    path: node.path(),
                    message: format!(
                        "duplicate entries in list {}",
                        snode.name()
                    ),
                });
            }

            // Unique tuples.
            for tuple in snode.unique() {
                let values = entries
                    .iter()
                    .map(|entry| {
                        tuple
                            .iter()
                            .map(|leaf| {
                                entry
                                    .find_child(leaf)
                                    .and_then(|child| child.value())
                                    .map(str::to_owned)
                            })
                            .collect::<Vec<_>>()
                    })
                    // Entries with the leaf absent do not participate.
                    .filter(|values| values.iter().all(Option::is_some))
                    .collect::<Vec<_>>();
                if values.iter().duplicates().next().is_some() {
                    errors.push(ValidationError {
                        kind: ValidationErrorKind::UniqueViolation,
                        path: node.path(),
                        message: format!(
                            "unique constraint ({}) violated in list {}",
                            tuple.join(" "),
                            snode.name()
                        ),
                    });
                }
            }
        }
    }

    fn check_value(
        &self,
        ltype: &LeafType,
        value: Option<&str>,
    ) -> Result<(), String> {
        match ltype {
            LeafType::Boolean => match value {
                Some("true") | Some("false") => Ok(()),
                other => Err(format!(
                    "expected boolean, got '{}'",
                    other.unwrap_or("")
                )),
            },
            LeafType::Decimal64 { fraction_digits } => {
                check_decimal64(value.unwrap_or(""), *fraction_digits)
            }
            LeafType::Empty => match value {
                None => Ok(()),
                Some(value) => {
                    Err(format!("type empty does not take a value: '{value}'"))
                }
            },
            LeafType::Enumeration { values } => {
                let value = value.unwrap_or("");
                if values.iter().any(|candidate| candidate == value) {
                    Ok(())
                } else {
                    Err(format!("'{value}' is not a known enum value"))
                }
            }
            LeafType::Int { width, range } => {
                let value = value.unwrap_or("");
                let parsed = value
                    .parse::<i64>()
                    .map_err(|_| format!("invalid integer: '{value}'"))?;
                let (min, max) = int_bounds(*width);
                let (min, max) = range.unwrap_or((min, max));
                if parsed < min || parsed > max {
                    return Err(format!(
                        "{parsed} is out of range [{min}, {max}]"
                    ));
                }
                Ok(())
            }
            LeafType::Uint { width, range } => {
                let value = value.unwrap_or("");
                let parsed = value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid integer: '{value}'"))?;
                let (min, max) = uint_bounds(*width);
                let (min, max) = range.unwrap_or((min, max));
                if parsed < min || parsed > max {
                    return Err(format!(
                        "{parsed} is out of range [{min}, {max}]"
                    ));
                }
                Ok(())
            }
            LeafType::Leafref { path } => {
                let value = value.unwrap_or("");
                let targets =
                    self.find_xpath(path).map_err(|error| error.to_string())?;
                if targets
                    .iter()
                    .any(|target| target.value() == Some(value))
                {
                    Ok(())
                } else {
                    Err(format!(
                        "leafref target {path} has no entry '{value}'"
                    ))
                }
            }
            LeafType::Str { length, patterns } => {
                let value = value.unwrap_or("");
                if let Some((min, max)) = length {
                    let chars = value.chars().count() as u64;
                    if chars < *min || chars > *max {
                        return Err(format!(
                            "length {chars} is out of range [{min}, {max}]"
                        ));
                    }
                }
                for pattern in patterns {
                    if !pattern.is_match(value) {
                        return Err(format!(
                            "'{value}' does not match pattern {}",
                            pattern.as_str()
                        ));
                    }
                }
                Ok(())
            }
            LeafType::Union { types } => {
                for member in types {
                    if self.check_value(member, value).is_ok() {
                        return Ok(());
                    }
                }
                Err(format!(
                    "'{}' matches no member type of the union",
                    value.unwrap_or("")
                ))
            }
        }
    }

    fn eval_condition(&self, condition: &Condition) -> bool {
        let matches = self.find_xpath(&condition.path).unwrap_or_default();
        let holds = match &condition.value {
            Some(value) => matches
                .iter()
                .any(|node| node.value() == Some(value.as_str())),
            None => !matches.is_empty(),
        };
        holds != condition.negate
    }
}

// ===== helper functions =====

fn int_bounds(width: IntWidth) -> (i64, i64) {
    match width {
        IntWidth::W8 => (i8::MIN as i64, i8::MAX as i64),
        IntWidth::W16 => (i16::MIN as i64, i16::MAX as i64),
        IntWidth::W32 => (i32::MIN as i64, i32::MAX as i64),
        IntWidth::W64 => (i64::MIN, i64::MAX),
    }
}

fn uint_bounds(width: IntWidth) -> (u64, u64) {
    match width {
        IntWidth::W8 => (0, u8::MAX as u64),
        IntWidth::W16 => (0, u16::MAX as u64),
        IntWidth::W32 => (0, u32::MAX as u64),
        IntWidth::W64 => (0, u64::MAX),
    }
}

fn check_decimal64(value: &str, fraction_digits: u8) -> Result<(), String> {
    let body = value.strip_prefix('-').unwrap_or(value);
    let (int_part, frac_part) = match body.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (body, None),
    };
    let digits_ok = !int_part.is_empty()
        && int_part.bytes().all(|b| b.is_ascii_digit())
        && frac_part.is_none_or(|frac| {
            !frac.is_empty()
                && frac.len() <= fraction_digits as usize
                && frac.bytes().all(|b| b.is_ascii_digit())
        });
    if digits_ok {
        Ok(())
    } else {
        Err(format!("invalid decimal64 value: '{value}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testlib;

    #[test]
    fn test_valid_tree() {
        let tree = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>router1</hostname>\
             <user><name>admin</name><uid>1000</uid></user>\
             </system></config>",
        );
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_type_error() {
        let tree = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <user><name>admin</name><uid>not-a-number</uid></user>\
             </system></config>",
        );
        let errors = tree.validate().unwrap_err();
        assert!(errors.iter().any(|error| {
            error.kind == ValidationErrorKind::InvalidValue
                && error.path.contains("uid")
        }));
    }

    #[test]
    fn test_missing_list_key() {
        let tree = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <user><uid>1</uid></user></system></config>",
        );
        let errors = tree.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|error| error.kind == ValidationErrorKind::MissingKey));
    }

    #[test]
    fn test_duplicate_list_entries() {
        let tree = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <user><name>admin</name><uid>1</uid></user>\
             <user><name>admin</name><uid>2</uid></user>\
             </system></config>",
        );
        let errors = tree.validate().unwrap_err();
        assert!(errors
            .iter()
            .any(|error| error.kind == ValidationErrorKind::DuplicateEntry));
    }

    #[test]
    fn test_validation_does_not_mutate() {
        let tree = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <user><uid>bad</uid></user></system></config>",
        );
        let before = tree.print_xml_string(false);
        let _ = tree.validate();
        assert_eq!(tree.print_xml_string(false), before);
    }
}
