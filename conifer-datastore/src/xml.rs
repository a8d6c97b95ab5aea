//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use std::str::FromStr;
use std::sync::Arc;

use conifer_yang::Context;

use crate::edit::EditOp;
use crate::error::Error;
use crate::tree::{Attr, DataTree, NodeIndex};

/// Generic XML element, used for protocol envelopes and as the staging form
/// between XML text and schema-typed trees.
#[derive(Clone, Debug, Default)]
pub struct XmlElement {
    pub prefix: Option<String>,
    pub name: String,
    pub attrs: Vec<Attr>,
    pub children: Vec<XmlElement>,
    pub text: Option<String>,
}

/// XML well-formedness error with a byte offset into the input.
#[derive(Debug)]
pub struct XmlError {
    pub offset: usize,
    pub message: String,
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

// ===== impl XmlElement =====

impl XmlElement {
    pub fn new(name: &str) -> XmlElement {
        XmlElement {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// Parses a single XML document.
    pub fn parse(input: &str) -> Result<XmlElement, XmlError> {
        let mut parser = Parser { input, pos: 0 };
        parser.skip_misc();
        let element = parser.parse_element()?;
        parser.skip_misc();
        if parser.pos != parser.input.len() {
            return Err(parser.error("trailing content after document element"));
        }
        Ok(element)
    }

    /// Finds a direct child by local name.
    pub fn find_child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn find_children<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Looks up an attribute by local name, ignoring any prefix.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| {
                attr.name == name
                    || attr
                        .name
                        .split_once(':')
                        .is_some_and(|(_, local)| local == name)
            })
            .map(|attr| attr.value.as_str())
    }

    fn print(&self, out: &mut String, indent: Option<usize>) {
        let qname = match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.name),
            None => self.name.clone(),
        };
        if let Some(level) = indent {
            out.push_str(&"  ".repeat(level));
        }
        out.push('<');
        out.push_str(&qname);
        for attr in &self.attrs {
            out.push(' ');
            out.push_str(&attr.name);
            out.push_str("=\"");
            out.push_str(&escape(&attr.value));
            out.push('"');
        }
        if self.children.is_empty() && self.text.is_none() {
            out.push_str("/>");
            if indent.is_some() {
                out.push('\n');
            }
            return;
        }
        out.push('>');
        if let Some(text) = &self.text {
            out.push_str(&escape(text));
        } else if indent.is_some() {
            out.push('\n');
        }
        for child in &self.children {
            child.print(out, indent.map(|level| level + 1));
        }
        if self.text.is_none()
            && let Some(level) = indent
        {
            out.push_str(&"  ".repeat(level));
        }
        out.push_str("</");
        out.push_str(&qname);
        out.push('>');
        if indent.is_some() {
            out.push('\n');
        }
    }

    pub fn print_string(&self, pretty: bool) -> String {
        let mut out = String::new();
        self.print(&mut out, pretty.then_some(0));
        out
    }
}

impl std::fmt::Display for XmlElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.print_string(false))
    }
}

// ===== impl XmlError =====

impl std::fmt::Display for XmlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)
    }
}

impl std::error::Error for XmlError {}

// ===== impl Parser =====

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> XmlError {
        XmlError {
            offset: self.pos,
            message: message.to_owned(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    // Skips whitespace, XML declarations, processing instructions and
    // comments between elements.
    fn skip_misc(&mut self) {
        loop {
            self.skip_whitespace();
            if self.eat("<?") {
                match self.rest().find("?>") {
                    Some(end) => self.pos += end + 2,
                    None => {
                        self.pos = self.input.len();
                        return;
                    }
                }
            } else if self.eat("<!--") {
                match self.rest().find("-->") {
                    Some(end) => self.pos += end + 3,
                    None => {
                        self.pos = self.input.len();
                        return;
                    }
                }
            } else {
                return;
            }
        }
    }

    fn parse_name(&mut self) -> Result<&'a str, XmlError> {
        let rest = self.rest();
        let end = rest
            .find(|ch: char| {
                ch.is_whitespace() || matches!(ch, '>' | '/' | '=')
            })
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(self.error("expected name"));
        }
        self.pos += end;
        Ok(&rest[..end])
    }

    fn parse_element(&mut self) -> Result<XmlElement, XmlError> {
        if !self.eat("<") {
            return Err(self.error("expected element start"));
        }
        let qname = self.parse_name()?;
        let (prefix, name) = split_qname(qname);
        let mut element = XmlElement {
            prefix,
            name,
            attrs: Vec::new(),
            children: Vec::new(),
            text: None,
        };

        // Attributes.
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('/') | Some('>') => break,
                Some(_) => {
                    let name = self.parse_name()?.to_owned();
                    self.skip_whitespace();
                    if !self.eat("=") {
                        return Err(self.error("expected '=' after attribute"));
                    }
                    self.skip_whitespace();
                    let quote = match self.peek() {
                        Some(q @ ('"' | '\'')) => q,
                        _ => {
                            return Err(
                                self.error("expected quoted attribute value")
                            );
                        }
                    };
                    self.pos += 1;
                    let rest = self.rest();
                    let end = rest
                        .find(quote)
                        .ok_or_else(|| self.error("unterminated attribute"))?;
                    let value = decode_entities(&rest[..end])
                        .map_err(|message| self.error(&message))?;
                    self.pos += end + 1;
                    element.attrs.push(Attr { name, value });
                }
                None => return Err(self.error("unexpected end of input")),
            }
        }

        if self.eat("/>") {
            return Ok(element);
        }
        if !self.eat(">") {
            return Err(self.error("malformed element start"));
        }

        // Content: child elements and character data.
        let mut text = String::new();
        loop {
            if self.eat("</") {
                let close = self.parse_name()?;
                self.skip_whitespace();
                if !self.eat(">") {
                    return Err(self.error("malformed end tag"));
                }
                let (close_prefix, close_name) = split_qname(close);
                if close_name != element.name || close_prefix != element.prefix
                {
                    return Err(self.error("mismatched end tag"));
                }
                break;
            }
            match self.peek() {
                Some('<') => {
                    if self.rest().starts_with("<!--") {
                        self.skip_misc();
                    } else {
                        element.children.push(self.parse_element()?);
                    }
                }
                Some(_) => {
                    let rest = self.rest();
                    let end = rest.find('<').unwrap_or(rest.len());
                    text.push_str(
                        &decode_entities(&rest[..end])
                            .map_err(|message| self.error(&message))?,
                    );
                    self.pos += end;
                }
                None => return Err(self.error("unexpected end of input")),
            }
        }

        // Mixed content is not part of the configuration subset; character
        // data only counts on childless elements.
        let text = text.trim();
        if element.children.is_empty() && !text.is_empty() {
            element.text = Some(text.to_owned());
        }
        Ok(element)
    }
}

// ===== impl DataTree =====

impl DataTree {
    /// Parses an XML document with a `<config>` root into a schema-typed
    /// tree.
    pub fn parse_xml_string(
        ctx: Arc<Context>,
        input: &str,
    ) -> Result<DataTree, Error> {
        let element = XmlElement::parse(input)?;
        DataTree::from_element(ctx, &element)
    }

    /// Builds a schema-typed tree from a parsed `<config>` element.
    pub fn from_element(
        ctx: Arc<Context>,
        element: &XmlElement,
    ) -> Result<DataTree, Error> {
        if element.name != "config" {
            return Err(Error::UnknownElement(element.name.clone()));
        }
        let mut tree = DataTree::new(ctx);
        let root = tree.root_index();
        for child in &element.children {
            tree.insert_element(root, child, None)?;
        }
        Ok(tree)
    }

    fn insert_element(
        &mut self,
        parent: NodeIndex,
        element: &XmlElement,
        inherited_module: Option<&str>,
    ) -> Result<(), Error> {
        // A default namespace declaration selects the module for this
        // subtree; otherwise the module is inherited or inferred.
        let module = match element.attr("xmlns") {
            Some(namespace) => Some(
                self.context()
                    .modules()
                    .find(|module| module.namespace == namespace)
                    .ok_or_else(|| {
                        Error::UnknownElement(element.name.clone())
                    })?
                    .name
                    .clone(),
            ),
            None => inherited_module.map(str::to_owned),
        };

        let index =
            self.add_child(parent, module.as_deref(), &element.name)?;
        self.node_mut(index).value = element.text.clone();

        // The NETCONF operation attribute becomes a transient annotation;
        // namespace declarations are consumed above; anything else is kept.
        for attr in &element.attrs {
            let local = attr
                .name
                .split_once(':')
                .map(|(_, local)| local)
                .unwrap_or(&attr.name);
            if local == "operation" {
                let op = EditOp::from_str(&attr.value)?;
                self.node_mut(index).operation = Some(op);
            } else if !attr.name.starts_with("xmlns") {
                self.node_mut(index).attrs.push(attr.clone());
            }
        }

        for child in &element.children {
            self.insert_element(index, child, module.as_deref())?;
        }
        Ok(())
    }

    /// Serializes the tree to XML with a `<config>` root. Top-level nodes
    /// carry their module namespace declaration; this is the persisted and
    /// canonical form.
    pub fn print_xml_string(&self, pretty: bool) -> String {
        let element = self.to_element();
        element.print_string(pretty)
    }

    pub fn to_element(&self) -> XmlElement {
        let mut config = XmlElement::new("config");
        for child in self.root().children() {
            config.children.push(self.node_to_element(child.index(), true));
        }
        config
    }

    fn node_to_element(&self, index: NodeIndex, top: bool) -> XmlElement {
        let node = self.node(index);
        let mut element = XmlElement::new(&node.name);
        element.text = node.value.clone();
        element.attrs = node.attrs.clone();
        if let Some(op) = node.operation {
            element.attrs.push(Attr {
                name: "operation".to_owned(),
                value: op.as_str().to_owned(),
            });
        }
        if top
            && let Some(module) = &node.module
            && let Some(module) = self.context().find_module(module)
        {
            element.attrs.insert(
                0,
                Attr {
                    name: "xmlns".to_owned(),
                    value: module.namespace.clone(),
                },
            );
        }
        for child in &node.children {
            element.children.push(self.node_to_element(*child, false));
        }
        element
    }
}

// ===== global functions =====

/// Escapes the five predefined XML entities.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

fn decode_entities(text: &str) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let end = rest
            .find(';')
            .ok_or_else(|| "unterminated entity reference".to_owned())?;
        let entity = &rest[1..end];
        match entity {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => {
                let code = entity
                    .strip_prefix("#x")
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .or_else(|| {
                        entity.strip_prefix('#').map(|dec| dec.parse::<u32>())
                    })
                    .ok_or_else(|| {
                        format!("unknown entity reference: &{entity};")
                    })?
                    .map_err(|_| {
                        format!("invalid character reference: &{entity};")
                    })?;
                let ch = char::from_u32(code).ok_or_else(|| {
                    format!("invalid character reference: &{entity};")
                })?;
                out.push(ch);
            }
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn split_qname(qname: &str) -> (Option<String>, String) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_owned()), local.to_owned()),
        None => (None, qname.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testlib;

    #[test]
    fn test_parse_basic() {
        let element = XmlElement::parse(
            "<?xml version=\"1.0\"?>\
             <rpc message-id=\"101\">\
               <get-config><source><running/></source></get-config>\
             </rpc>",
        )
        .unwrap();

        assert_eq!(element.name, "rpc");
        assert_eq!(element.attr("message-id"), Some("101"));
        let source = element
            .find_child("get-config")
            .and_then(|op| op.find_child("source"))
            .unwrap();
        assert!(source.find_child("running").is_some());
    }

    #[test]
    fn test_entities_round_trip() {
        let element =
            XmlElement::parse("<a x=\"q&quot;q\">1 &lt; 2 &amp; 3</a>")
                .unwrap();
        assert_eq!(element.text.as_deref(), Some("1 < 2 & 3"));
        assert_eq!(element.attr("x"), Some("q\"q"));

        let printed = element.print_string(false);
        let reparsed = XmlElement::parse(&printed).unwrap();
        assert_eq!(reparsed.text, element.text);
        assert_eq!(reparsed.attr("x"), element.attr("x"));
    }

    #[test]
    fn test_mismatched_tag() {
        assert!(XmlElement::parse("<a><b></a></b>").is_err());
        assert!(XmlElement::parse("<a>").is_err());
    }

    #[test]
    fn test_tree_round_trip() {
        let tree = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname>router1</hostname>\
             <user><name>admin</name><uid>1</uid></user>\
             </system></config>",
        );

        let printed = tree.print_xml_string(false);
        let reparsed = DataTree::parse_xml_string(
            tree.context().clone(),
            &printed,
        )
        .unwrap();
        assert!(tree.data_eq(&reparsed));
    }

    #[test]
    fn test_unknown_element_rejected() {
        let result = DataTree::parse_xml_string(
            testlib::context(),
            "<config><mystery xmlns='urn:conifer:system'/></config>",
        );
        assert!(matches!(result, Err(Error::UnknownElement(_))));
    }

    #[test]
    fn test_operation_attribute_becomes_annotation() {
        let tree = testlib::tree(
            "<config><system xmlns='urn:conifer:system'>\
             <hostname operation='delete'/></system></config>",
        );
        let hostname = tree
            .find_xpath("/conifer-system:system/hostname")
            .unwrap();
        assert_eq!(hostname[0].operation(), Some(EditOp::Delete));
        assert!(hostname[0].attrs().is_empty());
    }
}
