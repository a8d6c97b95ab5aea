//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use crate::xml::XmlError;

//
// Type aliases.
//
pub type Result<T> = std::result::Result<T, Error>;

//
// Datastore errors.
//
#[derive(Debug)]
pub enum Error {
    StoreAbsent(String),
    DataExists(String),
    DataMissing(String),
    UnknownElement(String),
    UnknownOperation(String),
    InvalidPath(String),
    Xml(XmlError),
    Io(std::io::Error),
}

// ===== impl Error =====

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::StoreAbsent(name) => {
                write!(f, "datastore does not exist: {name}")
            }
            Error::DataExists(path) => {
                write!(f, "data already exists: {path}")
            }
            Error::DataMissing(path) => {
                write!(f, "data is missing: {path}")
            }
            Error::UnknownElement(name) => {
                write!(f, "element does not resolve to a schema node: {name}")
            }
            Error::UnknownOperation(op) => {
                write!(f, "unknown edit operation: {op}")
            }
            Error::InvalidPath(path) => {
                write!(f, "invalid path expression: {path}")
            }
            Error::Xml(error) => {
                write!(f, "malformed XML: {error}")
            }
            Error::Io(error) => {
                write!(f, "I/O error: {error}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<XmlError> for Error {
    fn from(error: XmlError) -> Error {
        Error::Xml(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::Io(error)
    }
}
