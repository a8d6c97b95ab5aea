//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use conifer_datastore::validation::{ValidationError, ValidationErrorKind};
use conifer_datastore::xml::XmlElement;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// NETCONF error type: the protocol layer where the failure occurred.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    Application,
}

/// NETCONF error tag, from the closed RFC 6241 set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ErrorTag {
    InUse,
    InvalidValue,
    TooBig,
    MissingAttribute,
    BadAttribute,
    UnknownAttribute,
    MissingElement,
    BadElement,
    UnknownElement,
    UnknownNamespace,
    AccessDenied,
    LockDenied,
    ResourceDenied,
    RollbackFailed,
    DataExists,
    DataMissing,
    OperationNotSupported,
    OperationFailed,
    PartialOperation,
    MalformedMessage,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ErrorSeverity {
    Error,
    Warning,
}

/// Structured error record: the sole error currency between the engine and
/// its callers.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct ErrorRecord {
    pub error_type: ErrorType,
    pub tag: ErrorTag,
    pub severity: ErrorSeverity,
    pub path: Option<String>,
    pub message: Option<String>,
    pub info: Option<String>,
}

// ===== impl ErrorType =====

impl ErrorType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Transport => "transport",
            ErrorType::Rpc => "rpc",
            ErrorType::Protocol => "protocol",
            ErrorType::Application => "application",
        }
    }
}

// ===== impl ErrorTag =====

impl ErrorTag {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorTag::InUse => "in-use",
            ErrorTag::InvalidValue => "invalid-value",
            ErrorTag::TooBig => "too-big",
            ErrorTag::MissingAttribute => "missing-attribute",
            ErrorTag::BadAttribute => "bad-attribute",
            ErrorTag::UnknownAttribute => "unknown-attribute",
            ErrorTag::MissingElement => "missing-element",
            ErrorTag::BadElement => "bad-element",
            ErrorTag::UnknownElement => "unknown-element",
            ErrorTag::UnknownNamespace => "unknown-namespace",
            ErrorTag::AccessDenied => "access-denied",
            ErrorTag::LockDenied => "lock-denied",
            ErrorTag::ResourceDenied => "resource-denied",
            ErrorTag::RollbackFailed => "rollback-failed",
            ErrorTag::DataExists => "data-exists",
            ErrorTag::DataMissing => "data-missing",
            ErrorTag::OperationNotSupported => "operation-not-supported",
            ErrorTag::OperationFailed => "operation-failed",
            ErrorTag::PartialOperation => "partial-operation",
            ErrorTag::MalformedMessage => "malformed-message",
        }
    }

    /// RESTCONF status code for this tag. `access-denied` distinguishes
    /// unauthenticated (401) from unauthorized (403) requests.
    pub const fn http_status(&self, authenticated: bool) -> u16 {
        match self {
            ErrorTag::InvalidValue
            | ErrorTag::MissingAttribute
            | ErrorTag::BadAttribute
            | ErrorTag::UnknownAttribute
            | ErrorTag::MissingElement
            | ErrorTag::BadElement
            | ErrorTag::UnknownElement
            | ErrorTag::UnknownNamespace
            | ErrorTag::MalformedMessage => 400,
            ErrorTag::AccessDenied => {
                if authenticated { 403 } else { 401 }
            }
            ErrorTag::TooBig => 413,
            ErrorTag::InUse
            | ErrorTag::LockDenied
            | ErrorTag::ResourceDenied
            | ErrorTag::DataExists
            | ErrorTag::DataMissing => 409,
            ErrorTag::OperationNotSupported => 405,
            ErrorTag::RollbackFailed
            | ErrorTag::OperationFailed
            | ErrorTag::PartialOperation => 500,
        }
    }
}

// ===== impl ErrorSeverity =====

impl ErrorSeverity {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Error => "error",
            ErrorSeverity::Warning => "warning",
        }
    }
}

// ===== impl ErrorRecord =====

impl ErrorRecord {
    pub fn new(error_type: ErrorType, tag: ErrorTag) -> ErrorRecord {
        ErrorRecord {
            error_type,
            tag,
            severity: ErrorSeverity::Error,
            path: None,
            message: None,
            info: None,
        }
    }

    pub fn application(tag: ErrorTag, message: &str) -> ErrorRecord {
        let mut error = ErrorRecord::new(ErrorType::Application, tag);
        error.message = Some(message.to_owned());
        error
    }

    pub fn protocol(tag: ErrorTag, message: &str) -> ErrorRecord {
        let mut error = ErrorRecord::new(ErrorType::Protocol, tag);
        error.message = Some(message.to_owned());
        error
    }

    pub fn rpc(tag: ErrorTag, message: &str) -> ErrorRecord {
        let mut error = ErrorRecord::new(ErrorType::Rpc, tag);
        error.message = Some(message.to_owned());
        error
    }

    #[must_use]
    pub fn with_path(mut self, path: &str) -> ErrorRecord {
        self.path = Some(path.to_owned());
        self
    }

    #[must_use]
    pub fn with_info(mut self, info: &str) -> ErrorRecord {
        self.info = Some(info.to_owned());
        self
    }

    /// Renders the record as a NETCONF `<rpc-error>` element.
    pub fn to_xml(&self) -> XmlElement {
        let mut element = XmlElement::new("rpc-error");
        let mut push = |name: &str, text: &str| {
            let mut child = XmlElement::new(name);
            child.text = Some(text.to_owned());
            element.children.push(child);
        };
        push("error-type", self.error_type.as_str());
        push("error-tag", self.tag.as_str());
        push("error-severity", self.severity.as_str());
        if let Some(path) = &self.path {
            push("error-path", path);
        }
        if let Some(message) = &self.message {
            push("error-message", message);
        }
        if let Some(info) = &self.info {
            push("error-info", info);
        }
        element
    }

    fn to_restconf_json(&self) -> Value {
        let mut error = serde_json::Map::new();
        error.insert("error-type".to_owned(), json!(self.error_type.as_str()));
        error.insert("error-tag".to_owned(), json!(self.tag.as_str()));
        if let Some(path) = &self.path {
            error.insert("error-path".to_owned(), json!(path));
        }
        if let Some(message) = &self.message {
            error.insert("error-message".to_owned(), json!(message));
        }
        if let Some(info) = &self.info {
            error.insert("error-info".to_owned(), json!(info));
        }
        Value::Object(error)
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag.as_str())?;
        if let Some(path) = &self.path {
            write!(f, " at {path}")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl From<conifer_datastore::Error> for ErrorRecord {
    fn from(error: conifer_datastore::Error) -> ErrorRecord {
        use conifer_datastore::Error;

        match &error {
            Error::StoreAbsent(..) => ErrorRecord::application(
                ErrorTag::MissingElement,
                &error.to_string(),
            ),
            Error::DataExists(path) => {
                ErrorRecord::application(ErrorTag::DataExists, "data exists")
                    .with_path(path)
            }
            Error::DataMissing(path) => {
                ErrorRecord::application(ErrorTag::DataMissing, "data missing")
                    .with_path(path)
            }
            Error::UnknownElement(..) => ErrorRecord::protocol(
                ErrorTag::BadElement,
                &error.to_string(),
            ),
            Error::UnknownOperation(..) | Error::InvalidPath(..) => {
                ErrorRecord::protocol(
                    ErrorTag::BadAttribute,
                    &error.to_string(),
                )
            }
            Error::Xml(..) => ErrorRecord::rpc(
                ErrorTag::MalformedMessage,
                &error.to_string(),
            ),
            // Internal conditions never leak implementation identifiers.
            Error::Io(..) => ErrorRecord::application(
                ErrorTag::OperationFailed,
                "internal error",
            ),
        }
    }
}

impl From<&ValidationError> for ErrorRecord {
    fn from(error: &ValidationError) -> ErrorRecord {
        let tag = match error.kind {
            ValidationErrorKind::InvalidValue => ErrorTag::InvalidValue,
            ValidationErrorKind::MissingMandatory
            | ValidationErrorKind::MissingKey => ErrorTag::MissingElement,
            ValidationErrorKind::DuplicateEntry
            | ValidationErrorKind::UniqueViolation
            | ValidationErrorKind::MustViolation => ErrorTag::OperationFailed,
            ValidationErrorKind::LeafrefMissing => ErrorTag::DataMissing,
            ValidationErrorKind::WhenViolation => ErrorTag::UnknownElement,
        };
        ErrorRecord::application(tag, &error.message).with_path(&error.path)
    }
}

// ===== global functions =====

/// Renders a non-empty error list as the RESTCONF `ietf-restconf:errors`
/// JSON body.
pub fn restconf_errors_json(errors: &[ErrorRecord]) -> Value {
    json!({
        "ietf-restconf:errors": {
            "error": errors
                .iter()
                .map(ErrorRecord::to_restconf_json)
                .collect::<Vec<_>>(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_xml() {
        let error = ErrorRecord::application(ErrorTag::OperationFailed, "boom")
            .with_path("/conifer-system:system");
        let xml = error.to_xml().print_string(false);
        assert_eq!(
            xml,
            "<rpc-error>\
             <error-type>application</error-type>\
             <error-tag>operation-failed</error-tag>\
             <error-severity>error</error-severity>\
             <error-path>/conifer-system:system</error-path>\
             <error-message>boom</error-message>\
             </rpc-error>"
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorTag::InvalidValue.http_status(true), 400);
        assert_eq!(ErrorTag::MissingElement.http_status(true), 400);
        assert_eq!(ErrorTag::AccessDenied.http_status(false), 401);
        assert_eq!(ErrorTag::AccessDenied.http_status(true), 403);
        assert_eq!(ErrorTag::LockDenied.http_status(true), 409);
        assert_eq!(ErrorTag::DataExists.http_status(true), 409);
        assert_eq!(ErrorTag::OperationNotSupported.http_status(true), 405);
        assert_eq!(ErrorTag::OperationFailed.http_status(true), 500);
    }

    #[test]
    fn test_restconf_errors_body() {
        let errors = [ErrorRecord::protocol(
            ErrorTag::OperationNotSupported,
            "unsupported media type",
        )];
        let body = restconf_errors_json(&errors);
        assert_eq!(
            body["ietf-restconf:errors"]["error"][0]["error-tag"],
            "operation-not-supported"
        );
    }
}
