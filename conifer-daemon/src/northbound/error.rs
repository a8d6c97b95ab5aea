//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use conifer_datastore::Store;
use conifer_datastore::validation::ValidationError;
use conifer_northbound::error::{ErrorRecord, ErrorTag};
use conifer_northbound::transaction::Phase;

//
// Type aliases.
//
pub type Result<T> = std::result::Result<T, Error>;

//
// Northbound errors.
//
#[derive(Debug)]
pub enum Error {
    Datastore(conifer_datastore::Error),
    Validation(Vec<ValidationError>),
    ResetCallback { plugin: &'static str, message: String },
    ValidateCallback { plugin: &'static str, message: String },
    CommitCallback { plugin: &'static str, message: String },
    CallbackTimeout { plugin: &'static str, phase: Phase, seconds: u64 },
    RevertFailed { plugin: &'static str, message: String },
    LockDenied { store: Store, holder: u32 },
    LockRequired { store: Store },
    InUse { store: Store, holder: u32 },
    CommitInProgress,
    AccessDenied,
    SessionNotFound(u32),
    KillSelf,
    TransactionIdNotFound(u32),
    OperationNotSupported(String),
}

// ===== impl Error =====

impl Error {
    /// Converts the failure into its wire currency. Every failure maps to
    /// one or more structured error records; nothing else crosses the
    /// dispatcher boundary.
    pub fn into_error_records(self) -> Vec<ErrorRecord> {
        match self {
            Error::Datastore(error) => vec![error.into()],
            Error::Validation(errors) => {
                errors.iter().map(ErrorRecord::from).collect()
            }
            Error::ResetCallback { plugin, message }
            | Error::ValidateCallback { plugin, message } => {
                vec![
                    ErrorRecord::application(
                        ErrorTag::OperationFailed,
                        &message,
                    )
                    .with_info(plugin),
                ]
            }
            Error::CommitCallback { plugin, message } => {
                vec![
                    ErrorRecord::application(
                        ErrorTag::OperationFailed,
                        &message,
                    )
                    .with_info(plugin),
                ]
            }
            Error::CallbackTimeout { plugin, phase, seconds } => {
                vec![
                    ErrorRecord::application(
                        ErrorTag::OperationFailed,
                        &format!(
                            "{phase} callback exceeded its {seconds}s timeout"
                        ),
                    )
                    .with_info(plugin),
                ]
            }
            Error::RevertFailed { plugin, message } => {
                vec![
                    ErrorRecord::application(
                        ErrorTag::RollbackFailed,
                        &message,
                    )
                    .with_info(plugin),
                ]
            }
            Error::LockDenied { store, holder } => {
                vec![
                    ErrorRecord::protocol(
                        ErrorTag::LockDenied,
                        &format!(
                            "datastore {store} is locked by session {holder}"
                        ),
                    )
                    .with_info(&holder.to_string()),
                ]
            }
            Error::LockRequired { store } => {
                vec![ErrorRecord::protocol(
                    ErrorTag::LockDenied,
                    &format!("datastore {store} must be locked first"),
                )]
            }
            Error::InUse { store, holder } => {
                vec![ErrorRecord::protocol(
                    ErrorTag::InUse,
                    &format!(
                        "datastore {store} is in use by session {holder}"
                    ),
                )]
            }
            Error::CommitInProgress => {
                vec![ErrorRecord::protocol(
                    ErrorTag::InUse,
                    "another commit is in progress",
                )]
            }
            Error::AccessDenied => {
                vec![ErrorRecord::application(
                    ErrorTag::AccessDenied,
                    "access denied",
                )]
            }
            Error::SessionNotFound(id) => {
                vec![ErrorRecord::protocol(
                    ErrorTag::InvalidValue,
                    &format!("session {id} does not exist"),
                )]
            }
            Error::KillSelf => {
                vec![ErrorRecord::protocol(
                    ErrorTag::InvalidValue,
                    "a session cannot kill itself",
                )]
            }
            Error::TransactionIdNotFound(id) => {
                vec![ErrorRecord::application(
                    ErrorTag::InvalidValue,
                    &format!("transaction {id} is not in the rollback log"),
                )]
            }
            Error::OperationNotSupported(message) => {
                vec![ErrorRecord::protocol(
                    ErrorTag::OperationNotSupported,
                    &message,
                )]
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Datastore(error) => {
                write!(f, "datastore error: {error}")
            }
            Error::Validation(errors) => {
                write!(f, "validation failed: ")?;
                for (i, error) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{error}")?;
                }
                Ok(())
            }
            Error::ResetCallback { plugin, message } => {
                write!(f, "reset callback failed ({plugin}): {message}")
            }
            Error::ValidateCallback { plugin, message } => {
                write!(f, "validation callback failed ({plugin}): {message}")
            }
            Error::CommitCallback { plugin, message } => {
                write!(f, "commit callback failed ({plugin}): {message}")
            }
            Error::CallbackTimeout { plugin, phase, seconds } => {
                write!(
                    f,
                    "{phase} callback of {plugin} exceeded {seconds}s timeout"
                )
            }
            Error::RevertFailed { plugin, message } => {
                write!(f, "revert callback failed ({plugin}): {message}")
            }
            Error::LockDenied { store, holder } => {
                write!(f, "datastore {store} is locked by session {holder}")
            }
            Error::LockRequired { store } => {
                write!(f, "datastore {store} must be locked first")
            }
            Error::InUse { store, holder } => {
                write!(f, "datastore {store} is in use by session {holder}")
            }
            Error::CommitInProgress => {
                write!(f, "another commit is in progress")
            }
            Error::AccessDenied => write!(f, "access denied"),
            Error::SessionNotFound(id) => {
                write!(f, "session {id} does not exist")
            }
            Error::KillSelf => write!(f, "a session cannot kill itself"),
            Error::TransactionIdNotFound(id) => {
                write!(f, "transaction {id} is not in the rollback log")
            }
            Error::OperationNotSupported(message) => {
                write!(f, "operation not supported: {message}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<conifer_datastore::Error> for Error {
    fn from(error: conifer_datastore::Error) -> Error {
        Error::Datastore(error)
    }
}
