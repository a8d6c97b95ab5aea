//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use conifer_datastore::{DataTree, EditOp, Store};
use conifer_northbound::error::ErrorRecord;
use conifer_northbound::transaction::Transaction;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

pub type Responder<T> = oneshot::Sender<T>;

/// Message towards a session's transport task: a framed payload to write,
/// or an order to drop the connection.
#[derive(Debug)]
pub enum SessionMsg {
    Message(String),
    Shutdown,
}

/// A NETCONF operation, decoded from the wire by the transport task.
#[derive(Debug)]
pub enum Operation {
    GetConfig {
        source: Store,
        filter: Option<String>,
    },
    EditConfig {
        target: Store,
        default_op: EditOp,
        config: DataTree,
    },
    CopyConfig {
        source: ConfigSource,
        target: Store,
    },
    DeleteConfig {
        target: Store,
    },
    Validate {
        source: ConfigSource,
    },
    Commit,
    DiscardChanges,
    Lock {
        target: Store,
    },
    Unlock {
        target: Store,
    },
    CloseSession,
    KillSession {
        session_id: u32,
    },
    CreateSubscription {
        stream: String,
        start_time: Option<String>,
        stop_time: Option<String>,
    },
    Debug {
        level: u32,
    },
    ListTransactions,
    Rollback {
        transaction_id: u32,
    },
}

/// Source of a copy-config or validate operation: a named datastore or an
/// inline `<config>` payload.
#[derive(Debug)]
pub enum ConfigSource {
    Store(Store),
    Config(DataTree),
}

/// Successful reply payload.
#[derive(Debug)]
pub enum Reply {
    Ok,
    Data(DataTree),
    Transactions(Vec<Transaction>),
}

// External client -> Daemon requests.
pub mod client {
    use super::*;

    #[derive(Debug)]
    pub enum Request {
        // A new session appeared on the management transport.
        Attach(AttachRequest),
        // A decoded operation from an attached session.
        Rpc(RpcRequest),
        // A session's transport went away.
        Detach(DetachRequest),
    }

    #[derive(Debug)]
    pub struct AttachRequest {
        pub username: Option<String>,
        pub privileged: bool,
        pub tx: UnboundedSender<SessionMsg>,
        pub responder: Responder<AttachResponse>,
    }

    #[derive(Debug)]
    pub struct AttachResponse {
        pub session_id: u32,
    }

    #[derive(Debug)]
    pub struct RpcRequest {
        pub session_id: u32,
        pub operation: Operation,
        pub responder: Responder<RpcResponse>,
    }

    pub type RpcResponse = Result<Reply, Vec<ErrorRecord>>;

    #[derive(Debug)]
    pub struct DetachRequest {
        pub session_id: u32,
    }

    // ===== impl Request =====

    impl std::fmt::Display for Request {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Request::Attach(_) => write!(f, "Attach"),
                Request::Rpc(request) => {
                    write!(f, "Rpc({})", request.operation.name())
                }
                Request::Detach(_) => write!(f, "Detach"),
            }
        }
    }
}

// ===== impl Operation =====

impl Operation {
    /// Wire name of the operation.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::GetConfig { .. } => "get-config",
            Operation::EditConfig { .. } => "edit-config",
            Operation::CopyConfig { .. } => "copy-config",
            Operation::DeleteConfig { .. } => "delete-config",
            Operation::Validate { .. } => "validate",
            Operation::Commit => "commit",
            Operation::DiscardChanges => "discard-changes",
            Operation::Lock { .. } => "lock",
            Operation::Unlock { .. } => "unlock",
            Operation::CloseSession => "close-session",
            Operation::KillSession { .. } => "kill-session",
            Operation::CreateSubscription { .. } => "create-subscription",
            Operation::Debug { .. } => "debug",
            Operation::ListTransactions => "list-transactions",
            Operation::Rollback { .. } => "rollback",
        }
    }
}
