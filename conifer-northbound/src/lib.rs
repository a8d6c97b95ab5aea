//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod error;
pub mod plugin;
pub mod transaction;

pub use crate::error::{
    ErrorRecord, ErrorSeverity, ErrorTag, ErrorType, restconf_errors_json,
};
pub use crate::plugin::{
    AuthDecision, AuthRequest, Plugin, PluginCapabilities, PluginRegistry,
};
pub use crate::transaction::{Outcome, Phase, RevertReason, Transaction};
