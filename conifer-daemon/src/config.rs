//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub user: String,
    pub datastore_dir: String,
    pub database_path: String,
    pub logging: Logging,
    pub transport: Transport,
    pub netconf: Netconf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub journald: LoggingJournald,
    pub file: LoggingFile,
    pub stdout: LoggingStdout,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingJournald {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFile {
    pub enabled: bool,
    pub dir: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
    pub colors: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Transport {
    pub family: TransportFamily,
    // Socket path (unix) or listen address (ipv4/ipv6).
    pub path: String,
    pub address: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TransportFamily {
    Unix,
    Ipv4,
    Ipv6,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Netconf {
    pub framing: Framing,
    // With autolock enabled the dispatcher takes and releases the target
    // datastore lock around each edit-config; otherwise an explicit lock is
    // required first.
    pub autolock: bool,
    // Soft per-callback timeout, in seconds. An overrun counts as a
    // callback failure.
    pub callback_timeout: u64,
}

/// NETCONF message framing on the client transport.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// RFC 6242 chunked framing.
    Chunked,
    /// Legacy `]]>]]>` end-of-message framing.
    EndOfMessage,
}

// ===== impl Config =====

impl Config {
    pub(crate) fn load(config_file: &str) -> Config {
        match std::fs::read_to_string(config_file) {
            Ok(config_str) => toml::from_str(&config_str)
                .expect("Failed to parse configuration file"),
            Err(err) => {
                eprintln!("Failed to load configuration file: {err}");
                eprintln!("Falling back to default configuration...");
                Config::default()
            }
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            user: "conifer".to_owned(),
            datastore_dir: "/var/lib/conifer".to_owned(),
            database_path: "/var/lib/conifer/conifer.db".to_owned(),
            logging: Default::default(),
            transport: Default::default(),
            netconf: Default::default(),
        }
    }
}

// ===== impl LoggingJournald =====

impl Default for LoggingJournald {
    fn default() -> LoggingJournald {
        LoggingJournald { enabled: false }
    }
}

// ===== impl LoggingFile =====

impl Default for LoggingFile {
    fn default() -> LoggingFile {
        LoggingFile {
            enabled: true,
            dir: "/var/log".to_owned(),
            name: "coniferd.log".to_owned(),
        }
    }
}

// ===== impl LoggingStdout =====

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout {
            enabled: false,
            colors: false,
        }
    }
}

// ===== impl Transport =====

impl Default for Transport {
    fn default() -> Transport {
        Transport {
            family: TransportFamily::Unix,
            path: "/var/run/conifer.sock".to_owned(),
            address: "[::1]:8305".to_owned(),
        }
    }
}

impl FromStr for TransportFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<TransportFamily, String> {
        match s {
            "UNIX" | "unix" => Ok(TransportFamily::Unix),
            "IPv4" | "ipv4" => Ok(TransportFamily::Ipv4),
            "IPv6" | "ipv6" => Ok(TransportFamily::Ipv6),
            _ => Err(format!("unknown transport family: {s}")),
        }
    }
}

// ===== impl Netconf =====

impl Default for Netconf {
    fn default() -> Netconf {
        Netconf {
            framing: Framing::Chunked,
            autolock: false,
            callback_timeout: 60,
        }
    }
}
