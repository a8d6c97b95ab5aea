//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;
mod northbound;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{App, Arg};
use config::Config;
use northbound::{Northbound, StartupMode};
use pickledb::{PickleDb, PickleDbDumpPolicy, SerializationMethod};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

fn init_tracing(config: &config::Logging, debug_level: u32) {
    // Enable logging to journald.
    let journald = config.journald.enabled.then(|| {
        tracing_journald::layer().expect("couldn't connect to journald")
    });

    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let file_appender = rolling::never(&config.file.dir, &config.file.name);
        tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(false)
            .with_ansi(false)
            .boxed()
    });

    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(config.stdout.colors)
            .boxed()
    });

    let level = match debug_level {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(journald)
        .with(file)
        .with(stdout)
        .init();
}

fn init_db<P: AsRef<Path>>(
    path: P,
) -> Result<PickleDb, pickledb::error::Error> {
    let dump_policy = PickleDbDumpPolicy::AutoDump;
    let serialization_method = SerializationMethod::Bin;
    match path.as_ref().exists() {
        true => PickleDb::load(path, dump_policy, serialization_method),
        false => Ok(PickleDb::new(path, dump_policy, serialization_method)),
    }
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("Conifer configuration daemon")
        .version(clap::crate_version!())
        .arg(
            Arg::with_name("config")
                .short("f")
                .long("config")
                .value_name("file")
                .required(true)
                .help("Specify the daemon configuration file."),
        )
        .arg(
            Arg::with_name("mode")
                .short("s")
                .long("startup-mode")
                .value_name("mode")
                .help("Startup mode: none|init|startup|running|failsafe."),
        )
        .arg(
            Arg::with_name("extra-config")
                .short("c")
                .long("extra-config")
                .value_name("file")
                .help("Merge an extra XML configuration file at startup."),
        )
        .arg(
            Arg::with_name("log")
                .short("l")
                .long("log")
                .value_name("s|f<path>")
                .help("Log to the system journal (s) or to a file (f<path>)."),
        )
        .arg(
            Arg::with_name("debug")
                .short("D")
                .long("debug")
                .value_name("level")
                .help("Debug level (0-2)."),
        )
        .arg(
            Arg::with_name("family")
                .short("a")
                .long("family")
                .value_name("UNIX|IPv4|IPv6")
                .help("Management transport address family."),
        )
        .arg(
            Arg::with_name("address")
                .short("u")
                .long("address")
                .value_name("addr")
                .help("Socket path (UNIX) or listen address (IPv4/IPv6)."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.value_of("config").unwrap();
    let mut config = Config::load(config_file);

    // Apply command-line overrides.
    let mode = match matches.value_of("mode") {
        Some(value) => match StartupMode::from_str(value) {
            Ok(mode) => mode,
            Err(error) => {
                eprintln!("{error}");
                std::process::exit(1);
            }
        },
        None => StartupMode::default(),
    };
    let extra_xml = matches.value_of("extra-config").map(PathBuf::from);
    let debug_level = matches
        .value_of("debug")
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    if let Some(value) = matches.value_of("log") {
        if value == "s" {
            config.logging.journald.enabled = true;
            config.logging.file.enabled = false;
        } else if let Some(path) = value.strip_prefix('f')
            && !path.is_empty()
        {
            let path = PathBuf::from(path);
            config.logging.file.enabled = true;
            if let Some(dir) = path.parent() {
                config.logging.file.dir = dir.to_string_lossy().into_owned();
            }
            if let Some(name) = path.file_name() {
                config.logging.file.name = name.to_string_lossy().into_owned();
            }
        } else {
            eprintln!("invalid log destination: {value}");
            std::process::exit(1);
        }
    }
    if let Some(value) = matches.value_of("family") {
        match value.parse() {
            Ok(family) => config.transport.family = family,
            Err(error) => {
                eprintln!("{error}");
                std::process::exit(1);
            }
        }
    }
    if let Some(value) = matches.value_of("address") {
        match config.transport.family {
            config::TransportFamily::Unix => {
                config.transport.path = value.to_owned();
            }
            _ => config.transport.address = value.to_owned(),
        }
    }

    // Initialize tracing.
    init_tracing(&config.logging, debug_level);

    // Initialize the rollback log.
    let db = init_db(&config.database_path)
        .expect("failed to initialize the rollback log");

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // We're ready to go!
    info!("starting up");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(async {
            let mut nb = match Northbound::init(&config, db) {
                Ok(nb) => nb,
                Err(error) => {
                    error!(%error, "initialization failed");
                    std::process::exit(1);
                }
            };
            nb.debug_level = debug_level;

            // Bring the datastores to a validated running state before
            // serving clients.
            match nb.startup(mode, extra_xml.as_deref()) {
                Ok(report) => {
                    if report.failsafe {
                        warn!("daemon is running in failsafe mode");
                    }
                }
                Err(error) => {
                    error!(%error, "startup failed");
                    std::process::exit(1);
                }
            }
            nb.listen(&config);

            // Relay termination signals into the main event loop.
            let (signal_tx, signal_rx) = mpsc::channel(1);
            tokio::spawn(async move {
                let mut terminate = signal(SignalKind::terminate())
                    .expect("failed to register signal handler");
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => (),
                    _ = terminate.recv() => (),
                }
                let _ = signal_tx.send(()).await;
            });

            nb.run(signal_rx).await;
        });

    info!("exiting");
}
