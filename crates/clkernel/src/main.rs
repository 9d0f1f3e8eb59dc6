//
// main.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! Main binary entry point for the Callisto kernel.

#![allow(missing_docs)]

use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

use clap::{command, Parser};
use clkernel::backend::EchoBackend;
use clkernel::connection_file::ConnectionConfig;
use clkernel::kernel_options::KernelOptions;
use clkernel::server::Kernel;
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The path to the Jupyter connection file describing the transport,
    /// address, ports and signing key the kernel should use.
    #[arg(short = 'f', long)]
    connection_file: String,

    /// The log level to use. Valid values are "trace", "debug", "info", "warn",
    /// and "error". If not specified, the default log level is "info", or the
    /// value of `RUST_LOG` if set.
    #[arg(short, long)]
    log_level: Option<String>,

    /// The path to a log file. If specified, log output will be written to this
    /// file in addition to standard streams.
    #[arg(long)]
    log_file: Option<String>,

    /// The number of seconds to wait for all channels to bind before giving
    /// up.
    #[arg(long, default_value_t = 30)]
    bind_timeout: u64,

    /// The number of milliseconds channels may spend flushing queued messages
    /// when the kernel shuts down.
    #[arg(long, default_value_t = 2000)]
    shutdown_grace_ms: u64,
}

/// Derive the log level from the arguments or the environment.
fn log_level(args: &Args) -> LevelFilter {
    let log_level = match args.log_level {
        Some(ref level) => level.to_string(),
        None => match std::env::var("RUST_LOG") {
            Ok(level) => level,
            Err(_) => "info".to_string(),
        },
    };

    match log_level.as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            println!("Invalid log level '{}'; using 'info'", log_level);
            LevelFilter::Info
        }
    }
}

fn init_logging(args: &Args) {
    let log_level = log_level(args);

    match args.log_file {
        Some(ref log_file) => {
            let file = match File::create(log_file) {
                Ok(file) => file,
                Err(err) => {
                    println!("Failed to create log file '{}': {}", log_file, err);
                    std::process::exit(1);
                }
            };
            // A log file was provided; use a combined logger that writes to the
            // log file and stdout
            if let Err(err) = CombinedLogger::init(vec![
                TermLogger::new(
                    log_level,
                    Config::default(),
                    TerminalMode::Mixed,
                    ColorChoice::Auto,
                ),
                WriteLogger::new(log_level, Config::default(), file),
            ]) {
                // Consider it a fatal error if we can't initialize logging
                println!(
                    "Failed to initialize combined file/terminal logging: {}",
                    err
                );
                std::process::exit(1);
            }
        }
        None => {
            if let Err(err) = TermLogger::init(
                log_level,
                Config::default(),
                TerminalMode::Mixed,
                ColorChoice::Auto,
            ) {
                // Consider it a fatal error if we can't initialize logging
                println!("Failed to initialize terminal logging: {}", err);
                std::process::exit(1);
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args);

    let config = match ConnectionConfig::from_file(&args.connection_file) {
        Ok(config) => config,
        Err(err) => {
            err.log();
            log::error!(
                "Cannot start without a usable connection file ('{}')",
                args.connection_file
            );
            std::process::exit(1);
        }
    };

    let options = KernelOptions {
        shutdown_grace: Duration::from_millis(args.shutdown_grace_ms),
        ..KernelOptions::default()
    };

    log::debug!(
        "Starting {} {} ({} transport on {})",
        options.implementation,
        options.implementation_version,
        config.transport,
        config.ip
    );

    let kernel = match Kernel::start(config, Arc::new(EchoBackend::new()), options) {
        Ok(kernel) => kernel,
        Err(err) => {
            err.log();
            std::process::exit(1);
        }
    };

    if let Err(err) = kernel
        .wait_until_bound(Duration::from_secs(args.bind_timeout))
        .await
    {
        err.log();
        log::error!(
            "Not all channels could be bound within {}s; is another process using the ports?",
            args.bind_timeout
        );
        std::process::exit(1);
    }

    // Stop cleanly on Ctrl-C as well as on a shutdown request
    let session = kernel.session().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted; shutting down");
            session.stop_unrequested().await;
        }
    });

    kernel.run().await;
    log::info!("Kernel stopped");
}
