// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
extern crate hsm_common;
extern crate hsm_utimaco;
extern crate log;
extern crate serde;
extern crate serde_json;
extern crate serde_yaml;

mod config;
mod logger;

use std::collections::HashMap;
use std::fmt;

use hsm_common::PaymentCrypto;
use hsm_utimaco::Utimaco;
use log::{info, warn};

pub mod defs {
    pub const DEFAULT_CONFIG_PATH: &str = "/etc/hsm/utimaco.yaml";
    pub const DEFAULT_LOG_LEVEL: log::Level = log::Level::Info;
    pub const DEFAULT_LOG_TIMESTAMP: bool = false;
    pub const DEFAULT_CVV_KIND: &str = "Cvv1";
}

const USAGE: &str = r#"Utimaco payment HSM client
    Usage:
        hsm-tool <command> [<global options>] [<command options>]

    Global options:
        --config <path>
            Path to the YAML configuration file holding the HSM address, the key
            blobs, and the log settings.
            Default: /etc/hsm/utimaco.yaml

        --help
            Show this usage message.

    Commands:

        pvv --pan <PAN> --pin-block <PIN block>
            Compute the PIN verification value for a PIN block encrypted under
            the TPK.

        offset --pan <PAN> --pin-block <PIN block>
            Compute the IBM 3624 PIN offset for a PIN block encrypted under the
            TPK.

        cvv --pan <PAN> --exp <YYMM> [--kind Cvv1|Cvv2]
            Compute a card verification value. Defaults to Cvv1.

        help
            Show this usage message.

    The result is written to STDOUT as a JSON object, either {"Ok": <value>} or
    {"Err": <error>}.
"#;

enum Error {
    ConfigError(config::Error),
    SessionError(hsm_utimaco::Error),
    HsmError(hsm_common::Error),
    SerdeError(serde_json::Error),
    UsageError(String),
}

impl From<Error> for i32 {
    fn from(_other: Error) -> i32 {
        1
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ConfigError(e) => write!(f, "ConfigError: {:?}", e),
            Self::SessionError(e) => write!(f, "SessionError: {:?}", e),
            Self::HsmError(e) => write!(f, "{}", e),
            Self::SerdeError(_) => write!(f, "internal error"),
            Self::UsageError(s) => write!(f, "Error: {}.\nUse --help for help.", s),
        }
    }
}

/// Parsed command line: the command word plus its `--option value` pairs.
#[derive(Debug, PartialEq)]
struct Invocation {
    command: String,
    config_path: String,
    opts: HashMap<String, String>,
}

fn parse_args<I: Iterator<Item = String>>(mut arg_iter: I) -> Result<Option<Invocation>, Error> {
    let command = match arg_iter.next() {
        Some(cmd) => cmd,
        None => return Err(Error::UsageError("missing command".to_string())),
    };
    match command.as_str() {
        "help" | "--help" | "-h" => return Ok(None),
        "pvv" | "offset" | "cvv" => (),
        _ => return Err(Error::UsageError(format!("invalid command: {}", command))),
    }

    let mut config_path = defs::DEFAULT_CONFIG_PATH.to_string();
    let mut opts = HashMap::new();
    while let Some(word) = arg_iter.next() {
        match word.as_str() {
            "--help" | "-h" => return Ok(None),
            "--config" | "--pan" | "--pin-block" | "--exp" | "--kind" => {
                let value = arg_iter
                    .next()
                    .ok_or_else(|| Error::UsageError(format!("missing value for {}", word)))?;
                if word == "--config" {
                    config_path = value;
                } else {
                    opts.insert(word, value);
                }
            }
            _ => return Err(Error::UsageError(format!("unexpected argument: {}", word))),
        }
    }

    Ok(Some(Invocation {
        command,
        config_path,
        opts,
    }))
}

fn required<'a>(opts: &'a HashMap<String, String>, name: &str) -> Result<&'a str, Error> {
    opts.get(name)
        .map(|v| v.as_str())
        .ok_or_else(|| Error::UsageError(format!("missing {}", name)))
}

/// Run one command against `hsm`. Usage errors come back as the outer `Err`; whatever the HSM
/// (or argument validation) has to say comes back as the inner result.
fn run_command<H: PaymentCrypto>(
    hsm: &H,
    command: &str,
    opts: &HashMap<String, String>,
) -> Result<hsm_common::Result<String>, Error> {
    match command {
        "pvv" => Ok(hsm.pvv(required(opts, "--pan")?, required(opts, "--pin-block")?)),
        "offset" => Ok(hsm.offset(required(opts, "--pan")?, required(opts, "--pin-block")?)),
        "cvv" => {
            let kind = opts
                .get("--kind")
                .map(|k| k.as_str())
                .unwrap_or(defs::DEFAULT_CVV_KIND);
            Ok(hsm.cvv(required(opts, "--pan")?, required(opts, "--exp")?, kind))
        }
        _ => Err(Error::UsageError(format!("invalid command: {}", command))),
    }
}

fn rusty_main() -> Result<(), Error> {
    let mut args = std::env::args();

    // Skip executable name.
    args.next();

    let invocation = match parse_args(args)? {
        Some(inv) => inv,
        None => {
            println!("{}", USAGE);
            return Ok(());
        }
    };

    let mut config =
        config::Config::from_file(invocation.config_path.as_str()).map_err(Error::ConfigError)?;
    logger::Logger::new(config.log.take()).install();

    let (hsm, dial_error) = Utimaco::with_config(config.hsm).map_err(Error::SessionError)?;
    match dial_error {
        Some(e) => warn!("HSM at {} is not reachable yet: {}", hsm.addr(), e),
        None => info!("Connected to HSM at {}", hsm.addr()),
    }

    let result = run_command(&hsm, invocation.command.as_str(), &invocation.opts)?;
    serde_json::to_writer(std::io::stdout(), &result).map_err(Error::SerdeError)?;
    println!();

    result.map(|_| ()).map_err(Error::HsmError)
}

fn main() {
    match rusty_main() {
        Ok(()) => std::process::exit(0),
        Err(Error::HsmError(_)) => std::process::exit(1),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(i32::from(e))
        }
    }
}
