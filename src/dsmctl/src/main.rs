// Copyright 2018 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! `dsmctl` checks a DSM option string the way a master or client node would and
//! prints the tables the engine would be opened with.

use std::fs::OpenOptions;
use std::io::LineWriter;
use std::path::PathBuf;
use std::process::ExitCode;

use dsm::logger::{
    error, info, LevelFilter, LevelFilterFromStrError, LoggerConfig, LoggerInitError,
    LoggerUpdateError, MetricsError, LOGGER, METRICS,
};
use dsm::{ConfigBuilder, ConfigError, DsmOptions, MigrationPorts, GUEST_PAGE_SIZE};
use utils::arg_parser::{ArgParser, ArgParserError, Argument};

const DSMCTL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DsmExitCode {
    /// Success exit code.
    Ok = 0,
    /// Generic error exit code.
    GenericError = 1,
    /// The option string or the command line values are invalid.
    BadConfiguration = 152,
    /// Command line arguments parsing error.
    ArgParsing = 153,
}

#[derive(Debug, thiserror::Error, displaydoc::Display)]
enum MainError {
    /// Failed to register the logger: {0}
    LoggerInit(LoggerInitError),
    /// Failed to configure the logger: {0}
    LoggerUpdate(LoggerUpdateError),
    /// Invalid value for logger level: {0}
    InvalidLogLevel(LevelFilterFromStrError),
    /// Arguments parsing error: {0}. For more information try --help.
    ParseArguments(ArgParserError),
    /// One of --master or --client is required.
    MissingRole,
    /// Invalid page size `{0}`, expected a power of two.
    InvalidPageSize(String),
    /// Invalid DSM configuration: {0}
    Config(#[from] ConfigError),
    /// Failed to open the metrics file: {0}
    MetricsFile(std::io::Error),
    /// Failed to write metrics: {0}
    Metrics(MetricsError),
}

impl From<&MainError> for DsmExitCode {
    fn from(err: &MainError) -> Self {
        match err {
            MainError::ParseArguments(_) | MainError::MissingRole => DsmExitCode::ArgParsing,
            MainError::InvalidLogLevel(_)
            | MainError::InvalidPageSize(_)
            | MainError::Config(_) => DsmExitCode::BadConfiguration,
            MainError::LoggerInit(_)
            | MainError::LoggerUpdate(_)
            | MainError::MetricsFile(_)
            | MainError::Metrics(_) => DsmExitCode::GenericError,
        }
    }
}

fn main() -> ExitCode {
    let exit_code = match main_exec() {
        Ok(()) => DsmExitCode::Ok,
        Err(err) => {
            error!("{err}");
            eprintln!("Error: {err}");
            DsmExitCode::from(&err)
        }
    };
    ExitCode::from(exit_code as u8)
}

fn build_arg_parser() -> ArgParser<'static> {
    ArgParser::new()
        .arg(
            Argument::new("master")
                .takes_value(true)
                .conflicts_with("client")
                .help("Option string of a master node: dsmid=..,vminfo=..,mr=.."),
        )
        .arg(
            Argument::new("client")
                .takes_value(true)
                .help("Option string of a client node: dsmid=..,vmid=..,master=.."),
        )
        .arg(
            Argument::new("page-size")
                .takes_value(true)
                .help("Alignment unit of region sizes, in bytes."),
        )
        .arg(
            Argument::new("ports-file")
                .takes_value(true)
                .help("Port file to read instead of $HOME/.dsm_config."),
        )
        .arg(
            Argument::new("metrics-path")
                .takes_value(true)
                .help("File the metrics are appended to before exiting."),
        )
        .arg(
            Argument::new("log-path")
                .takes_value(true)
                .help("Path to a fifo or a file used for configuring the logger on startup."),
        )
        .arg(
            Argument::new("level")
                .takes_value(true)
                .help("Set the logger level."),
        )
        .arg(
            Argument::new("module")
                .takes_value(true)
                .help("Set the logger module filter."),
        )
        .arg(
            Argument::new("show-level")
                .takes_value(false)
                .help("Whether or not to output the level in the logs."),
        )
        .arg(
            Argument::new("show-log-origin")
                .takes_value(false)
                .help(
                    "Whether or not to include the file path and line number of the log's origin.",
                ),
        )
}

fn main_exec() -> Result<(), MainError> {
    LOGGER.init().map_err(MainError::LoggerInit)?;

    let mut arg_parser = build_arg_parser();
    arg_parser
        .parse_from_cmdline()
        .map_err(MainError::ParseArguments)?;
    let arguments = arg_parser.arguments();

    if arguments.flag_present("help") {
        println!("dsmctl v{DSMCTL_VERSION}\n");
        println!("{}", arg_parser.formatted_help());
        return Ok(());
    }
    if arguments.flag_present("version") {
        println!("dsmctl v{DSMCTL_VERSION}");
        return Ok(());
    }

    let level = arguments
        .single_value("level")
        .map(|level| level.parse::<LevelFilter>())
        .transpose()
        .map_err(MainError::InvalidLogLevel)?;
    LOGGER
        .update(LoggerConfig {
            log_path: arguments.single_value("log-path").map(PathBuf::from),
            level,
            show_level: Some(arguments.flag_present("show-level")),
            show_log_origin: Some(arguments.flag_present("show-log-origin")),
            module: arguments.single_value("module"),
        })
        .map_err(MainError::LoggerUpdate)?;
    info!("Running dsmctl v{DSMCTL_VERSION}");

    if let Some(path) = arguments.single_value("metrics-path") {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(MainError::MetricsFile)?;
        METRICS
            .init(LineWriter::new(file))
            .map_err(MainError::Metrics)?;
    }

    let page_size = match arguments.single_value("page-size") {
        Some(value) => parse_page_size(&value)?,
        None => GUEST_PAGE_SIZE,
    };
    let builder = ConfigBuilder::new().with_page_size(page_size);

    let tables = match (
        arguments.single_value("master"),
        arguments.single_value("client"),
    ) {
        (Some(options), _) => describe_master(&builder, &options)?,
        (None, Some(options)) => describe_client(&builder, &options)?,
        (None, None) => return Err(MainError::MissingRole),
    };
    print!("{tables}");

    let ports = match arguments.single_value("ports-file") {
        Some(path) => MigrationPorts::from_path(path),
        None => MigrationPorts::load(),
    };
    println!(
        "ports: rdma {}, tcp sync {}",
        ports.rdma_port, ports.tcp_sync_port
    );

    METRICS.write().map_err(MainError::Metrics)?;
    Ok(())
}

fn parse_page_size(value: &str) -> Result<u64, MainError> {
    value
        .parse::<u64>()
        .ok()
        .filter(|page_size| page_size.is_power_of_two())
        .ok_or_else(|| MainError::InvalidPageSize(value.to_string()))
}

fn describe_master(builder: &ConfigBuilder, options: &str) -> Result<String, ConfigError> {
    let config = builder.build_master(&DsmOptions::parse(options)?)?;
    Ok(format!(
        "master of domain {} (node {})\n{config}",
        config.domain_id, config.local_node_id
    ))
}

fn describe_client(builder: &ConfigBuilder, options: &str) -> Result<String, ConfigError> {
    let config = builder.build_client(&DsmOptions::parse(options)?)?;
    Ok(format!("client {config}\n"))
}

#[cfg(test)]
mod tests {
    use dsm::{NodeError, RegionError};
    use utils::tempfile::TempFile;

    use super::*;

    fn parse(args: &[&str]) -> Result<ArgParser<'static>, ArgParserError> {
        let mut parser = build_arg_parser();
        let args: Vec<String> = std::iter::once("dsmctl")
            .chain(args.iter().copied())
            .map(String::from)
            .collect();
        parser.parse_args(&args)?;
        Ok(parser)
    }

    #[test]
    fn test_arguments() {
        let parser = parse(&["--master", "dsmid=1", "--show-level"]).unwrap();
        let arguments = parser.arguments();
        assert_eq!(arguments.single_value("master").as_deref(), Some("dsmid=1"));
        assert!(arguments.flag_present("show-level"));
        assert!(!arguments.flag_present("show-log-origin"));

        assert_eq!(
            parse(&["--master", "dsmid=1", "--client", "dsmid=1"]).unwrap_err(),
            ArgParserError::ConflictingArguments("master".to_string(), "client".to_string())
        );
        assert_eq!(
            parse(&["--level"]).unwrap_err(),
            ArgParserError::MissingValue("level".to_string())
        );
        assert!(parse(&["--help"]).unwrap().arguments().flag_present("help"));
    }

    #[test]
    fn test_describe_master() {
        let text = describe_master(
            &ConfigBuilder::new(),
            "dsmid=1,vminfo=1:10.0.0.1:4444:4445#2:10.0.0.2:4444:4445,mr=1:8192:2",
        )
        .unwrap();
        assert!(text.starts_with("master of domain 1 (node 1)\nnodes:\n"));
        assert!(text.contains("regions:\n"));
        assert_eq!(text.lines().count(), 6);

        assert_eq!(
            describe_master(
                &ConfigBuilder::new().with_page_size(16384),
                "dsmid=1,vminfo=1:10.0.0.1:4444:4445#2:10.0.0.2:4444:4445,mr=1:8192:2",
            ),
            Err(ConfigError::Region(RegionError::InvalidSize {
                region_id: 1,
                size: 8192,
                page_size: 16384
            }))
        );
    }

    #[test]
    fn test_describe_client() {
        let text = describe_client(
            &ConfigBuilder::new(),
            "dsmid=1,vmid=2,master=10.0.0.1:4444:4445",
        )
        .unwrap();
        assert_eq!(
            text,
            "client { domain: 1, node: 2, master: 10.0.0.1:4445 (rdma 4444) }\n"
        );

        assert_eq!(
            describe_client(&ConfigBuilder::new(), "dsmid=1,vmid=0,master=10.0.0.1:1:2"),
            Err(ConfigError::Node(NodeError::InvalidNodeId(0)))
        );
    }

    #[test]
    fn test_page_size() {
        assert_eq!(parse_page_size("16384").unwrap(), 16384);
        assert!(matches!(
            parse_page_size("0"),
            Err(MainError::InvalidPageSize(_))
        ));
        assert!(matches!(
            parse_page_size("3000"),
            Err(MainError::InvalidPageSize(_))
        ));
        assert!(matches!(
            parse_page_size("four"),
            Err(MainError::InvalidPageSize(_))
        ));
    }

    #[test]
    fn test_ports_file() {
        let file = TempFile::new().unwrap();
        assert_eq!(
            MigrationPorts::from_path(file.as_path()),
            MigrationPorts::default()
        );
        std::fs::write(file.as_path(), "RDMA_PORT=5000\n").unwrap();
        assert_eq!(MigrationPorts::from_path(file.as_path()).rdma_port, 5000);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            DsmExitCode::from(&MainError::MissingRole),
            DsmExitCode::ArgParsing
        );
        assert_eq!(
            DsmExitCode::from(&MainError::Config(ConfigError::EmptyNodeList)),
            DsmExitCode::BadConfiguration
        );
        assert_eq!(
            DsmExitCode::from(&MainError::InvalidPageSize(String::from("0"))),
            DsmExitCode::BadConfiguration
        );
        assert_eq!(
            DsmExitCode::from(&MainError::MetricsFile(std::io::Error::from(
                std::io::ErrorKind::NotFound
            ))),
            DsmExitCode::GenericError
        );
        assert_eq!(DsmExitCode::Ok as u8, 0);
        assert_eq!(DsmExitCode::ArgParsing as u8, 153);
    }
}
