//! CLI smoke host.
//!
//! # Responsibility
//! - Mount the plugin template into an in-memory host and activate it.
//! - Issue a few requests and print the responses as JSON lines.

use clap::Parser;
use log::LevelFilter;
use plugin_template_core::{
    core_version, init_logging, ExtensionRegistry, ExtensionRequest, HostContext, HttpMethod,
    InMemoryConfigStore, PluginTemplate, Principal, Role,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "plugin_template_cli",
    author,
    version,
    about = "Smoke host for the plugin template"
)]
struct Args {
    /// Host data directory holding the override file (defaults to the working directory)
    data_dir: Option<PathBuf>,

    /// Absolute directory for rolling log files; logging stays off without it
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log level filter (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", value_parser = parse_level)]
    log_level: LevelFilter,
}

fn parse_level(value: &str) -> Result<LevelFilter, String> {
    value
        .parse::<LevelFilter>()
        .map_err(|_| format!("unknown log level `{value}`"))
}

fn main() -> ExitCode {
    let args = Args::parse();
    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(err) => {
                eprintln!("error: no working directory: {err}");
                return ExitCode::from(2);
            }
        },
    };
    let mut host = HostContext::new(&data_dir);
    if let Some(log_dir) = &args.log_dir {
        match init_logging(args.log_level, log_dir) {
            Ok(sink) => host = host.with_log_sink(Arc::new(sink)),
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::from(2);
            }
        }
    }

    let template = match PluginTemplate::new() {
        Ok(template) => Arc::new(template),
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let mut registry = ExtensionRegistry::new();
    if let Err(err) = registry.register(template) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    let store = Arc::new(InMemoryConfigStore::new());
    let host = host.with_config_store(store.clone());
    println!(
        "{}",
        json!({ "event": "start", "core_version": core_version(), "data_dir": data_dir })
    );

    let mut healthy = true;
    for report in registry.activate_all(&host) {
        let error = report.outcome.as_ref().err().map(|fault| fault.error_chain());
        healthy &= error.is_none();
        println!(
            "{}",
            json!({ "event": "activate", "extension": report.extension_id, "error": error })
        );
    }
    println!("{}", json!({ "event": "infos", "infos": registry.infos() }));

    let admin = Principal::new("smoke", [Role::Admin]);
    let requests = [
        ExtensionRequest::new(HttpMethod::Get, "/api/plugins/ots_plugin_template"),
        ExtensionRequest::new(HttpMethod::Get, "/api/plugins/ots_plugin_template/config")
            .with_principal(admin),
        ExtensionRequest::new(HttpMethod::Get, "/api/plugins/ots_plugin_template/ui"),
    ];
    for request in &requests {
        let response = registry.dispatch(request);
        let body = response
            .json_body()
            .unwrap_or_else(|| json!({ "bytes": response.body.len() }));
        println!(
            "{}",
            json!({
                "event": "request",
                "method": request.method,
                "path": request.path,
                "status": response.status,
                "content_type": response.content_type,
                "body": body,
            })
        );
    }

    registry.stop_all();
    let published: Value = json!(store.snapshot());
    println!("{}", json!({ "event": "stop", "published": published }));
    log::info!("event=smoke_host module=cli status=ok healthy={healthy}");

    if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::Args;
    use clap::{CommandFactory, Parser};
    use log::LevelFilter;
    use std::path::PathBuf;

    #[test]
    fn command_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_data_dir_and_logging_flags() {
        let args = Args::try_parse_from([
            "plugin_template_cli",
            "/srv/host-data",
            "--log-dir",
            "/var/log/host",
            "--log-level",
            "debug",
        ])
        .expect("valid arguments");
        assert_eq!(args.data_dir, Some(PathBuf::from("/srv/host-data")));
        assert_eq!(args.log_dir, Some(PathBuf::from("/var/log/host")));
        assert_eq!(args.log_level, LevelFilter::Debug);
    }

    #[test]
    fn defaults_without_arguments() {
        let args = Args::try_parse_from(["plugin_template_cli"]).expect("no arguments");
        assert_eq!(args.data_dir, None);
        assert_eq!(args.log_dir, None);
        assert_eq!(args.log_level, LevelFilter::Info);
    }

    #[test]
    fn rejects_unknown_level_and_flags() {
        assert!(Args::try_parse_from(["plugin_template_cli", "--log-level", "loud"]).is_err());
        assert!(Args::try_parse_from(["plugin_template_cli", "--verbose"]).is_err());
    }
}
