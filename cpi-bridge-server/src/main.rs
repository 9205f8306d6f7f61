use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use cpi_bridge::transport::{ListenAddr, ServerConfig};
use cpi_bridge::{CommandRunner, CpiService, PluginResolver};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "\
Usage: cpi-bridge [--net unix|tcp] [--addr <addr>] [--plugin-dir <dir>] [--plugin-timeout <secs>]

Options:
  --net <net>               Listen type: unix or tcp [default: unix]
  --addr <addr>             Socket path, or host:port for tcp [default: /tmp/cpi.socket]
  --plugin-dir <dir>        Only run plugins found in this directory
  --plugin-timeout <secs>   Kill plugins running longer than this

Environment:
  CPI_BRIDGE_LOG            debug, info, warn or error [default: info]
  RUST_LOG                  Full tracing filter, overrides CPI_BRIDGE_LOG
  LOG_FORMAT                Set to json for JSON logs";

#[derive(Debug, PartialEq)]
struct Options {
    listen: ListenAddr,
    plugin_dir: Option<PathBuf>,
    plugin_timeout: Option<Duration>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let options = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(options) {
        tracing::error!(error = %format!("{e:#}"), "cpi-bridge exited with error");
        process::exit(1);
    }
}

#[tokio::main]
async fn run(options: Options) -> anyhow::Result<()> {
    let mut runner = CommandRunner::new();
    if let Some(timeout) = options.plugin_timeout {
        runner = runner.with_timeout(timeout);
    }

    let resolver = match options.plugin_dir {
        Some(dir) => PluginResolver::confined_to(dir),
        None => PluginResolver::new(),
    };

    tracing::info!(
        version = cpi_bridge::CPI_BRIDGE_VERSION,
        listen = %options.listen,
        plugin_dir = ?resolver.dir(),
        plugin_timeout = ?runner.timeout(),
        "Starting cpi-bridge"
    );

    let service = Arc::new(CpiService::new(Arc::new(runner)).with_resolver(resolver));
    let config = ServerConfig {
        listen: options.listen,
    };

    cpi_bridge::transport::serve(config, service).await
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut net = "unix".to_string();
    let mut addr: Option<String> = None;
    let mut plugin_dir = None;
    let mut plugin_timeout = None;

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--net" => {
                i += 1;
                net = args.get(i).ok_or("--net requires a value")?.clone();
            }
            "--addr" => {
                i += 1;
                addr = Some(args.get(i).ok_or("--addr requires a value")?.clone());
            }
            "--plugin-dir" => {
                i += 1;
                plugin_dir = Some(PathBuf::from(
                    args.get(i).ok_or("--plugin-dir requires a value")?,
                ));
            }
            "--plugin-timeout" => {
                i += 1;
                let value = args.get(i).ok_or("--plugin-timeout requires a value")?;
                let secs: u64 = value
                    .parse()
                    .map_err(|_| format!("invalid --plugin-timeout '{value}'"))?;
                if secs == 0 {
                    return Err("--plugin-timeout must be positive".to_string());
                }
                plugin_timeout = Some(Duration::from_secs(secs));
            }
            "--help" | "-h" => return Err("".to_string()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    let listen = match net.as_str() {
        "unix" => ListenAddr::Unix(PathBuf::from(
            addr.as_deref()
                .unwrap_or(cpi_bridge::transport::http::DEFAULT_SOCKET_PATH),
        )),
        "tcp" => {
            let addr = addr.ok_or("--net tcp requires --addr <host:port>")?;
            ListenAddr::Tcp(
                addr.parse()
                    .map_err(|_| format!("invalid tcp address '{addr}'"))?,
            )
        }
        other => return Err(format!("invalid --net '{other}', expected 'unix' or 'tcp'")),
    };

    Ok(Options {
        listen,
        plugin_dir,
        plugin_timeout,
    })
}

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("CPI_BRIDGE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };

        EnvFilter::new(format!(
            "cpi_bridge={level},cpi_bridge_server={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}
