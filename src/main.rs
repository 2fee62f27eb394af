use anyhow::Result;
use std::path::PathBuf;

use modelshelf::config::Config;
use modelshelf::{logging, server};

#[derive(Debug, Default)]
struct CliArgs {
    config_path: Option<PathBuf>,
    root: Option<PathBuf>,
    port: Option<u16>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("modelshelf {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                cli.config_path = Some(PathBuf::from(value_for(&args, i, "--config")));
                i += 1;
            }
            "--root" | "-r" => {
                cli.root = Some(PathBuf::from(value_for(&args, i, "--root")));
                i += 1;
            }
            "--port" | "-p" => {
                let raw = value_for(&args, i, "--port");
                match raw.parse() {
                    Ok(port) => cli.port = Some(port),
                    Err(_) => {
                        eprintln!("Error: invalid port: {}", raw);
                        std::process::exit(1);
                    }
                }
                i += 1;
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

fn value_for<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value.as_str(),
        None => {
            eprintln!("Error: {} requires an argument", flag);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"modelshelf - Browse model files, notes and previews in a web page

USAGE:
    modelshelf [OPTIONS]

OPTIONS:
    --config, -c PATH   Path to config file
    --root, -r PATH     Directory to browse (overrides config)
    --port, -p PORT     Port to listen on (default: 12321)
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    MODELSHELF_CONFIG   Path to config file (overrides default location)
    MODELSHELF_LOG      Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/modelshelf/config.toml

Video thumbnails need ffmpeg on PATH, or set thumbnails.ffmpeg."#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_args();

    let mut config = match cli.config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };
    if let Some(root) = cli.root {
        config.root = root;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    // journald on Linux, then the configured log dir, then stderr
    logging::init(config.logging.dir.clone())?;

    config.validate()?;
    server::serve(&config).await
}
