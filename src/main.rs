//! ptypane - run a command inside an in-memory terminal view
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 App (shim)                  │
//! ├─────────────────────────────────────────────┤
//! │  pty master  →  View (grid + interpreter)   │
//! │       ↑              ↓                      │
//! │  buffer editor   draw projection            │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The hosted command runs against the pty replica; its output is decoded
//! into the view's cell grid. On exit the final screen contents are printed.

mod app;
mod config;
mod pty;
mod state;
mod view;

use anyhow::{Context, Result};

use app::App;
use config::{AppConfig, UserConfig};

const NAME: &str = "ptypane";

fn print_help() {
    println!(
        r#"{} {} - run a command inside an in-memory terminal view

USAGE:
    {} [OPTIONS] <command> [args...]

OPTIONS:
    -h, --help       Print this help message
    -v, --version    Print version information
    --config         Print the current default config
    --debug          Enable debug logging

EXAMPLES:
    {} bash                Host an interactive shell
    {} python3 -i          Host a REPL
    {} --debug vim         Host an editor with debug logging

CONFIG FILE:
    ~/.config/{}/config.toml
"#,
        NAME,
        env!("CARGO_PKG_VERSION"),
        NAME,
        NAME,
        NAME,
        NAME,
        NAME,
    );
}

/// Debug runs log everything to a file under the config dir, keeping the
/// hosted program's screen clean; otherwise warnings go to stderr
fn init_logging(config: &AppConfig) -> Result<()> {
    let default_filter = if config.debug { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    if config.debug {
        let path = config.config_dir.join("development.log");
        let file = std::fs::File::create(&path)
            .with_context(|| format!("failed to create log file: {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn main() -> Result<()> {
    let mut debug = false;
    let mut command: Option<String> = None;
    let mut command_args: Vec<String> = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            "-v" | "--version" => {
                println!("{} {}", NAME, env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--config" => {
                print!("{}", UserConfig::default_toml());
                return Ok(());
            }
            "--debug" => debug = true,
            _ => {
                // First positional is the command; the rest belongs to it
                command = Some(arg);
                command_args.extend(args.by_ref());
            }
        }
    }

    let Some(command) = command else {
        eprintln!("must supply a command as an argument; see {} --help", NAME);
        std::process::exit(1);
    };

    let config = AppConfig::new(NAME, env!("CARGO_PKG_VERSION"), debug)?;
    init_logging(&config)?;

    let app = App::new(config, &command, &command_args)?;
    app.run()?;

    // Rendering is the host terminal's job while the child runs; replay the
    // final screen once it is gone
    println!("{}", app.main_view().buffer());

    Ok(())
}
