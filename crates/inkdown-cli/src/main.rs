#![forbid(unsafe_code)]

use std::{fs, path::PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "inkdown", about = "Render markdown from the CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile markdown to sanitized HTML and print to stdout.
    Render {
        /// Path to a markdown file. Use `-` to read from stdin.
        path: PathBuf,
    },
    /// Render markdown to a simple plain-text preview and print to stdout.
    Preview {
        /// Path to a markdown file. Use `-` to read from stdin.
        path: PathBuf,
    },
}

fn read_source(path: &PathBuf) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        use std::io::Read as _;

        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read markdown from stdin")?;
        Ok(buf)
    } else {
        fs::read_to_string(path)
            .with_context(|| format!("failed to read markdown from {}", path.display()))
    }
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Render { path } => {
            let source = read_source(&path)?;
            let compiled = inkdown_html::compile(&source);
            print!("{}", compiled.html);
        }
        Command::Preview { path } => {
            let source = read_source(&path)?;
            let rendered = inkdown_core::markdown::plain_text(&source);
            print!("{rendered}");
        }
    }

    Ok(())
}
