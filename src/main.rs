use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

use gusto::{Config, Context, Mode, pipeline};

#[derive(Debug, Parser)]
#[command(about, version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "gusto.toml")]
    config: Utf8PathBuf,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Serve the site locally, rebuilding and reloading on change
    Serve,
    /// Build the deployable asset tree
    Build,
    /// Upload the built asset tree to object storage
    Publish,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let graph = pipeline::task_graph()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            banner("serve");
            let context = Context::new(config, Mode::Watch);
            pipeline::serve(&graph, &context)?;
        }
        Command::Build => {
            banner("build");
            let context = Context::new(config, Mode::Build);
            graph.run("build", &context)?;
        }
        Command::Publish => {
            banner("publish");
            let context = Context::new(config, Mode::Build);
            graph.run("publish", &context)?;
        }
    }

    Ok(())
}

fn banner(mode: &str) {
    eprintln!(
        "Running {} in {} mode.",
        style("gusto").red(),
        style(mode).blue()
    );
}
