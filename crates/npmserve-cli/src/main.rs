#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use npmserve_core::{Config, ServeConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "npmserve")]
#[command(author, version, about = "Serve npm packages to the browser as ES modules", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (logs as JSON lines, command output as JSON)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Start the module server
    Serve {
        /// Path to a JSON config file
        #[arg(long, short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,

        /// Project root (defaults to the working directory)
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,

        /// Directory the catch-all route serves from (defaults to the root)
        #[arg(long, value_name = "DIR")]
        dev_server_root: Option<PathBuf>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long, short = 'p')]
        port: Option<u16>,

        /// Base URL of the graph/transform service
        #[arg(long, value_name = "URL", env = "NPMSERVE_GRAPH_SERVER")]
        graph_server: Option<String>,

        /// Root of the package store
        #[arg(long, value_name = "DIR", env = "NPMSERVE_PACKAGE_CACHE")]
        package_cache: Option<PathBuf>,

        /// Only serve packages already in the package store
        #[arg(long)]
        offline: bool,

        /// Fail package compiles that take longer than this many seconds
        #[arg(long, value_name = "SECS")]
        compile_timeout: Option<u64>,
    },

    /// Print the export map of a package directory
    Exports {
        /// Directory containing package.json
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Compile one package and list its output files
    Compile {
        /// `<name>@<version>`, e.g. `react@18.2.0` or `@scope/pkg@1.0.0`
        specifier: String,

        /// Root of the package store
        #[arg(long, value_name = "DIR", env = "NPMSERVE_PACKAGE_CACHE")]
        package_cache: Option<PathBuf>,

        /// Only use packages already in the package store
        #[arg(long)]
        offline: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine working directory
    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd)
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);
    let cwd = &config.cwd;

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(),
        Some(Commands::Serve {
            config: config_file,
            root,
            dev_server_root,
            host,
            port,
            graph_server,
            package_cache,
            offline,
            compile_timeout,
        }) => {
            let mut serve = match config_file {
                Some(path) => ServeConfig::load(&cwd.join(path)).into_diagnostic()?,
                None => ServeConfig::new(cwd.clone()),
            };
            if let Some(root) = root {
                serve.root_dir = cwd.join(root);
            }
            if let Some(dir) = dev_server_root {
                serve.dev_server_root = Some(cwd.join(dir));
            }
            if let Some(host) = host {
                serve.host = host;
            }
            if let Some(port) = port {
                serve.port = port;
            }
            if let Some(url) = graph_server {
                serve.graph_server = url;
            }
            if let Some(dir) = package_cache {
                serve.package_cache = Some(cwd.join(dir));
            }
            serve.offline |= offline;
            if compile_timeout.is_some() {
                serve.compile_timeout_secs = compile_timeout;
            }

            let span = tracing::info_span!("serve", cmd = "serve", cwd = %cwd.display());
            let _guard = span.enter();
            let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
            rt.block_on(commands::serve::run(serve))
        }
        Some(Commands::Exports { dir }) => commands::exports::run(&cwd.join(dir), cli.json),
        Some(Commands::Compile {
            specifier,
            package_cache,
            offline,
        }) => {
            let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
            rt.block_on(commands::compile::run(
                &specifier,
                package_cache.map(|dir| cwd.join(dir)),
                offline,
                cli.json,
            ))
        }
    }
}
