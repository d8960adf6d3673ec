//! mailroute - mountpoint-aware SOAP request router
//!
//! Main entry point for the mailroute CLI.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use mailroute::config::{validate_config_result, RouterConfig};
use mailroute::context::RequestContext;
use mailroute::engine::Engine;
use mailroute::server::SoapServer;
use mailroute::soap::Element;
use std::process;

/// mailroute - routes SOAP requests to the server owning their data
#[derive(Parser, Debug)]
#[command(name = "mailroute")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/mailroute/config.yaml)
    #[arg(short, long, env = "MAILROUTE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the SOAP endpoint
    Serve {
        /// Listen address (overrides server.listen)
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate the configuration and print a summary
    CheckConfig,

    /// Show where a request about an item would be routed
    Resolve {
        /// Item id (e.g. 42 or acct-b:99)
        id: String,

        /// Account the request targets
        #[arg(short, long)]
        account: String,

        /// Authenticated account (defaults to --account)
        #[arg(long = "as")]
        as_account: Option<String>,

        /// Request name
        #[arg(short, long, default_value = "GetItemRequest")]
        request: String,

        /// Operation, for requests that only route some operations
        #[arg(long)]
        op: Option<String>,
    },
}

fn main() {
    if let Err(e) = mailroute::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn load_config(path: Option<&str>) -> anyhow::Result<RouterConfig> {
    let config = match path {
        Some(path) => RouterConfig::load(path),
        None => RouterConfig::load_default(),
    }
    .context("Failed to load configuration")?;
    validate_config_result(&config)?;
    Ok(config)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { listen } => {
            let addr = listen.unwrap_or_else(|| config.server.listen.clone());
            let server = SoapServer::from_config(&config)?;
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(server.run(&addr))?;
        }

        Commands::CheckConfig => {
            let table = config.route_table();
            println!("Configuration OK");
            println!("  server:   {} ({})", config.server.name, config.server.listen);
            println!("  servers:  {}", config.directory.servers.len());
            println!("  accounts: {}", config.directory.accounts.len());
            println!("  mailboxes hosted: {}", config.mailboxes.len());
            println!("  routes:   {}", table.len());
            for name in table.names() {
                println!("    {}", name);
            }
        }

        Commands::Resolve {
            id,
            account,
            as_account,
            request,
            op,
        } => {
            let engine = Engine::from_config(&config)?;
            let dispatcher = engine.dispatcher();
            let Some(route) = dispatcher.routes().get(&request) else {
                bail!("No route for {}", request);
            };
            let Some(path) = route.id_paths.first() else {
                bail!("Route for {} has no id path", request);
            };

            let element = request_for(&request, path.segments(), &id, op.as_deref());
            let authenticated = as_account.unwrap_or_else(|| account.clone());
            let ctx = RequestContext::delegated(authenticated, account);
            let decision = dispatcher.decide(&element, &ctx)?;
            println!("{}", decision);
        }
    }

    Ok(())
}

/// Minimal request carrying `id` at the route's id path
fn request_for(name: &str, segments: &[String], id: &str, op: Option<&str>) -> Element {
    let mut root = Element::new(name);
    let Some((attr, elements)) = segments.split_last() else {
        return root;
    };

    let mut leaf = match elements.last() {
        Some(last) => Element::new(last.as_str()),
        None => Element::new(name),
    };
    leaf.set_attribute(attr.as_str(), id);
    if let Some(op) = op {
        leaf.set_attribute("op", op);
    }

    match elements.split_last() {
        None => leaf,
        Some((_, parents)) => {
            let mut current = leaf;
            for parent in parents.iter().rev() {
                current = Element::new(parent.as_str()).with_child(current);
            }
            root.add_child(current);
            root
        }
    }
}
