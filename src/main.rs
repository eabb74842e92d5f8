use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use swim::config::{self, SiteConfig};
use swim::content_type::OwnerRef;
use swim::output::{self, TypeListing};
use swim::reservation::reservations;
use swim::resource_type::{all_types, build_snapshot};
use swim::router::all_mappings;
use swim::site::Site;
use swim::templates::mapped_templates;
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("SWIM_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("SWIM_GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "swim")]
#[command(about = "Content management core: typed slots, negotiated templates, lazy image variants")]
#[command(long_about = "\
Content management core: typed slots, negotiated templates, lazy image variants

Every request path resolves to a resource. The resource's type decides which
template renders it, which middleware prepares the context and which
processors touch the response. Content lives in typed slots on the resource.

Typical session:

  swim gen-config > swim.toml   # documented defaults
  swim init                     # seed types, schemas and templates
  swim routes                   # what the router knows
  swim serve                    # start the HTTP server

RUST_LOG overrides the configured log level (e.g. RUST_LOG=swim=debug).")]
#[command(version = version_string())]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "swim.toml", global = true)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seed the database and serve requests
    Serve,
    /// Run the seed steps without serving
    Init,
    /// List request routes and reserved paths
    Routes,
    /// List resource and arrangement types
    Types,
    /// Print a stock swim.toml with all options documented
    GenConfig,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let site_config = config::load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    init_tracing(&site_config, cli.verbose);
    let site = Site::open(site_config).context("opening site")?;

    match cli.command {
        Command::Serve => {
            site.initialize()?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(swim::server::serve(Arc::new(site)))?;
        }
        Command::Init => {
            let report = site.initialize()?;
            for line in output::format_seed_report(&report) {
                println!("{}", line);
            }
        }
        Command::Routes => {
            let mappings = site.store.read(all_mappings)?;
            let reserved = site.store.read(reservations)?;
            output::print_routes(&mappings, &reserved, |owner| owner_label(&site, owner));
        }
        Command::Types => {
            output::print_types(&type_listings(&site)?);
        }
        Command::GenConfig => unreachable!("handled before the site is opened"),
    }

    Ok(())
}

/// `RUST_LOG` wins over `--verbose`, which wins over the configured level.
fn init_tracing(config: &SiteConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.log.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("swim={level},tower_http=info")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn owner_label(site: &Site, owner: OwnerRef) -> String {
    let class = site
        .classes
        .title_for(owner.type_id)
        .or_else(|| {
            site.store
                .read(|c| swim::content_type::title_of(c, owner.type_id))
                .ok()
        })
        .unwrap_or_else(|| format!("type {}", owner.type_id));
    format!("{} #{}", class, owner.id)
}

fn type_listings(site: &Site) -> anyhow::Result<Vec<TypeListing>> {
    let listings = site.store.read(|conn| {
        let types = all_types(conn)?;
        types
            .iter()
            .map(|ty| {
                let parent = ty
                    .parent_id
                    .and_then(|id| types.iter().find(|t| t.id == id))
                    .map(|t| t.key.clone());
                let mut members: Vec<_> = build_snapshot(conn, ty.schema_id)?.into_values().collect();
                members.sort_by_key(|m| m.order);
                Ok(TypeListing {
                    ty: ty.clone(),
                    parent,
                    members,
                    templates: mapped_templates(conn, ty.id)?,
                })
            })
            .collect()
    })?;
    Ok(listings)
}
