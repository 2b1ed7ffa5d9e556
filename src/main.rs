use clap::{Parser, Subcommand};
use picture_press::pipeline::{self, RunContext};
use picture_press::process::{EventSink, RunStatus};
use picture_press::{config, output};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Shared flags for commands that process images.
#[derive(clap::Args, Clone)]
struct CacheArgs {
    /// Disable the derivative cache: regenerate every variant, store nothing
    #[arg(long)]
    no_cache: bool,
}

/// `1.2.0` on a tagged release, `dev@<revision>` otherwise.
fn version_label(release: bool, revision: &str) -> String {
    if release {
        env!("CARGO_PKG_VERSION").to_string()
    } else if revision.is_empty() {
        "dev@unknown".to_string()
    } else {
        format!("dev@{revision}")
    }
}

fn version_string() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();
    VERSION.get_or_init(|| {
        version_label(
            env!("PICTURE_PRESS_RELEASE") == "true",
            env!("PICTURE_PRESS_REVISION"),
        )
    })
}

#[derive(Parser)]
#[command(name = "picture-press")]
#[command(about = "Cached image derivatives for static sites")]
#[command(long_about = "\
Cached image derivatives for static sites

Scans a site directory for images and writes, next to each source:

  photo.jpg                        # resized in place if wider than max_width
  photo-thumb-300x300.jpg          # smart-cropped thumbnail per configured size
  photo.640.jpg / photo.640.webp   # responsive widths, source format + extras
  photo.frozen.jpg                 # tiny blurred placeholder

The catalog of every image and derivative is written to image-catalog.json at
the site root. Derivatives are cached by content hash, so unchanged images are
not re-encoded on the next build.

Run 'picture-press gen-config' to generate a documented picture-press.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Site root; web paths are relative to it
    #[arg(long, default_value = ".", global = true)]
    site: PathBuf,

    /// Directory to scan for images (defaults to the site root)
    #[arg(long, global = true)]
    input: Option<PathBuf>,

    /// Cache directory (defaults to <site>/.picture-press-cache)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Config file (defaults to <site>/picture-press.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Catalog the images under the input directory without generating anything
    Scan,
    /// Run every enabled generator and write the catalog
    Build(CacheArgs),
    /// Print a stock picture-press.toml with all options documented
    GenConfig,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Command::Scan => {
            let ctx = run_context(&cli)?;
            let (catalog, report) = pipeline::scan(&ctx)?;
            output::print_scan_output(&catalog, &report);
            if report.status == RunStatus::Error {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Build(cache_args) => {
            let mut ctx = run_context(&cli)?;
            ctx.use_cache = !cache_args.no_cache;

            let (tx, rx) = std::sync::mpsc::channel();
            ctx.events = EventSink::new(tx);
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_process_event(&event) {
                        println!("{}", line);
                    }
                }
            });
            let result = pipeline::build(&ctx);
            // Closes the channel so the printer drains and exits
            drop(ctx);
            if printer.join().is_err() {
                eprintln!("progress printer panicked");
            }
            let outcome = result?;

            let catalog_path = cli.site.join(pipeline::CATALOG_FILE);
            pipeline::write_catalog(&outcome.catalog, &catalog_path)?;
            println!();
            for line in output::format_run_report(&outcome.reports) {
                println!("{}", line);
            }
            println!("==> Catalog: {}", catalog_path.display());

            if outcome.status() == RunStatus::Error {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Log to stderr; stdout carries the build output.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

/// Load config and resolve every directory from the global flags.
fn run_context(cli: &Cli) -> Result<RunContext, config::ConfigError> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.site.join("picture-press.toml"));
    let config = config::load_config(&config_path)?;

    let mut ctx = RunContext::new(config, &cli.site);
    if let Some(input) = &cli.input {
        ctx.input_dir = resolve(&cli.site, input);
    }
    if let Some(cache_dir) = &cli.cache_dir {
        ctx.cache_root = cache_dir.clone();
    }
    Ok(ctx)
}

/// Relative input paths are taken from the site root.
fn resolve(site: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || path.starts_with(site) {
        path.to_path_buf()
    } else {
        site.join(path)
    }
}
