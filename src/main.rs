use anyhow::Result;
use caskr::commands::{self, ConfigOverrides, target_platform};
use clap::Parser;
use std::path::PathBuf;

/// caskr - cask manifest resolver and verifier
///
/// Resolve a cask manifest to the artifact for this platform, download it,
/// verify its checksum and stage it into an application directory.
///
/// Examples:
///   caskr resolve swaggerific          # Show the variant for this machine
///   caskr install swaggerific          # Fetch, verify and stage it
#[derive(Parser, Debug)]
#[command(author, version = env!("CASKR_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Root directory for casks, cache and receipts (also via CASKR_ROOT)
    #[arg(
        long = "root",
        short = 'r',
        env = "CASKR_ROOT",
        value_name = "PATH",
        global = true
    )]
    pub root: Option<PathBuf>,

    /// Directory of cask manifests (defaults to <root>/Casks)
    #[arg(long = "casks-dir", env = "CASKR_CASKS_DIR", value_name = "PATH", global = true)]
    pub casks_dir: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// List available casks
    List,

    /// Show a cask's metadata and variants
    Info(NameArgs),

    /// Show the variant selected for a platform
    Resolve(TargetArgs),

    /// Download and verify a cask's artifact into the cache
    Fetch(TargetArgs),

    /// Download, verify and stage a cask into the application directory
    Install(InstallArgs),

    /// Validate one cask manifest, or all of them
    Check(CheckArgs),
}

#[derive(clap::Args, Debug)]
pub struct NameArgs {
    /// Cask name
    pub name: String,
}

#[derive(clap::Args, Debug)]
pub struct PlatformArgs {
    /// Target OS instead of the host's (e.g. darwin, linux)
    #[arg(long, requires = "arch")]
    pub os: Option<String>,

    /// Target architecture instead of the host's (e.g. arm64, x86_64)
    #[arg(long, requires = "os")]
    pub arch: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct TargetArgs {
    /// Cask name
    pub name: String,

    #[command(flatten)]
    pub platform: PlatformArgs,
}

#[derive(clap::Args, Debug)]
pub struct InstallArgs {
    /// Cask name
    pub name: String,

    #[command(flatten)]
    pub platform: PlatformArgs,

    /// Record that the app should not be quarantined
    #[arg(long = "no-quarantine")]
    pub no_quarantine: bool,

    /// Application directory (defaults to /Applications on macOS)
    #[arg(long, value_name = "PATH")]
    pub appdir: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct CheckArgs {
    /// Cask name; all casks when omitted
    pub name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = caskr::runtime::RealRuntime;
    let overrides = ConfigOverrides {
        root: cli.root,
        casks_dir: cli.casks_dir,
        appdir: None,
    };

    match cli.command {
        Commands::List => commands::list(runtime, overrides)?,
        Commands::Info(args) => commands::info(runtime, &args.name, overrides)?,
        Commands::Resolve(args) => {
            let platform = args.platform.resolve()?;
            commands::resolve(runtime, &args.name, &platform, overrides)?
        }
        Commands::Fetch(args) => {
            let platform = args.platform.resolve()?;
            commands::fetch(runtime, &args.name, &platform, overrides).await?
        }
        Commands::Install(args) => {
            let platform = args.platform.resolve()?;
            let overrides = ConfigOverrides {
                appdir: args.appdir,
                ..overrides
            };
            commands::install(
                runtime,
                &args.name,
                &platform,
                !args.no_quarantine,
                overrides,
            )
            .await?
        }
        Commands::Check(args) => commands::check(runtime, args.name.as_deref(), overrides)?,
    }
    Ok(())
}

impl PlatformArgs {
    fn resolve(&self) -> Result<caskr::manifest::Platform> {
        target_platform(self.os.as_deref(), self.arch.as_deref())
    }
}
