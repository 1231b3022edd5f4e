use std::path::PathBuf;

use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand};
use layerpack_core::ConfigOverrides;
use layerpack_domain::{Architecture, LambdaRuntime};

pub const LAYERPACK_BEFORE_HELP: &str = concat!(
    "layerpack ",
    env!("CARGO_PKG_VERSION"),
    " – AWS Lambda layers from Python requirements\n\n",
    "  create-layer     Resolve, fetch and zip dependencies into <name>.zip.\n",
    "  analyze          Show what a layer would contain without building it.\n",
);

#[derive(Parser, Debug)]
#[command(
    name = "layerpack",
    author,
    version,
    disable_help_subcommand = true,
    before_help = LAYERPACK_BEFORE_HELP
)]
pub struct LayerpackCli {
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        global = true,
        help = "Increase logging (-vv reaches trace)"
    )]
    pub verbose: u8,
    #[arg(
        short,
        long,
        global = true,
        help = "Suppress human output (errors still print to stderr)"
    )]
    pub quiet: bool,
    #[arg(long, global = true, help = "Emit {status,message,details} JSON envelopes")]
    pub json: bool,
    #[arg(long, global = true, help = "Disable colored human output")]
    pub no_color: bool,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    #[command(
        about = "Build a Lambda layer archive.",
        override_usage = "layerpack create-layer (-r FILE | -p PKG[,PKG...]) -n NAME [OPTIONS]"
    )]
    CreateLayer(CreateLayerArgs),
    #[command(
        about = "Resolve and size a layer without downloading or writing it.",
        override_usage = "layerpack analyze (-r FILE | -p PKG[,PKG...]) [OPTIONS]"
    )]
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug, Clone)]
#[command(group(
    ArgGroup::new("input")
        .required(true)
        .args(["requirements", "packages"])
))]
pub struct InputArgs {
    #[arg(short = 'r', long, value_name = "FILE", help = "pip-style requirements file")]
    pub requirements: Option<PathBuf>,
    #[arg(
        short = 'p',
        long,
        value_name = "PKGS",
        value_delimiter = ',',
        help = "Comma-separated requirement specifiers"
    )]
    pub packages: Option<Vec<String>>,
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    #[arg(long, value_name = "RUNTIME", help = "Lambda runtime, e.g. python3.11")]
    pub runtime: Option<LambdaRuntime>,
    #[arg(long, value_name = "ARCH", help = "x86_64 or arm64")]
    pub architecture: Option<Architecture>,
    #[arg(
        long,
        value_name = "PKGS",
        value_delimiter = ',',
        help = "Packages to leave out of the layer"
    )]
    pub exclude_packages: Option<Vec<String>>,
    #[arg(long, help = "Include transitive dependencies (default)")]
    pub include_dependencies: bool,
    #[arg(
        long,
        conflicts_with = "include_dependencies",
        help = "Only pack the requested packages"
    )]
    pub no_dependencies: bool,
    #[arg(long, value_name = "URL", help = "Package index base URL")]
    pub index_url: Option<String>,
    #[arg(long, value_name = "FILE", help = "TOML configuration file")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct CreateLayerArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[arg(short = 'n', long, help = "Layer name; the archive is <name>.zip")]
    pub name: String,
    #[command(flatten)]
    pub target: TargetArgs,
    #[arg(long, value_name = "DIR", default_value = "dist")]
    pub output_dir: PathBuf,
    #[arg(
        long,
        value_name = "PATH",
        value_delimiter = ',',
        help = "Extra files or directories copied under python/"
    )]
    pub include_source: Option<Vec<PathBuf>>,
    #[arg(
        long,
        value_name = "LEVEL",
        help = "0 keeps everything, 1 drops bytecode, 2 also drops stubs and C sources"
    )]
    pub optimization_level: Option<u8>,
    #[arg(long, value_name = "MB", help = "Unzipped size limit")]
    pub max_size_mb: Option<u64>,
    #[arg(
        long,
        value_name = "RUNTIMES",
        value_delimiter = ',',
        help = "Runtimes the layer should declare"
    )]
    pub compatible_runtimes: Option<Vec<LambdaRuntime>>,
    #[arg(long, help = "Remove test directories and files (default)")]
    pub strip_test_files: bool,
    #[arg(long, conflicts_with = "strip_test_files")]
    pub keep_test_files: bool,
    #[arg(long, help = "Fail instead of building wheels from sdists")]
    pub no_build_sdists: bool,
    #[arg(long, value_name = "SECS", help = "Overall time budget")]
    pub timeout: Option<u64>,
    #[arg(long, help = "Keep the staging directory for inspection")]
    pub keep_staging: bool,
    #[arg(long, value_name = "N", help = "Parallel downloads (1-16)")]
    pub workers: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub target: TargetArgs,
}

/// Present only when one of a `--x`/`--no-x` pair was given.
fn toggle(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

impl TargetArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            runtime: self.runtime,
            architecture: self.architecture,
            exclude_packages: self.exclude_packages.clone(),
            include_dependencies: toggle(self.include_dependencies, self.no_dependencies),
            index_url: self.index_url.clone(),
            ..ConfigOverrides::default()
        }
    }
}

impl CreateLayerArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            include_source: self.include_source.clone(),
            optimization_level: self.optimization_level,
            max_size_mb: self.max_size_mb,
            compatible_runtimes: self.compatible_runtimes.clone(),
            strip_test_files: toggle(self.strip_test_files, self.keep_test_files),
            build_sdists: self.no_build_sdists.then_some(false),
            timeout_secs: self.timeout,
            keep_staging: self.keep_staging.then_some(true),
            download_workers: self.workers,
            ..self.target.overrides()
        }
    }
}
