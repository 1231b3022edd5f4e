use std::path::PathBuf;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use layerpack_core::{
    analysis_outcome, layer_outcome, outcome_from_error, EnvSnapshot, ExecutionOutcome, Packager,
    PackagingConfig,
};

mod cli;
mod output;
mod style;

use cli::{CommandCli, InputArgs, LayerpackCli};
use output::{emit_output, OutputOptions};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = LayerpackCli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let outcome = match execute(&cli.command) {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            outcome_from_error(&err)
        }
    };
    let opts = OutputOptions {
        quiet: cli.quiet,
        json: cli.json,
        no_color: cli.no_color,
    };
    let code = emit_output(&opts, &outcome).map_err(|err| eyre!("{err:?}"))?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, 0) => "warn",
        (_, 0) => "info",
        (_, 1) => "debug",
        _ => "trace",
    };

    let filter = [
        "layerpack",
        "layerpack_cli",
        "layerpack_core",
        "layerpack_domain",
        "layerpack_resolver",
        "layerpack_store",
    ]
    .map(|target| format!("{target}={level}"))
    .join(",");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn execute(command: &CommandCli) -> anyhow::Result<ExecutionOutcome> {
    match command {
        CommandCli::CreateLayer(args) => {
            let config = load_config(args.target.config.as_deref(), args.overrides())?;
            let packager = Packager::new(config, args.output_dir.clone())?;
            let artifact = match &args.input {
                InputArgs {
                    requirements: Some(path),
                    ..
                } => packager.create_layer_from_requirements(path, &args.name)?,
                InputArgs { packages, .. } => packager.create_layer_from_packages(
                    packages.as_deref().unwrap_or_default(),
                    &args.name,
                )?,
            };
            Ok(layer_outcome(&artifact))
        }
        CommandCli::Analyze(args) => {
            let config = load_config(args.target.config.as_deref(), args.target.overrides())?;
            let packager = Packager::new(config, PathBuf::from("dist"))?;
            let report = match &args.input {
                InputArgs {
                    requirements: Some(path),
                    ..
                } => packager.analyze_requirements(path)?,
                InputArgs { packages, .. } => {
                    packager.analyze_packages(packages.as_deref().unwrap_or_default())?
                }
            };
            Ok(analysis_outcome(&report))
        }
    }
}

fn load_config(
    file: Option<&std::path::Path>,
    overrides: layerpack_core::ConfigOverrides,
) -> anyhow::Result<PackagingConfig> {
    let config = PackagingConfig::load(file, &EnvSnapshot::capture(), overrides)?;
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}
