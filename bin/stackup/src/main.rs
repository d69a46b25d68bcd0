//! stackup composes a shared network stack and a load-balanced container service, and
//! provisions them in dependency order.

mod cli;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command};
use stackup_deploy::{
    AnyProvider, DeployReport, Deployer, DockerProvider, DockerProviderConfig, HttpProvider,
    HttpProviderConfig, ProviderKind, StackReport, SynthProvider,
};

/// Build the provider selected on the command line.
fn provider(cli: &Cli) -> Result<AnyProvider> {
    Ok(match cli.provider {
        ProviderKind::Http => {
            let endpoint = cli
                .endpoint
                .clone()
                .context("--endpoint is required with the http provider")?;
            let config = HttpProviderConfig::new(endpoint)
                .token(cli.token.clone())
                .poll_interval(Duration::from_secs(cli.poll_interval))
                .max_polls(cli.max_polls);
            AnyProvider::Http(HttpProvider::new(config)?)
        }
        ProviderKind::Docker => AnyProvider::Docker(DockerProvider::new(DockerProviderConfig {
            state_dir: cli.outdir.join("state"),
        })?),
        ProviderKind::Synth => AnyProvider::Synth(SynthProvider::new(&cli.outdir)),
    })
}

fn deployer(cli: &Cli, environment: &str) -> Deployer {
    Deployer::new(environment)
        .context(cli.context.clone())
        .context_first(cli.context_first)
        .environments(cli.environments.clone())
}

fn print_states(reports: &[StackReport]) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Stack", "State"]);
    for report in reports {
        table.add_row(vec![report.stack.clone(), report.state.to_string()]);
    }
    println!("{table}");
}

fn print_outputs(report: &DeployReport) {
    if report.outputs.is_empty() {
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Stack", "Output", "Value"]);
    for (stack, output, value) in report.outputs.iter() {
        table.add_row(vec![stack, output, value]);
    }
    println!("{table}");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Command::Deploy(args) => {
            let deployer = deployer(&cli, &args.env.environment);
            let report = deployer.deploy(provider(&cli)?, &args.stacks).await?;

            tracing::info!("✓ Deployment complete!");
            print_states(&report.stacks);
            print_outputs(&report);
        }
        Command::Destroy(args) => {
            let deployer = deployer(&cli, &args.env.environment);
            let reports = deployer.destroy(provider(&cli)?, &args.stacks).await?;

            tracing::info!("✓ Teardown complete!");
            print_states(&reports);
        }
        Command::Synth(args) => {
            let paths = deployer(&cli, &args.environment).synth(&cli.outdir).await?;
            for path in paths {
                println!("{}", path.display());
            }
        }
        Command::Validate(args) => {
            let validated = deployer(&cli, &args.environment).validate()?;

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["Key", "Value", "Source"]);
            for (key, value, origin) in validated.config.entries() {
                table.add_row(vec![key.to_string(), value.to_string(), origin.to_string()]);
            }
            println!("{table}");

            for stack in validated.composer.stacks() {
                let resources: Vec<&str> = stack.resources.iter().map(|r| r.name.as_str()).collect();
                println!("{}: {}", stack.name, resources.join(", "));
            }
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "stackup", &mut std::io::stdout());
        }
    }

    Ok(())
}
