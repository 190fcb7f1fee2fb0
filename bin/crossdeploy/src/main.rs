//! crossdeploy runs dependency-ordered smart contract deployments across several EVM chains.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Command, RunArgs};
use crossdeploy_core::{
    ArtifactStore, DependencyGraph, DeploymentPlan, DeploymentSummary, Executor, PriorRun,
    RpcClientFactory, StateStore, default_state_path, report,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Credentials and RPC keys usually live in a local .env file.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let plan = DeploymentPlan::load_from_file(&args.plan)?;
    let graph = DependencyGraph::build(&plan)?;

    if args.dry_run {
        for (i, node) in graph.nodes().iter().enumerate() {
            let deps: Vec<&str> = graph
                .dependencies(i)
                .iter()
                .map(|&d| graph.nodes()[d].id.as_str())
                .collect();
            println!(
                "{:>3}. {} ({} on {}) after [{}]",
                i + 1,
                node.id,
                node.contract,
                node.chain,
                deps.join(", ")
            );
        }
        return Ok(());
    }

    let artifacts = ArtifactStore::load_dir(&args.artifacts)?;
    let state_path = args
        .state
        .unwrap_or_else(|| default_state_path(&args.plan));
    let store = StateStore::open(&state_path)?;

    tracing::info!(
        plan = %args.plan.display(),
        state = %state_path.display(),
        artifacts = artifacts.len(),
        redeploy = args.redeploy,
        "Running deployment plan..."
    );

    let mut executor = Executor::new(RpcClientFactory, artifacts).with_state_store(store);
    if args.redeploy {
        executor = executor.with_prior_run(PriorRun::default());
    }

    let run = executor.execute(&plan, &graph).await?;

    println!("{}", report::render(&run));

    if let Some(path) = &args.summary {
        DeploymentSummary::from_run(&run)
            .write_to_file(path)
            .context("Failed to write deployment summary")?;
    }

    if let Some(error) = run.failure {
        return Err(error).context("Deployment run failed");
    }

    Ok(())
}
