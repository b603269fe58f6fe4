use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use simcloud::auth::{self, CredentialProvider, SecretStore, TokenSource};
use simcloud::cli::{Cli, Command, SimulationArgs};
use simcloud::orchestrator::ensure_succeeded;
use simcloud::ui::{self, JobProgress};
use simcloud::{
    ArtifactSpec, CancelHandle, JobOrchestrator, JsonModel, SimConfig, SimError, WaitOptions,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "simcloud=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_code(e: &anyhow::Error) -> u8 {
    e.downcast_ref::<SimError>().map_or(1, SimError::exit_code)
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => SimConfig::load_from(path),
        None => SimConfig::load(),
    }
    .map_err(|e| SimError::Config(format!("{e:#}")))?;

    // Commands that never talk to the backend.
    match &cli.command {
        Command::Logout => {
            SecretStore::new(&config.token_file)
                .clear()
                .await
                .with_context(|| format!("failed to remove {}", config.token_file.display()))?;
            println!("Logged out");
            return Ok(());
        }
        Command::CacheClear => {
            let orchestrator = JobOrchestrator::from_config(&config, offline_credentials())?;
            let removed = orchestrator.fetcher().clear().await?;
            println!("Removed {removed} cached artifact(s)");
            return Ok(());
        }
        _ => {}
    }

    let source =
        TokenSource::from_settings(&config.api_url, &config.api_key, config.token.as_deref())?;
    let provider = auth::init(
        CredentialProvider::new(source).with_store(SecretStore::new(&config.token_file)),
    );
    let orchestrator = match JobOrchestrator::from_config(&config, provider) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            auth::teardown();
            return Err(e.into());
        }
    };

    let (cancel, signal) = CancelHandle::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    let mut options = WaitOptions::default().with_cancel(signal);
    options.timeout = cli.timeout();

    let result = dispatch(&orchestrator, cli.command, options).await;
    auth::teardown();
    result
}

async fn dispatch(
    orchestrator: &JobOrchestrator,
    command: Command,
    options: WaitOptions,
) -> Result<()> {
    match command {
        Command::Submit { simulation, name } => {
            let model = load_model(&simulation)?;
            let handle = orchestrator.submit(&model, &name).await?;
            println!("{}", handle.job_id);
        }
        Command::Run {
            simulation,
            name,
            artifact,
        } => {
            let model = load_model(&simulation)?;
            let progress = JobProgress::start(&name);
            let artifact = ArtifactSpec::from(artifact);
            match orchestrator.run(&model, &name, &artifact, options).await {
                Ok((handle, file)) => {
                    progress.complete(&handle);
                    progress.downloaded(&file);
                }
                Err(e) => {
                    progress.failed(&e);
                    return Err(e.into());
                }
            }
        }
        Command::Monitor { job_id } => {
            let progress = JobProgress::start(&job_id);
            let mut monitor = orchestrator.monitor(&job_id, options);
            while let Some(event) = monitor.next().await {
                match event {
                    Ok(event) => progress.status_changed(&event),
                    Err(e) => {
                        progress.failed(&e);
                        return Err(e.into());
                    }
                }
            }
            if let Some(handle) = monitor.handle() {
                progress.complete(handle);
                ensure_succeeded(handle)?;
            }
        }
        Command::Download { job_id, artifact } => {
            let progress = JobProgress::start(&job_id);
            progress.message(format!("{job_id}: waiting for results"));
            match orchestrator
                .load(&job_id, &ArtifactSpec::from(artifact), options)
                .await
            {
                Ok(file) => progress.downloaded(&file),
                Err(e) => {
                    progress.failed(&e);
                    return Err(e.into());
                }
            }
        }
        Command::Info { job_id } => {
            ui::print_info(&orchestrator.get_info(&job_id).await?);
        }
        Command::Delete { job_id } => {
            orchestrator.delete(&job_id).await?;
            println!("Deleted {job_id}");
        }
        Command::Abort { job_id } => {
            orchestrator.abort(&job_id).await?;
            println!("Abort requested for {job_id}");
        }
        ref list @ Command::List { .. } => {
            let filter = list.list_filter().unwrap_or_default();
            let mut jobs = orchestrator.list(filter);
            while let Some(job) = jobs.next().await {
                println!("{}", ui::job_row(&job?));
            }
        }
        Command::Estimate { simulation } => {
            let model = load_model(&simulation)?;
            let cost = orchestrator.estimate_cost(&model).await?;
            println!("Estimated cost: {cost:.3} credits");
        }
        Command::Logout | Command::CacheClear => {}
    }
    Ok(())
}

fn load_model(args: &SimulationArgs) -> Result<JsonModel, SimError> {
    Ok(JsonModel::from_file(&args.simulation, args.task_type.into())?
        .with_attachments(args.attachments.clone()))
}

// Cache maintenance needs a store handle but never sends a request.
fn offline_credentials() -> std::sync::Arc<CredentialProvider> {
    std::sync::Arc::new(CredentialProvider::new(TokenSource::Static(String::new())))
}
