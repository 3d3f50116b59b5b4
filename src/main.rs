use anyhow::{Context, Result};
use indicatif::ProgressBar;
use std::sync::{Arc, Mutex};
use tracing::{error, warn, Level};
use tracing_subscriber::FmtSubscriber;
use wercker::cli::commands::{RunArgs, ValidateCommand};
use wercker::cli::output::*;
use wercker::cli::{Cli, Command};
use wercker::core::config::{PipelineChoice, RunConfig};
use wercker::{
    DockerCli, DockerExecConnector, EngineSettings, EnvPolicy, ExecutionEngine, ExecutionEvent,
    LocalStore, Pipeline, ServiceEvent,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Build(cmd) => run_pipeline(&cmd.run, cmd.choice(), String::new()).await?,
        Command::Deploy(cmd) => run_pipeline(&cmd.run, cmd.choice(), cmd.target.clone()).await?,
        Command::Validate(cmd) => validate_config(cmd)?,
    }

    Ok(())
}

async fn run_pipeline(args: &RunArgs, choice: PipelineChoice, deploy_target: String) -> Result<()> {
    let config_path = args.config_path();
    let mut config = RunConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let policy = EnvPolicy::from_host();
    config.interpolate(&policy.host_environment());

    let mut options = args.to_options(&config, policy);
    options.deploy_target = deploy_target;

    let steps = config.to_steps(choice, &options)?;
    println!(
        "{} Loaded {} with {} steps in {}",
        INFO,
        style(choice.as_str()).bold(),
        style(steps.len()).cyan(),
        style(&config.box_image).bold()
    );

    let mut pipeline = match choice {
        PipelineChoice::Build => Pipeline::build(options, steps),
        PipelineChoice::Deploy => Pipeline::deploy(options, steps),
    };

    let settings = EngineSettings {
        box_image: config.box_image.clone(),
        services: config.services.clone(),
        fail_on_service_error: config.fail_on_service_error,
        keep_containers: args.keep_containers,
    };
    let runtime = Arc::new(DockerCli::new(&args.docker));
    let connector = Arc::new(DockerExecConnector::new(
        &args.docker,
        config.command_timeout_secs,
    ));

    let mut engine = ExecutionEngine::new(runtime, connector, settings);
    if !args.no_store {
        engine = engine.with_store(LocalStore::new(args.store_dir()));
    }

    // Ctrl-C cancels the run; cleanup still happens
    let cancel = engine.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            cancel.cancel();
        }
    });

    // Set up event handler for console output
    let spinner: Arc<Mutex<Option<ProgressBar>>> = Arc::new(Mutex::new(None));
    engine.add_event_handler(move |event| {
        let Ok(mut current) = spinner.lock() else {
            return;
        };

        if let ExecutionEvent::StepStarted {
            name, index, total, ..
        } = &event
        {
            let message = format!("{}/{} {}", index + 1, total, style(name).cyan());
            *current = Some(create_step_spinner(message));
            return;
        }

        if matches!(
            event,
            ExecutionEvent::StepCompleted { .. } | ExecutionEvent::StepFailed { .. }
        ) {
            if let Some(bar) = current.take() {
                bar.finish_and_clear();
            }
        }

        if let Some(line) = format_execution_event(&event) {
            match current.as_ref() {
                Some(bar) => bar.suspend(|| println!("{}", line)),
                None => println!("{}", line),
            }
        }

        if let ExecutionEvent::Service(ServiceEvent::Failed { logs, .. }) = &event {
            match current.as_ref() {
                Some(bar) => bar.suspend(|| print_service_logs(logs)),
                None => print_service_logs(logs),
            }
        }
    });

    // Execute pipeline
    println!();
    let result = engine.execute(&mut pipeline).await;

    for step in pipeline.steps() {
        println!("  {} {}", format_step_state(&step.state), step.name);
    }

    match result {
        Ok(outcome) => {
            println!(
                "\n{} {} completed {} ({}:{})",
                CHECK,
                style(pipeline.kind()).bold(),
                style("successfully").green(),
                style(&outcome.image.repository).dim(),
                style(&outcome.image.tag).dim()
            );
            if !outcome.service_failures.is_empty() {
                println!(
                    "{} {} service(s) did not finish cleanly",
                    WARN,
                    outcome.service_failures.len()
                );
            }
            Ok(())
        }
        Err(e) => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(pipeline.kind()).bold(),
                format_status(pipeline.state.status)
            );
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn validate_config(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating {}...", INFO, cmd.file);

    match RunConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Configuration is valid!", CHECK);
            println!("  Box: {}", style(&config.box_image).bold());
            println!("  Services: {}", style(config.services.len()).cyan());
            for choice in [PipelineChoice::Build, PipelineChoice::Deploy] {
                if let Some(section) = config.section(choice) {
                    println!(
                        "  {} steps: {}",
                        choice.as_str(),
                        style(section.steps.len()).cyan()
                    );
                }
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}
