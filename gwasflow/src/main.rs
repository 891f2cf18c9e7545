//! The gwasflow binary: load configuration, build the stage graph, run.

use anyhow::Context;
use clap::Parser;
use gwasflow::checkpoint::FsCheckpointStore;
use gwasflow::cli::Cli;
use gwasflow::config::{self, Style};
use gwasflow::dispatch::{Dispatcher, DispatchStyle, LocalQueue};
use gwasflow::errors::ConfigurationError;
use gwasflow::flowchart;
use gwasflow::observability;
use gwasflow::project::{JobLog, RunContextBuilder};
use gwasflow::registry::StageRegistry;
use gwasflow::run::{self, RunController};
use gwasflow::staleness::StalenessResolver;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    cli.apply_overrides(&mut config);
    // Overrides can break invariants the file satisfied (e.g. --procs 0).
    config.validate()?;

    observability::init_tracing(config.pipeline.verbosity);
    println!(
        "{}",
        observability::banner(
            &config.working_files.project_name,
            &config.pipeline_name,
            config.working_files.project_author.as_deref(),
        )
    );

    let ctx = Arc::new(
        RunContextBuilder::new(
            &config.working_files.projects_dir,
            &config.working_files.project_name,
            &config.pipeline_name,
        )
        .log_dir(&config.pipeline.log_dir)
        .samples(
            config.pipeline.restrict_samples,
            config.pipeline.allowed_samples.clone(),
        )
        .build()
        .context("creating the project directory")?,
    );
    println!("project directory: {}", ctx.project_dir().display());

    let registry = Arc::new(StageRegistry::from_defs(config.stage_defs())?);
    let store = Arc::new(FsCheckpointStore::open(ctx.checkpoint_dir())?);
    let resolver = StalenessResolver::new(store.clone(), ctx.project_dir());
    let request = config.run_request();

    if config.pipeline.style == Style::Flowchart {
        let plan = run::plan(registry.as_ref(), &resolver, ctx.as_ref(), &request)?;
        println!("{}", flowchart::render(registry.as_ref(), &plan));
        return Ok(ExitCode::SUCCESS);
    }

    let dispatch_style = DispatchStyle::from_run_style(config.pipeline.style)
        .ok_or_else(|| ConfigurationError::InvalidOption {
            option: "style".to_string(),
            reason: "style is not dispatchable".to_string(),
        })?;
    let job_log = Arc::new(JobLog::open(
        ctx.log_dir().join(&config.pipeline.log_file),
    )?);
    let dispatcher = Arc::new(
        Dispatcher::new(
            dispatch_style,
            Arc::new(LocalQueue::new()),
            store,
            ctx.log_dir(),
            ctx.project_dir(),
        )
        .with_job_log(job_log)
        .with_poll_interval(Duration::from_secs(config.pipeline.poll_interval_secs)),
    );

    let controller = RunController::new(
        registry,
        resolver,
        dispatcher,
        ctx,
        config.pipeline.procs,
    );
    let report = controller.run(&request).await?;
    println!("{}", report.render());

    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
