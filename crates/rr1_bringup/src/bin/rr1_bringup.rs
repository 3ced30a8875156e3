//! rr1 bringup CLI
//!
//! Usage:
//!   rr1_bringup
//!   rr1_bringup --namespace rr1 -a use_sim_time:=false
//!   rr1_bringup --launch-file launch/spawn_rr1.launch.yaml --dry-run
//!   rr1_bringup --record plan.json

use rr1_bringup::{AmentIndex, Executor, ExecutorConfig, LaunchArgs, LaunchEvent};
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let args: LaunchArgs = argh::from_env();

    let env = env_logger::Env::default().default_filter_or(args.log_filter());
    env_logger::init_from_env(env);

    let robot = match args.robot_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load robot config: {}", e);
            std::process::exit(1);
        }
    };

    for option in args.ignored_robot_options() {
        log::warn!("{} has no effect with --launch-file", option);
    }

    log::info!("Loading launch description: {}", args.source());
    let description = match args.description(&robot) {
        Ok(description) => description,
        Err(e) => {
            log::error!("Failed to load launch description: {}", e);
            std::process::exit(1);
        }
    };

    if args.validate {
        if let Err(e) = description.validate() {
            log::error!("{}", e);
            std::process::exit(1);
        }
        println!("Launch description '{}' is valid", args.source());
        println!("  Version: {}", description.version);
        println!("  Args: {}", description.args.len());
        println!("  Processes: {}", description.processes.len());
        println!("  Roots: {}", description.roots().join(", "));
        if let Some(robot_description) = args.robot_description(&robot) {
            match robot_description.locate(&AmentIndex::from_env()) {
                Ok(path) => println!("  Robot description: {}", path.display()),
                Err(e) => log::warn!("{}", e),
            }
        }
        println!("  Exit handlers:");
        for (target, launched) in description.event_handler_bindings() {
            println!("    {} -> {}", target, launched);
        }
        return;
    }

    let mut executor =
        match Executor::new(description, ExecutorConfig::default(), args.arg_overrides()) {
            Ok(e) => e,
            Err(e) => {
                log::error!("Failed to create executor: {}", e);
                std::process::exit(1);
            }
        };

    if args.dry_run || args.record.is_some() {
        let plan = match executor.plan() {
            Ok(plan) => plan,
            Err(e) => {
                log::error!("Failed to generate launch plan: {}", e);
                std::process::exit(1);
            }
        };

        if let Some(path) = &args.record {
            let written = plan
                .to_json()
                .map_err(|e| e.to_string())
                .and_then(|json| std::fs::write(path, json).map_err(|e| e.to_string()));
            match written {
                Ok(()) => log::info!("Launch plan recorded to {}", path.display()),
                Err(e) => {
                    log::error!("Failed to record launch plan to {}: {}", path.display(), e);
                    std::process::exit(1);
                }
            }
        }
        if args.dry_run {
            println!("{}", plan);
        }
        return;
    }

    if let Some(robot_description) = args.robot_description(&robot) {
        if let Err(e) = robot_description.locate(&AmentIndex::from_env()) {
            log::error!("{}", e);
            std::process::exit(1);
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, initiating shutdown...");
        let _ = shutdown_tx.send(());
    }) {
        log::error!("Error setting Ctrl+C handler: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = executor.launch(shutdown_rx).await {
        log::error!("Launch failed: {}", e);
        executor.shutdown().await;
        std::process::exit(1);
    }

    executor.shutdown().await;

    for (name, status) in executor.status() {
        log::info!("  {}: {}", name, status);
    }
    for event in executor.history() {
        if let LaunchEvent::Failed { process, error } = event {
            log::warn!("{} failed to start: {}", process, error);
        }
    }

    log::info!("rr1 bringup exiting");
}
