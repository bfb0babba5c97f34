//! `opscrew`: list the crew, print the RBAC policy, or submit a task.

mod config;

use clap::{Parser, Subcommand};
use config::OpsCrewConfig;
use opscrew_core::{ResponseClass, TaskRequest};
use opscrew_orchestrator::{
    default_agents, default_registry, AgentMonitor, Dispatcher, DryRunBackend, ExecutionContext,
    WorkflowExecutor,
};
use opscrew_security::{AuditLog, RbacPolicy, SecurityGate};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "opscrew", about = "OpsCrew: multi-agent DevOps task orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "opscrew.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered agents with their capabilities and permissions
    Agents,
    /// Print the effective RBAC policy
    Policy,
    /// Submit a task and print the response
    Submit {
        /// incident, optimization, analysis or custom
        #[arg(short = 't', long = "type")]
        task_type: String,
        /// low, medium, high or critical
        #[arg(short, long)]
        priority: Option<String>,
        /// What needs to be done
        #[arg(required = true, num_args = 1..)]
        description: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = OpsCrewConfig::load(&cli.config).await?;
    let policy = RbacPolicy::install(config.rbac)?;

    match cli.command {
        Commands::Agents => {
            let agents = default_agents(policy);
            println!("Registered agents:");
            for agent in &agents {
                println!("  {} ({})", agent.id, agent.role);
                println!("    Goal: {}", agent.goal);
                let caps: Vec<&str> = agent.capabilities.iter().map(String::as_str).collect();
                println!("    Capabilities: {}", caps.join(", "));
                let perms: Vec<&str> = agent.permissions.iter().collect();
                if perms.is_empty() {
                    println!("    Permissions: none");
                } else {
                    println!("    Permissions: {}", perms.join(", "));
                }
            }
            println!("\nTotal: {} agent(s)", agents.len());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Policy => {
            println!("{}", serde_json::to_string_pretty(policy)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Submit {
            task_type,
            priority,
            description,
        } => {
            let audit = config
                .security
                .audit
                .then(|| Arc::new(AuditLog::new(config.data_dir.join("audit"))));
            let mut gate = SecurityGate::new(&config.security.gate)?;
            if let Some(audit) = &audit {
                gate = gate.with_audit(Arc::clone(audit));
            }

            let monitor = Arc::new(AgentMonitor::new());
            let ctx = ExecutionContext::new(
                &config.orchestrator,
                Arc::new(default_registry(policy)?),
                Arc::new(gate),
                Arc::new(DryRunBackend::new()),
            )
            .with_metrics(monitor.clone());
            let dispatcher = Dispatcher::new(WorkflowExecutor::new(ctx));

            let mut request = TaskRequest::new(task_type, description.join(" "));
            if let Some(priority) = priority {
                request = request.with_priority(priority);
            }
            let response = dispatcher.submit(request).await;
            info!(metrics = %monitor.to_json(), "Submission metrics");
            println!("{}", serde_json::to_string_pretty(&response)?);

            // The gate holds the other handle to the audit log.
            drop(dispatcher);
            if let Some(audit) = audit.and_then(Arc::into_inner) {
                audit.close().await;
            }

            Ok(match response.class {
                ResponseClass::Success => ExitCode::SUCCESS,
                ResponseClass::ClientError => ExitCode::from(2),
                ResponseClass::ServerError => ExitCode::from(1),
            })
        }
    }
}
