//! Command-line client for the autonomous deployment orchestrator.
//!
//! Each invocation wires a fresh in-process `Orchestrator` against the
//! in-memory stores and a dry-run deployment backend, so state does not
//! persist across separate CLI invocations — `demo` and `deploy --auto-approve`
//! exercise a full submit-through-terminal-state run within one process.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use depctl_core::backend::DryRunBackend;
use depctl_core::retrieval::InMemoryRetriever;
use depctl_core::stores::{InMemoryMemoryStore, InMemoryPlanStore};
use depctl_core::synthesis::DeterministicSynthesizer;
use depctl_core::{audit::BufferedAuditSink, Orchestrator};
use depctl_kernel::model::{ApprovalDecision, Constraints, DeploymentPlan, Environment, PlanStatus};
use depctl_kernel::OrchestratorConfig;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "depctl", about = "Autonomous deployment orchestrator CLI")]
struct Cli {
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a deployment intent and drive it to a terminal or
    /// awaiting-approval state.
    Deploy {
        intent: String,
        #[arg(long, default_value = "staging")]
        env: String,
        #[arg(long)]
        budget: Option<f64>,
        /// Auto-approve if the plan lands in `awaiting_approval`.
        #[arg(long)]
        auto_approve: bool,
    },
    /// Walk through a staging happy-path and a prod approval-required
    /// scenario in one process, printing each stage.
    Demo,
}

fn parse_env(raw: &str) -> anyhow::Result<Environment> {
    match raw.to_lowercase().as_str() {
        "dev" => Ok(Environment::Dev),
        "staging" => Ok(Environment::Staging),
        "prod" => Ok(Environment::Prod),
        other => anyhow::bail!("unknown environment '{other}', expected dev|staging|prod"),
    }
}

fn build_orchestrator() -> Orchestrator {
    let config = OrchestratorConfig::default();
    let plan_store = Arc::new(InMemoryPlanStore::new());
    let memory = Arc::new(InMemoryMemoryStore::new(config.memory_ttl_days));
    let audit = Arc::new(BufferedAuditSink::in_memory(256, config.audit_retry));
    let retriever = Arc::new(InMemoryRetriever::default_corpus());
    let synthesizer = Arc::new(DeterministicSynthesizer::new());
    let backend = Arc::new(DryRunBackend);

    Orchestrator::new(plan_store, memory, audit, retriever, synthesizer, backend, config)
}

fn print_plan(plan: &DeploymentPlan) {
    let mut table = Table::new();
    table.set_header(vec!["field", "value"]);
    table.add_row(vec![Cell::new("plan_id"), Cell::new(plan.plan_id)]);
    table.add_row(vec![Cell::new("status"), Cell::new(format!("{:?}", plan.status))]);
    table.add_row(vec![Cell::new("env"), Cell::new(plan.env.as_str())]);
    table.add_row(vec![Cell::new("intent"), Cell::new(&plan.intent)]);
    if let Some(artifact) = &plan.artifact {
        table.add_row(vec![Cell::new("model_name"), Cell::new(&artifact.model_name)]);
        table.add_row(vec![Cell::new("endpoint_name"), Cell::new(&artifact.endpoint_name)]);
        table.add_row(vec![Cell::new("instance_type"), Cell::new(&artifact.instance_type)]);
        table.add_row(vec![Cell::new("budget_usd_per_hour"), Cell::new(artifact.budget_usd_per_hour)]);
    }
    if !plan.validation_errors.is_empty() {
        table.add_row(vec![Cell::new("validation_errors"), Cell::new(plan.validation_errors.join("; "))]);
    }
    if let Some(execution_plan) = &plan.execution_plan {
        let completed = execution_plan.steps.iter().filter(|s| matches!(s.status, depctl_kernel::model::StepStatus::Completed)).count();
        table.add_row(vec![
            Cell::new("steps"),
            Cell::new(format!("{completed}/{}", execution_plan.steps.len())),
        ]);
    }
    println!("{table}");
}

async fn deploy(orchestrator: &Orchestrator, intent: String, env: Environment, budget: Option<f64>, auto_approve: bool) -> anyhow::Result<Uuid> {
    let constraints = Constraints { budget_usd_per_hour: budget };
    let plan_id = orchestrator.submit("cli-user", intent, env, constraints).await?;
    let plan = orchestrator.get_plan(plan_id).await?.ok_or_else(|| anyhow::anyhow!("plan vanished after submit"))?;
    print_plan(&plan);

    if auto_approve && plan.status == PlanStatus::AwaitingApproval {
        orchestrator.approve(plan_id, "cli-operator", ApprovalDecision::Approved, Some("auto-approved via CLI".into())).await?;
        let plan = orchestrator.get_plan(plan_id).await?.ok_or_else(|| anyhow::anyhow!("plan vanished after approve"))?;
        println!("\nafter approval:");
        print_plan(&plan);
    }

    Ok(plan_id)
}

async fn run_demo(orchestrator: &Orchestrator) -> anyhow::Result<()> {
    println!("=== staging happy path ===");
    deploy(
        orchestrator,
        "deploy llama-3.1 8b for chatbot-x env=staging".to_string(),
        Environment::Staging,
        None,
        true,
    )
    .await?;

    println!("\n=== prod deployment requiring approval ===");
    deploy(
        orchestrator,
        "deploy llama-3.1 8b for chatbot-x env=prod".to_string(),
        Environment::Prod,
        Some(60.0),
        true,
    )
    .await?;

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("debug").init();
    } else {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let orchestrator = build_orchestrator();

        match cli.command {
            Command::Deploy { intent, env, budget, auto_approve } => {
                let env = parse_env(&env)?;
                deploy(&orchestrator, intent, env, budget, auto_approve).await?;
            }
            Command::Demo => {
                run_demo(&orchestrator).await?;
            }
        }

        Ok(())
    })
}
