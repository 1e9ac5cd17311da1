//! Analyzer → Planner → Coder pipeline
//!
//! Three agents coordinating only through the environment. Run with
//! `RUST_LOG=stigmergy=debug` to see every round.

use anyhow::Result;
use serde_json::json;
use stigmergy::{Agent, AgentSpec, Collective, RoundObserver, RunOptions};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Stigmergic Pipeline ===\n");

    let mut collective = Collective::new();
    collective
        .add(Agent::from_fn(
            AgentSpec::new("analyzer", ["goal"], "analysis"),
            |ctx| async move {
                let goal = ctx
                    .field("goal", "goal")
                    .and_then(|g| g.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok::<_, anyhow::Error>(json!({
                    "analysis": format!("Analyzed: {}", goal),
                    "requirements": ["auth", "storage", "rate limiting"],
                }))
            },
        ))?
        .add(Agent::from_fn(
            AgentSpec::new("planner", ["analysis"], "plan"),
            |ctx| async move {
                let requirements = ctx
                    .field("analysis", "requirements")
                    .and_then(|r| r.as_array())
                    .map(|r| r.len())
                    .unwrap_or(0);
                Ok::<_, anyhow::Error>(json!({
                    "plan": format!("{} milestones", requirements),
                }))
            },
        ))?
        .add(Agent::from_fn(
            AgentSpec::new("coder", ["analysis", "plan"], "code"),
            |ctx| async move {
                let plan = ctx.field("plan", "plan").cloned().unwrap_or_default();
                Ok::<_, anyhow::Error>(json!({ "code": format!("// implements {}", plan) }))
            },
        ))?;

    let observer = RoundObserver::new(|report| {
        println!(
            "Round {}: {:?} ({} committed, {} failed)",
            report.round, report.agents, report.committed, report.failed
        );
    });

    let result = collective
        .run_goal(
            "build_api",
            "Build a REST API",
            RunOptions::default().on_round(observer),
        )
        .await;

    println!("\nOutcome: {:?} after {} rounds", result.outcome, result.rounds);
    if let Some(code) = collective.result("build_api", "code").await {
        println!("Code: {}", code["code"]);
    }

    println!("\nTraces:");
    println!("{}", collective.environment().observe("build_api").await);

    // Invalidating the plan re-fires the planner, then the coder.
    collective.environment().invalidate("build_api", "plan").await;
    let rerun = collective
        .run("build_api", Default::default(), RunOptions::default())
        .await;
    println!("\nAfter invalidating plan: {:?} in {} rounds", rerun.outcome, rerun.rounds);

    println!("\n{}", serde_json::to_string_pretty(&rerun)?);

    Ok(())
}
