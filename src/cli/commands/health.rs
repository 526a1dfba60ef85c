//! Health command implementation.

use super::{block_on, Context};
use crate::error::Result;
use crate::resilience::CircuitState;
use crate::sync::HealthSnapshot;
use colored::Colorize;
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthOutput {
    #[serde(flatten)]
    snapshot: HealthSnapshot,
    graph_configured: bool,
    healthy: bool,
}

/// Show the state of this process's remote-call guards and retained
/// checkpoints.
///
/// # Errors
///
/// Returns an error if configuration or the database cannot be loaded.
pub fn execute(ctx: &Context) -> Result<()> {
    block_on(async {
        let services = ctx.services().await?;
        let snapshot = services.service.health();
        let output = HealthOutput {
            healthy: snapshot.is_healthy() && services.graph.is_configured(),
            graph_configured: services.graph.is_configured(),
            snapshot,
        };
        ctx.emit(&output, print_health)
    })
}

fn print_health(output: &HealthOutput) {
    let status = if output.healthy { "healthy".green() } else { "degraded".yellow() };
    println!("{} {status}", "Status:".bold());

    let graph = if output.graph_configured {
        "configured".green()
    } else {
        "not configured (set ZEP_API_KEY)".red()
    };
    println!("  Graph service:   {graph}");

    let limiter = &output.snapshot.rate_limiter;
    println!(
        "  Rate limiter:    {:.1}/{} tokens, {:.1}/min refill",
        limiter.current_tokens, limiter.capacity, limiter.refill_per_minute
    );

    let breaker = &output.snapshot.circuit_breaker;
    let state = match breaker.state {
        CircuitState::Closed => breaker.state.as_str().green(),
        CircuitState::HalfOpen => breaker.state.as_str().yellow(),
        CircuitState::Open => breaker.state.as_str().red(),
    };
    println!("  Circuit breaker: {state} ({} failures)", breaker.failure_count);
    println!("  Checkpoints:     {}", output.snapshot.retained_checkpoints);
}
