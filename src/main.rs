use anyhow::{bail, Context};
use expert_panel::agents::{Reply, RoundEvent};
use expert_panel::config::Config;
use expert_panel::knowledge::DirectoryLoader;
use expert_panel::logging;
use expert_panel::metrics::METRICS;
use expert_panel::panel::ExpertPanel;
use futures::StreamExt;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load(None).context("Failed to load configuration")?;
    logging::init(&config.logging);

    let thesis = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if thesis.trim().is_empty() {
        bail!("Usage: expert-panel <thesis>");
    }

    let loader = DirectoryLoader::new(config.knowledge.clone());
    let panel = ExpertPanel::from_config(config, &loader).context("Failed to build panel")?;
    info!(
        "Asking {} experts using {}",
        panel.agents().len(),
        panel.active_model()
    );

    let mut events = panel.ask(&thesis).await;
    while let Some(event) = events.next().await {
        match event {
            RoundEvent::Answer(turn) => {
                let marker = match &turn.reply {
                    Reply::Answer(_) => "",
                    Reply::Fallback { .. } => " (unavailable)",
                };
                println!(
                    "=== {}{} [{:.1}s]\n{}\n",
                    turn.agent,
                    marker,
                    turn.elapsed.as_secs_f64(),
                    turn.reply.text()
                );
            }
            RoundEvent::InterimSummary(summary) => {
                info!("Interim summary over {} experts", summary.covering.len());
            }
            RoundEvent::Summary(summary) => {
                println!(
                    "=== {} ({})\n{}",
                    panel.config().model.summary_name,
                    summary.covering.join(", "),
                    summary.text
                );
            }
        }
    }

    if let Some(quota) = panel.quota() {
        info!(
            "{} requests left this minute for {}",
            quota.remaining_requests, quota.model_id
        );
    }
    debug!("Metrics:\n{}", METRICS.export_prometheus());

    Ok(())
}
