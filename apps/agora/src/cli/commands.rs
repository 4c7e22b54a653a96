//! # CLI Command Implementations

use crate::api::{AppState, run_server};
use crate::config;
use agora_core::processor::QuerySpec;
use agora_core::{AgoraError, InProcessBackend, Tuple, TupleSet};
use std::path::Path;

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP query agent.
pub async fn cmd_server(config_path: Option<&Path>, host: &str, port: u16) -> Result<(), AgoraError> {
    let (settings, remoting) = config::load(config_path)?;
    tracing::info!(
        services = remoting.services.len(),
        tenant = %settings.agent.source_tenant,
        "Configuration loaded"
    );
    let state = AppState::from_config(&settings, remoting, InProcessBackend::new())?;
    let addr = format!("{host}:{port}");
    run_server(&addr, state).await
}

// =============================================================================
// VALIDATE COMMAND
// =============================================================================

/// Validate the configuration document and report its shape.
pub fn cmd_validate(config_path: Option<&Path>) -> Result<(), AgoraError> {
    let (settings, remoting) = config::load(config_path)?;
    println!("configuration OK");
    println!("  tenant:   {}", settings.agent.source_tenant);
    println!("  services: {}", remoting.services.len());
    for (class, service) in &remoting.services {
        println!(
            "    {class} -> {} (batch {}{})",
            service.target,
            service.batch_size,
            if service.callback_property.is_some() {
                ", async"
            } else {
                ""
            }
        );
    }
    Ok(())
}

// =============================================================================
// QUERY COMMAND
// =============================================================================

/// Execute one query locally and print the SPARQL-JSON result.
pub async fn cmd_query(
    config_path: Option<&Path>,
    query: Option<String>,
    asset: Option<String>,
    bind: &[String],
) -> Result<(), AgoraError> {
    let (settings, remoting) = config::load(config_path)?;
    let state = AppState::from_config(&settings, remoting, InProcessBackend::new())?;

    let mut bindings = TupleSet::new();
    for pair in bind {
        let Some((name, value)) = pair.split_once('=') else {
            return Err(AgoraError::MalformedBinding(format!(
                "binding '{pair}' is not of the form name=value"
            )));
        };
        bindings.add(Tuple::new().bind(name, value));
    }

    let (skill, graph) = match asset {
        Some(asset) if state.processor.skills().is_skill(&asset) => (Some(asset), None),
        other => (None, other),
    };
    let outcome = state
        .processor
        .execute(QuerySpec {
            query,
            skill,
            graph,
            bindings,
            ..QuerySpec::default()
        })
        .await?;

    if !outcome.warnings.is_empty() {
        eprintln!(
            "warning: result may be partial ({} federation warnings)",
            outcome.warnings.len()
        );
    }
    let rendered = serde_json::to_string_pretty(&outcome.result.to_sparql_json())
        .map_err(|e| AgoraError::EngineFailure(e.to_string()))?;
    println!("{rendered}");
    Ok(())
}
