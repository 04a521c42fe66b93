//! Composition root: builds the dependency graph in layer order and mounts
//! every controller on a [`NetworkModule`].

use std::sync::Arc;

use anyhow::Context as _;
use docintake_core::ModelStreamProvider;
use tracing::info;

use crate::llm::ModelClient;
use crate::network::{NetworkConfig, NetworkModule};
use crate::service::{ConfigError, Controller, DependencyGraph, ServerConfig};
use crate::telemetry::TelemetryContext;
use crate::usecase::{extract_controller, stream_controller, ExtractLegalAdvice};

/// Builds the graph: telemetry, then model clients, then persistence (none
/// yet), then use cases. Each layer may only depend on earlier ones.
///
/// # Errors
///
/// Fails if a dependency is provided twice or a later layer cannot find what
/// it needs. Startup should abort.
pub fn build_dependency_graph(
    server: &ServerConfig,
    provider: Arc<dyn ModelStreamProvider>,
) -> anyhow::Result<DependencyGraph> {
    let mut builder = DependencyGraph::builder();

    builder.layer("telemetry").provide(TelemetryContext {
        service_name: server.service_name.clone(),
    })?;

    builder
        .layer("model")
        .provide(ModelClient::new(provider, server.stream.clone()))?;

    builder.layer("persistence");

    let model = builder
        .get::<ModelClient>()
        .context("model client must be provided before use cases")?;
    builder
        .layer("usecases")
        .provide(ExtractLegalAdvice::new(model))?;

    let graph = builder.build();
    info!(layers = ?graph.layers(), provided = ?graph.provided(), "dependency graph built");
    Ok(graph)
}

/// Every controller the server exposes.
///
/// # Errors
///
/// Returns the first misconfigured controller.
pub fn controllers() -> Result<Vec<Controller>, ConfigError> {
    Ok(vec![extract_controller()?, stream_controller()?])
}

/// A network module with every controller mounted, ready to `start()`.
///
/// # Errors
///
/// Fails if a controller does not mount.
pub fn build_module(
    network: NetworkConfig,
    server: ServerConfig,
    graph: Arc<DependencyGraph>,
) -> anyhow::Result<NetworkModule> {
    let mut module = NetworkModule::new(network, server, graph);
    for controller in controllers()? {
        let name = controller.name().to_string();
        module
            .mount(controller)
            .with_context(|| format!("unable to mount controller {name}"))?;
    }
    Ok(module)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::testing::ScriptedProvider;

    fn graph() -> DependencyGraph {
        build_dependency_graph(
            &ServerConfig::default(),
            Arc::new(ScriptedProvider::tokens(&["Ley ", "1755"])),
        )
        .unwrap()
    }

    #[test]
    fn layers_are_built_in_order() {
        let graph = graph();
        assert_eq!(
            graph.layers(),
            &["telemetry", "model", "persistence", "usecases"]
        );
        assert_eq!(
            graph.resolve::<TelemetryContext>().unwrap().service_name,
            "docintake"
        );
        assert!(graph.contains::<ModelClient>());
        assert!(graph.contains::<ExtractLegalAdvice>());
    }

    #[test]
    fn resolve_returns_the_same_instance() {
        let graph = graph();
        let first = graph.resolve::<ExtractLegalAdvice>().unwrap();
        let second = graph.resolve::<ExtractLegalAdvice>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn controllers_have_distinct_urls() {
        let controllers = controllers().unwrap();
        assert_eq!(controllers.len(), 2);
        assert_ne!(controllers[0].url(), controllers[1].url());
    }

    #[tokio::test]
    async fn module_serves_the_extraction_route_and_schemas() {
        let module = build_module(
            NetworkConfig::default(),
            ServerConfig::default(),
            Arc::new(graph()),
        )
        .unwrap();
        let router = module.build_router();

        let response = router
            .clone()
            .oneshot(
                Request::post("/api/v1/legal-advice")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"files":{},"context":"petition rights"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value =
            serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(body["data"]["advice"]["regulatedByLaw"], "Ley 1755");

        let response = router
            .oneshot(Request::get("/schemas").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let schemas: Value =
            serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
        let ids: Vec<&str> = schemas
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|schema| schema["id"].as_str())
            .collect();
        assert_eq!(
            ids,
            vec![
                "extract_legal_advice_POST_request",
                "extract_legal_advice_POST_response"
            ]
        );
    }
}
