//! OpenAPI documentation, served via Scalar UI at `/docs`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "tilecast API",
        version = "0.1.0",
        description = "Scheduled SQL template refresh with live WebSocket delivery. Connect to /api/live for pushed results.",
    ),
    tags(
        (name = "Health", description = "Server liveness and live-subsystem counters"),
        (name = "Live", description = "Cached template results"),
        (name = "Templates", description = "Read-only view of stored templates"),
    ),
    paths(
        crate::api::health,
        crate::api::live_results,
        crate::api::live_result_by_id,
        crate::api::templates_list,
    ),
    components(schemas(
        crate::api::ErrorResponse,
        crate::api::HealthResponse,
        crate::api::TemplateSummary,
    ))
)]
pub struct ApiDoc;
