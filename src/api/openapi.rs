//! OpenAPI documentation and schema generation
//!
//! This module defines the OpenAPI specification for the doc-export REST API
//! using utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the doc-export REST API
///
/// This struct is used to generate the OpenAPI 3.1 specification that
/// describes all available endpoints, request/response types, and API
/// behavior. The spec is served at `/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "doc-export REST API",
        version = "0.1.0",
        description = "REST API for creating document export tasks, watching their progress, and downloading the finished artifacts",
        contact(
            name = "doc-export",
            url = "https://github.com/doc-export/doc-export"
        ),
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:8790", description = "Local development server")
    ),
    paths(
        // Export task management
        crate::api::routes::create_export,
        crate::api::routes::list_exports,
        crate::api::routes::get_export,
        crate::api::routes::cancel_export,
        crate::api::routes::retry_export,
        crate::api::routes::download_export,
        crate::api::ws::progress_socket,

        // System
        crate::api::routes::health_check,
        crate::api::routes::get_stats,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::TaskId,
        crate::types::TaskStatus,
        crate::types::ExportFormat,
        crate::types::ExportOptions,
        crate::types::ContentSection,
        crate::types::ContentSpec,
        crate::types::ExportRequest,
        crate::types::TaskInfo,
        crate::types::ProgressEvent,
        crate::types::PipelineStats,

        // API request/response types from routes
        crate::api::routes::ListExportsQuery,
        crate::api::routes::CreateExportResponse,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "exports", description = "Export task management - Create, monitor, cancel, retry, and download exports"),
        (name = "system", description = "System endpoints - Health check, pipeline statistics, OpenAPI spec"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Security addon to add API key authentication scheme to OpenAPI spec
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = &mut openapi.components {
            components.add_security_scheme(
                "api_key",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Header(
                        utoipa::openapi::security::ApiKeyValue::new("X-Api-Key"),
                    ),
                ),
            );
        }
    }
}
