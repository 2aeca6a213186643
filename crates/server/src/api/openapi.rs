use utoipa::OpenApi;

use super::health;

#[derive(OpenApi)]
#[openapi(
    paths(health::health, health::metrics),
    tags((name = "Health", description = "Liveness and metrics"))
)]
pub struct ApiDoc;
