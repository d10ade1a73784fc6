use axum::extract::State;
use axum::Json;

use super::AppState;
use crate::services::provider::ProviderMetadata;

/// Registered weather providers, sorted by type.
#[utoipa::path(
    get,
    path = "/api/v1/providers",
    tag = "Providers",
    responses(
        (status = 200, description = "Registered providers", body = Vec<ProviderMetadata>),
    )
)]
pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderMetadata>> {
    Json(state.providers.list())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::test_state;

    #[tokio::test]
    async fn test_list_providers() {
        let t = test_state(None);
        let Json(providers) = list_providers(State(t.state)).await;
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].provider_type, "provider-a");
        assert_eq!(providers[0].name, "Fake provider-a");
    }
}
