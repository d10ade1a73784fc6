//! Runtime weather settings.
//!
//! PATCH publishes a configuration-updated notification, which starts or
//! stops the refresh job depending on whether an API key is configured.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::AppState;
use crate::errors::{AppError, ErrorResponse};
use crate::services::settings::{Language, TemperatureUnit, UpdateWeatherSettings};

/// Current settings. The API key itself is never returned.
#[derive(Debug, Serialize, ToSchema)]
pub struct WeatherSettingsResponse {
    pub api_key_configured: bool,
    pub unit: TemperatureUnit,
    pub primary_location_id: Option<Uuid>,
    pub language: Language,
}

fn snapshot(state: &AppState) -> WeatherSettingsResponse {
    let weather = state.settings.weather();
    WeatherSettingsResponse {
        api_key_configured: weather.api_key.is_some(),
        unit: weather.unit,
        primary_location_id: weather.primary_location_id,
        language: state.settings.system().language,
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/settings/weather",
    tag = "Settings",
    responses(
        (status = 200, description = "Current weather settings", body = WeatherSettingsResponse),
    )
)]
pub async fn get_weather_settings(State(state): State<AppState>) -> Json<WeatherSettingsResponse> {
    Json(snapshot(&state))
}

/// Partially update the settings. `api_key: null` clears the key and
/// `primary_location_id: null` unsets the primary location.
#[utoipa::path(
    patch,
    path = "/api/v1/settings/weather",
    tag = "Settings",
    request_body = UpdateWeatherSettings,
    responses(
        (status = 200, description = "Updated weather settings", body = WeatherSettingsResponse),
        (status = 404, description = "Primary location not found", body = ErrorResponse),
    )
)]
pub async fn update_weather_settings(
    State(state): State<AppState>,
    Json(input): Json<UpdateWeatherSettings>,
) -> Result<Json<WeatherSettingsResponse>, AppError> {
    if let Some(Some(id)) = input.primary_location_id {
        state.locations.get(id).await?;
    }

    state.settings.update(input);
    tracing::info!("Weather settings updated");
    Ok(Json(snapshot(&state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::test_state;
    use crate::services::settings::ConfigEvent;
    use tokio_test::assert_err;

    #[tokio::test]
    async fn test_get_hides_api_key() {
        let t = test_state(Some("secret"));
        let Json(settings) = get_weather_settings(State(t.state)).await;
        assert!(settings.api_key_configured);

        let json = serde_json::to_value(&settings).unwrap();
        assert!(json.get("api_key").is_none());
        assert_eq!(json["unit"], "celsius");
        assert_eq!(json["language"], "english");
    }

    #[tokio::test]
    async fn test_patch_publishes_update() {
        let t = test_state(Some("secret"));
        let mut rx = t.state.settings.subscribe();

        let input: UpdateWeatherSettings = serde_json::from_value(serde_json::json!({
            "api_key": null,
            "unit": "fahrenheit",
            "language": "czech",
        }))
        .unwrap();
        let Json(settings) = update_weather_settings(State(t.state), Json(input))
            .await
            .unwrap();

        assert!(!settings.api_key_configured);
        assert_eq!(settings.unit, TemperatureUnit::Fahrenheit);
        assert_eq!(settings.language, Language::Czech);
        assert_eq!(rx.recv().await.unwrap(), ConfigEvent::Updated);
    }

    #[tokio::test]
    async fn test_patch_unknown_primary_location() {
        let t = test_state(None);
        let mut rx = t.state.settings.subscribe();

        let input: UpdateWeatherSettings = serde_json::from_value(serde_json::json!({
            "primary_location_id": Uuid::new_v4(),
        }))
        .unwrap();
        let err = assert_err!(update_weather_settings(State(t.state.clone()), Json(input)).await);

        assert!(matches!(err, AppError::NotFound(_)));
        assert!(t.state.settings.weather().primary_location_id.is_none());
        assert_err!(rx.try_recv());
    }
}
