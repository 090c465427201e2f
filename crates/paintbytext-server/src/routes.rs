use actix_web::error::PayloadError;
use actix_web::http::Method;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::TOKEN_ENV;
use crate::error::ProxyError;
use crate::provider::{build_model_input, is_valid_prediction_id, strip_nulls};
use crate::state::AppState;

/// Register state, body limits and the prediction routes.
pub fn configure(state: AppState) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        let body_limit = state.config.body_limit;
        cfg.app_data(web::Data::new(state))
            .app_data(web::PayloadConfig::new(body_limit))
            .service(web::resource("/api/predictions").route(web::route().to(create_prediction)))
            .service(
                web::resource("/api/predictions/{id}")
                    .route(web::get().to(get_prediction))
                    .default_service(web::to(method_not_allowed)),
            );
    }
}

fn require_token(state: &AppState) -> Result<&str, ProxyError> {
    state.config.api_token.as_deref().ok_or_else(|| {
        error!("{TOKEN_ENV} is not set");
        ProxyError::MissingCredential(TOKEN_ENV)
    })
}

fn body_error(err: actix_web::Error, limit: usize) -> ProxyError {
    match err.as_error::<PayloadError>() {
        Some(PayloadError::Overflow) => ProxyError::PayloadTooLarge { limit },
        _ => ProxyError::Validation(format!("failed to read request body: {err}")),
    }
}

/// `POST /api/predictions`
///
/// The credential is checked before anything else so a misconfigured server
/// never reaches the provider.
async fn create_prediction(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: Result<web::Bytes, actix_web::Error>,
) -> Result<HttpResponse, ProxyError> {
    let token = require_token(&state)?;
    if *req.method() != Method::POST {
        return Err(ProxyError::MethodNotAllowed);
    }
    let body = body.map_err(|err| body_error(err, state.config.body_limit))?;
    let parsed: Value = serde_json::from_slice(&body)
        .map_err(|err| ProxyError::Validation(format!("invalid JSON body: {err}")))?;
    let Value::Object(fields) = parsed else {
        return Err(ProxyError::Validation(
            "request body must be a JSON object".to_string(),
        ));
    };

    let cleaned = strip_nulls(fields);
    let input = build_model_input(&cleaned);
    let prompt = input.get("prompt").and_then(|value| value.as_str()).unwrap_or_default();
    debug!(
        %prompt,
        has_image = input.contains_key("image"),
        "forwarding prediction request"
    );

    let prediction = state
        .provider
        .create_prediction(token, &state.config.model, input)
        .await
        .map_err(|err| {
            error!("prediction create failed: {err}");
            err
        })?;
    let (id, status) = (json_str(&prediction, "id"), json_str(&prediction, "status"));
    info!(%id, %status, "prediction created");
    Ok(HttpResponse::Created().json(prediction))
}

/// `GET /api/predictions/{id}`
async fn get_prediction(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ProxyError> {
    let token = require_token(&state)?;
    let id = path.into_inner();
    if !is_valid_prediction_id(&id) {
        return Err(ProxyError::Validation(format!("invalid prediction id: {id}")));
    }
    let prediction = state
        .provider
        .get_prediction(token, &id)
        .await
        .map_err(|err| {
            error!(%id, "prediction fetch failed: {err}");
            err
        })?;
    let status = json_str(&prediction, "status");
    debug!(%id, %status, "prediction fetched");
    Ok(HttpResponse::Ok().json(prediction))
}

fn json_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

async fn method_not_allowed() -> Result<HttpResponse, ProxyError> {
    Err(ProxyError::MethodNotAllowed)
}
