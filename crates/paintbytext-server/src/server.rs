use actix_web::{App, HttpServer};
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;

use crate::config::TOKEN_ENV;
use crate::routes;
use crate::state::AppState;

pub async fn run_server(state: AppState) -> std::io::Result<()> {
    let bind = state.config.bind.clone();
    if state.config.api_token.is_none() {
        warn!("{TOKEN_ENV} is not set; prediction requests will be rejected");
    }
    info!(
        %bind,
        model = %state.config.model,
        api_base = %state.config.api_base,
        "starting prediction proxy"
    );

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .configure(routes::configure(state.clone()))
    })
    .bind(&bind)?
    .run()
    .await
}
