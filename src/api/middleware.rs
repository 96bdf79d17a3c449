use actix_web::{
    Error,
    body::MessageBody,
    dev::{ServiceRequest, ServiceResponse},
    middleware::Next,
};
use tracing::debug;

/**
 * Middleware timing every request. The trace id from the `X-Trace-ID`
 * header is carried into the log line so timings can be correlated with
 * the per-endpoint spans.
 */
pub async fn timing_middleware(request: ServiceRequest, next: Next<impl MessageBody>) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let start_time = std::time::Instant::now();
    let path = request.path().to_owned();
    let method = request.method().to_owned();
    let trace_id = request.headers().get("X-Trace-ID").and_then(|value| value.to_str().ok()).unwrap_or("-").to_owned();
    let response = next.call(request).await;
    let response_code = match &response {
        Ok(service_response) => service_response.status().as_u16(),
        Err(_) => 500, // If there's an error, we assume a server error
    };
    let duration = start_time.elapsed();
    debug!(target: "timing", trace_id = %trace_id, "Request for {} {} with status {} processed in {:?}ms", method, path, response_code, duration.as_millis());
    response
}

#[cfg(test)]
mod test {
    use actix_web::{App, HttpResponse, middleware::from_fn, test, web};

    use super::*;

    #[actix_web::test]
    async fn test_timing_middleware_passes_response_through() {
        let app = test::init_service(App::new().wrap(from_fn(timing_middleware)).route("/ping", web::get().to(|| async { HttpResponse::Ok().finish() }))).await;
        let request = test::TestRequest::get().uri("/ping").insert_header(("X-Trace-ID", "test")).to_request();
        let response = test::call_service(&app, request).await;
        assert!(response.status().is_success());
    }

    #[actix_web::test]
    async fn test_timing_middleware_without_trace_header() {
        let app = test::init_service(App::new().wrap(from_fn(timing_middleware)).route("/ping", web::get().to(|| async { HttpResponse::Ok().finish() }))).await;
        let response = test::call_service(&app, test::TestRequest::get().uri("/ping").to_request()).await;
        assert!(response.status().is_success());
    }
}
