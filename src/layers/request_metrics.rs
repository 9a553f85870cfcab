use std::{
    sync::Arc,
    task::{Context, Poll},
    time::Instant,
};

use axum::{extract::MatchedPath, response::Response};
use futures_util::future::BoxFuture;
use http::{Request, StatusCode};
use tower::{Layer, Service};

use crate::metrics::{HttpReqLabel, Metrics};

/// Times every request and records it into [`Metrics`] once the response is produced
#[derive(Clone)]
pub struct RequestMetricsLayer {
    metrics: Arc<Metrics>,
}

impl RequestMetricsLayer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for RequestMetricsLayer {
    type Service = RequestMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestMetricsService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequestMetricsService<S> {
    inner: S,
    metrics: Arc<Metrics>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for RequestMetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let start = Instant::now();
        let method = request.method().clone();
        // unmatched requests (404) have no MatchedPath
        let route = match request.extensions().get::<MatchedPath>() {
            Some(matched) => matched.as_str().to_string(),
            None => request.uri().path().to_string(),
        };
        let future = self.inner.call(request);
        let metrics = self.metrics.clone();

        Box::pin(async move {
            let result = future.await;
            let status = match &result {
                Ok(response) => response.status(),
                Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            metrics.observe_request(&HttpReqLabel::new(&method, &route, status), elapsed_ms);
            log::info!("{method} {route} {} {elapsed_ms:.3}ms", status.as_u16());
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{convert::Infallible, time::Duration};

    use axum::{Router, body::Body, routing::get};
    use tower::{ServiceExt, service_fn};

    use super::*;
    use crate::metrics::exposition::{find, parse};

    fn router(metrics: Arc<Metrics>) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .route(
                "/sleep",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    "slept"
                }),
            )
            .route("/users/{id}", get(|| async { "user" }))
            .layer(RequestMetricsLayer::new(metrics))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn records_once_per_request() {
        let metrics = Arc::new(Metrics::new());
        let app = router(metrics.clone());
        for _ in 0..3 {
            app.clone().oneshot(get_request("/")).await.unwrap();
        }
        assert_eq!(metrics.request_total(), 3);

        let samples = parse(&metrics.encode().unwrap());
        assert_eq!(find(&samples, "http_req_res_time_seconds_count", Some("/")).unwrap().value, 3.0);
    }

    #[tokio::test]
    async fn elapsed_is_within_wall_clock() {
        let metrics = Arc::new(Metrics::new());
        let app = router(metrics.clone());

        let start = Instant::now();
        app.oneshot(get_request("/sleep")).await.unwrap();
        let wall_ms = start.elapsed().as_secs_f64() * 1000.0;

        let samples = parse(&metrics.encode().unwrap());
        let recorded = find(&samples, "http_req_res_time_seconds_sum", Some("/sleep")).unwrap().value;
        assert!(recorded >= 30.0, "recorded {recorded}ms");
        assert!(recorded <= wall_ms, "recorded {recorded}ms, wall clock {wall_ms}ms");
    }

    #[tokio::test]
    async fn labels_use_route_template_and_status() {
        let metrics = Arc::new(Metrics::new());
        let app = router(metrics.clone());
        app.clone().oneshot(get_request("/users/42")).await.unwrap();
        app.oneshot(get_request("/missing?x=1")).await.unwrap();
        assert_eq!(metrics.request_total(), 2);

        let samples = parse(&metrics.encode().unwrap());
        let user = find(&samples, "http_req_res_time_seconds_count", Some("/users/{id}")).unwrap();
        assert_eq!(user.labels["status_code"], "200");
        let missing = find(&samples, "http_req_res_time_seconds_count", Some("/missing")).unwrap();
        assert_eq!(missing.labels["status_code"], "404");
        assert_eq!(missing.labels["method"], "GET");
    }

    #[tokio::test]
    async fn inner_error_is_counted_and_propagated() {
        let metrics = Arc::new(Metrics::new());
        let failing = service_fn(|_req: Request<Body>| async { Err::<Response, _>(std::io::Error::other("boom")) });
        let service = RequestMetricsLayer::new(metrics.clone()).layer(failing);

        let result = service.oneshot(get_request("/broken")).await;
        assert!(result.is_err());
        assert_eq!(metrics.request_total(), 1);

        let samples = parse(&metrics.encode().unwrap());
        let broken = find(&samples, "http_req_res_time_seconds_count", Some("/broken")).unwrap();
        assert_eq!(broken.labels["status_code"], "500");
    }

    #[tokio::test]
    async fn passes_response_through() {
        let metrics = Arc::new(Metrics::new());
        let echo = service_fn(|_req: Request<Body>| async { Ok::<_, Infallible>(Response::new(Body::from("hello"))) });
        let service = RequestMetricsLayer::new(metrics).layer(echo);

        let response = service.oneshot(get_request("/")).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello");
    }
}
