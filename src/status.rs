//! HTTP introspection server.
//!
//! Provides `/healthz` and `/readyz` for process supervisors and `/routes`,
//! a JSON snapshot of the route table (route → endpoint addresses).

use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::registry::RouteRegistry;

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Answers one status request.
///
/// Returns 200 "ok" for `/healthz` and `/readyz`, the route snapshot for
/// `/routes`, 405 for non-GET methods and 404 for all other paths.
pub fn status_response(
    registry: &RouteRegistry,
    method: &Method,
    path: &str,
) -> Response<Full<Bytes>> {
    if method != Method::GET {
        return respond(StatusCode::METHOD_NOT_ALLOWED, "text/plain", "method not allowed");
    }

    match path {
        "/healthz" | "/readyz" => respond(StatusCode::OK, "text/plain", "ok"),
        "/routes" => match serde_json::to_vec(&registry.snapshot()) {
            Ok(body) => respond(StatusCode::OK, "application/json", body),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize route table");
                respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "internal error")
            }
        },
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
    }
}

/// Serves status requests on an already bound listener.
///
/// Runs indefinitely, accepting connections and handling requests.
pub async fn serve(listener: TcpListener, registry: Arc<RouteRegistry>) -> std::io::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let registry = Arc::clone(&registry);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = status_response(&registry, req.method(), req.uri().path());
                async move { Ok::<_, Infallible>(response) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "status connection error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::net::SocketAddr;

    use async_trait::async_trait;
    use http_body_util::BodyExt;

    use crate::config::RegistryConfig;
    use crate::mbus::LivenessProbe;
    use crate::route::Endpoint;

    struct AlwaysUp;

    #[async_trait]
    impl LivenessProbe for AlwaysUp {
        async fn ping(&self) -> bool {
            true
        }
    }

    fn make_registry() -> Arc<RouteRegistry> {
        let registry = Arc::new(RouteRegistry::new(
            &RegistryConfig::default(),
            Arc::new(AlwaysUp),
        ));
        registry.register(
            "foo.example.com",
            Arc::new(Endpoint::new("app", "10.0.0.1", 8080, "", BTreeMap::new())),
        );
        registry
    }

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_healthz_and_readyz_return_ok() {
        let registry = make_registry();
        for path in ["/healthz", "/readyz"] {
            let response = status_response(&registry, &Method::GET, path);
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_string(response).await, "ok");
        }
    }

    #[tokio::test]
    async fn test_routes_returns_snapshot() {
        let registry = make_registry();

        let response = status_response(&registry, &Method::GET, "/routes");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(
            body_string(response).await,
            r#"{"foo.example.com":["10.0.0.1:8080"]}"#
        );
    }

    #[test]
    fn test_unknown_path_and_method() {
        let registry = make_registry();
        assert_eq!(
            status_response(&registry, &Method::GET, "/foo").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_response(&registry, &Method::POST, "/routes").status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    /// Exercises the server end to end over a real socket.
    #[tokio::test]
    async fn test_server_serves_routes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(serve(listener, make_registry()));

        let (status, body) = http_get(addr, "/routes").await;
        assert_eq!(status, 200);
        assert_eq!(body, r#"{"foo.example.com":["10.0.0.1:8080"]}"#);

        let (status, _) = http_get(addr, "/missing").await;
        assert_eq!(status, 404);

        handle.abort();
    }

    /// Simple HTTP GET using tokio's TcpStream.
    async fn http_get(addr: SocketAddr, path: &str) -> (u16, String) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            path, addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        // Parse status code from "HTTP/1.1 200 OK"
        let status_line = response.lines().next().unwrap();
        let status_code: u16 = status_line
            .split_whitespace()
            .nth(1)
            .unwrap()
            .parse()
            .unwrap();

        let body = response
            .split("\r\n\r\n")
            .nth(1)
            .unwrap_or("")
            .to_string();

        (status_code, body)
    }
}
