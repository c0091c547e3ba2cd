mod common;

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use http::header::{HeaderName, HeaderValue};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tsu_apm::{App, Context, Error, Options, Router, Server, endpoint};

use common::instrumented;

async fn get_user(ctx: Context) -> Result<(), Error> {
    let id = ctx.param("id").unwrap_or_default();
    ctx.json(format!(r#"{{"id":"{id}"}}"#).into_bytes());
    Ok(())
}

async fn conflict(_ctx: Context) -> Result<(), Error> {
    Err(Error::status(StatusCode::CONFLICT, "already exists"))
}

async fn echo(ctx: Context) -> Result<(), Error> {
    if let Some(id) = ctx.header("x-request-id") {
        let value = HeaderValue::from_str(id).map_err(Error::handler)?;
        ctx.set_header(HeaderName::from_static("x-request-id"), value);
    }
    ctx.text(String::from_utf8_lossy(ctx.body()).into_owned());
    Ok(())
}

async fn roundtrip(addr: &str, request: &str) -> String {
    let mut stream = None;
    for _ in 0..50 {
        match TcpStream::connect(addr).await {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let mut stream = stream.expect("server did not start listening");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn serves_names_requests_and_shuts_down_gracefully() {
    const ADDR: &str = "127.0.0.1:47291";

    let (hooks, recorder, apm) = instrumented(Options::default().middleware_trace(true));
    let router = Router::with_hooks(Arc::clone(&hooks))
        .get("/users/:id", endpoint(get_user))
        .post("/users", endpoint(conflict))
        .post("/echo", endpoint(echo));
    let app = App::with_hooks(Arc::clone(&hooks))
        .middleware(apm)
        .shared(router.routes());
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(
        Server::bind(ADDR)
            .with_graceful_shutdown(async move {
                let _ = stopped.await;
            })
            .serve(app),
    );

    let ok = roundtrip(ADDR, "GET /users/42 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
    assert!(ok.starts_with("HTTP/1.1 200"), "{ok}");
    assert!(ok.ends_with(r#"{"id":"42"}"#), "{ok}");

    let failed = roundtrip(
        ADDR,
        "POST /users HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}",
    )
    .await;
    assert!(failed.starts_with("HTTP/1.1 409"), "{failed}");

    let echoed = roundtrip(
        ADDR,
        "POST /echo HTTP/1.1\r\nHost: localhost\r\nX-Request-Id: r-7\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
    )
    .await;
    assert!(echoed.starts_with("HTTP/1.1 200"), "{echoed}");
    assert!(echoed.contains("x-request-id: r-7"), "{echoed}");
    assert!(echoed.ends_with("hello"), "{echoed}");

    let missing = roundtrip(ADDR, "GET /nope HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
    assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();

    assert_eq!(recorder.names(), ["Koajs/users/:id#GET", "Koajs/echo#POST"]);
    assert!(recorder.events().contains(&"open Middleware get_user".to_owned()));
}
