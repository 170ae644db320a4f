use anyhow::Result;
use bytes::Bytes;
use rkcheck_client::{DType, InferInput, InferenceClient, Shape};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn http_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Accepts `count` connections, drains each request, replies with `response`.
async fn serve_requests(listener: TcpListener, response: String, count: usize) {
    for _ in 0..count {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let response = response.clone();
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut tmp = [0u8; 4096];
            let header_end = loop {
                let n = stream.read(&mut tmp).await.expect("read headers");
                if n == 0 {
                    return;
                }
                buf.extend_from_slice(&tmp[..n]);
                if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
            let content_length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < header_end + content_length {
                let n = stream.read(&mut tmp).await.expect("read body");
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&tmp[..n]);
            }

            stream.write_all(response.as_bytes()).await.expect("write response");
            stream.shutdown().await.ok();
        });
    }
}

fn small_input() -> InferInput {
    let shape = Shape::from_slice(&[1, 4]);
    InferInput::new("images", DType::I8, shape, Bytes::from(vec![1, 2, 3, 4])).expect("valid input")
}

#[tokio::test]
async fn two_dispatches_resolve_in_dispatch_order() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let body = serde_json::json!({
        "model_name": "rockchip",
        "model_version": "1",
        "outputs": [
            {"name": "output", "datatype": "FP32", "shape": [1, 4], "data": [0.0, 1.0, 2.0, 3.0]},
            {"name": "376", "datatype": "FP32", "shape": [1, 2], "data": [4.0, 5.0]},
            {"name": "377", "datatype": "FP32", "shape": [2], "data": [6.0, 7.0]}
        ]
    })
    .to_string();
    tokio::spawn(serve_requests(listener, http_response("200 OK", &body), 2));

    let client = InferenceClient::connect(&addr.to_string(), 2)?;
    let input = small_input();

    let mut pending = Vec::new();
    for _ in 0..2 {
        pending.push(client.async_infer("rockchip", vec![input.clone()])?);
    }

    let mut responses = 0;
    for request in pending {
        let result = request.get_result().await?;
        assert_eq!(result.model_name(), "rockchip");
        assert_eq!(result.output("output")?.shape, Shape::from_slice(&[1, 4]));
        assert_eq!(result.output("376")?.shape, Shape::from_slice(&[1, 2]));
        assert_eq!(result.output("377")?.shape, Shape::from_slice(&[2]));
        responses += 1;
    }
    assert_eq!(responses, 2);
    Ok(())
}

#[tokio::test]
async fn missing_named_output_is_an_error() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let body = serde_json::json!({
        "model_name": "rockchip",
        "outputs": [
            {"name": "376", "datatype": "FP32", "shape": [1], "data": [0.0]}
        ]
    })
    .to_string();
    tokio::spawn(serve_requests(listener, http_response("200 OK", &body), 1));

    let client = InferenceClient::connect(&addr.to_string(), 2)?;
    let result = client
        .async_infer("rockchip", vec![small_input()])?
        .get_result()
        .await?;

    let err = result.output("output").unwrap_err();
    assert!(err.to_string().contains("missing"));
    Ok(())
}

#[tokio::test]
async fn server_error_body_is_surfaced() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let body = serde_json::json!({"error": "model 'rockchip' is not ready"}).to_string();
    tokio::spawn(serve_requests(listener, http_response("400 Bad Request", &body), 1));

    let client = InferenceClient::connect(&addr.to_string(), 2)?;
    let err = client
        .async_infer("rockchip", vec![small_input()])?
        .get_result()
        .await
        .unwrap_err();

    assert!(err.to_string().contains("not ready"));
    Ok(())
}

#[tokio::test]
async fn unreachable_endpoint_fails_the_request() -> Result<()> {
    // Bind to reserve a port, then drop so nothing is listening.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let client = InferenceClient::connect(&addr.to_string(), 2)?;
    let result = client
        .async_infer("rockchip", vec![small_input()])?
        .get_result()
        .await;

    assert!(result.is_err());
    Ok(())
}

#[test]
fn connect_normalizes_bare_host_port() {
    assert!(InferenceClient::connect("localhost:8000", 2).is_ok());
    assert!(InferenceClient::connect("http://localhost:8000", 2).is_ok());
}

#[test]
fn connect_rejects_bad_urls() {
    assert!(InferenceClient::connect("http://", 2).is_err());
    assert!(InferenceClient::connect("localhost:8000", 0).is_err());
}
