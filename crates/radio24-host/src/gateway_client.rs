//! The Host's view of the Gateway: fan-out notifications, subtitles and the
//! interaction queue.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use radio24_core::config::timeouts;
use radio24_core::queue::QueueItem;

#[async_trait]
pub trait GatewayLink: Send + Sync {
    /// Post a typed message to every listener.
    async fn broadcast(&self, kind: &str, data: Value) -> anyhow::Result<()>;

    /// Post a `host_speech` subtitle.
    async fn subtitle(&self, text: &str) -> anyhow::Result<()>;

    /// Head of the interaction queue.
    async fn peek(&self) -> anyhow::Result<Option<QueueItem>>;

    /// Remove an item by id. `false` when it was already gone.
    async fn dequeue(&self, id: &str) -> anyhow::Result<bool>;
}

pub struct HttpGatewayLink {
    client: reqwest::Client,
    base: String,
}

#[derive(Deserialize)]
struct PeekResponse {
    item: Option<QueueItem>,
}

#[derive(Deserialize)]
struct DequeueResponse {
    removed: bool,
}

impl HttpGatewayLink {
    pub fn new(base: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeouts::PEER)
            .build()
            .context("building gateway HTTP client")?;
        Ok(Self {
            client,
            base: base.into(),
        })
    }

    async fn post(&self, path: &str, body: &Value) -> anyhow::Result<reqwest::Response> {
        let url = format!("{}{path}", self.base);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        ensure_success(response, path).await
    }
}

async fn ensure_success(response: reqwest::Response, what: &str) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("gateway {what} error {status}: {body}");
    }
    Ok(response)
}

#[async_trait]
impl GatewayLink for HttpGatewayLink {
    async fn broadcast(&self, kind: &str, data: Value) -> anyhow::Result<()> {
        self.post("/v1/broadcast", &json!({ "type": kind, "data": data }))
            .await?;
        Ok(())
    }

    async fn subtitle(&self, text: &str) -> anyhow::Result<()> {
        self.post("/v1/subtitle", &json!({ "text": text, "type": "host_speech" }))
            .await?;
        Ok(())
    }

    async fn peek(&self) -> anyhow::Result<Option<QueueItem>> {
        let url = format!("{}/v1/queue/peek", self.base);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let peek: PeekResponse = ensure_success(response, "/v1/queue/peek")
            .await?
            .json()
            .await
            .context("decoding queue peek")?;
        Ok(peek.item)
    }

    async fn dequeue(&self, id: &str) -> anyhow::Result<bool> {
        let reply: DequeueResponse = self
            .post("/v1/queue/dequeue", &json!({ "id": id }))
            .await?
            .json()
            .await
            .context("decoding dequeue reply")?;
        Ok(reply.removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::get, routing::post};
    use std::sync::{Arc, Mutex};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_peek_and_dequeue() {
        let router = Router::new()
            .route(
                "/v1/queue/peek",
                get(|| async {
                    Json(json!({ "item": {
                        "id": "dialogue_1",
                        "user_id": "alice",
                        "kind": "dialogue",
                        "text": "対話リクエスト",
                        "priority": 10,
                        "status": "queued",
                        "enqueued_at": "2025-03-10T10:00:00Z"
                    }}))
                }),
            )
            .route(
                "/v1/queue/dequeue",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({ "removed": body["id"] == "dialogue_1", "id": body["id"] }))
                }),
            );
        let link = HttpGatewayLink::new(serve(router).await).unwrap();

        let item = link.peek().await.unwrap().unwrap();
        assert_eq!(item.user_id, "alice");
        assert!(link.dequeue("dialogue_1").await.unwrap());
        assert!(!link.dequeue("other").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_peek() {
        let router = Router::new().route(
            "/v1/queue/peek",
            get(|| async { Json(json!({ "item": null })) }),
        );
        let link = HttpGatewayLink::new(serve(router).await).unwrap();
        assert!(link.peek().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_wraps_data_and_surfaces_errors() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let router = Router::new()
            .route(
                "/v1/broadcast",
                post(move |Json(body): Json<Value>| {
                    let sink = sink.clone();
                    async move {
                        sink.lock().unwrap().push(body);
                        Json(json!({ "status": "broadcasted" }))
                    }
                }),
            )
            .route(
                "/v1/subtitle",
                post(|| async { (axum::http::StatusCode::BAD_REQUEST, "nope") }),
            );
        let link = HttpGatewayLink::new(serve(router).await).unwrap();

        link.broadcast("dialogue_ready", json!({ "client_id": "alice" }))
            .await
            .unwrap();
        let body = seen.lock().unwrap()[0].clone();
        assert_eq!(body["type"], "dialogue_ready");
        assert_eq!(body["data"]["client_id"], "alice");

        let err = link.subtitle("hi").await.unwrap_err();
        assert!(err.to_string().contains("400"));
    }
}
