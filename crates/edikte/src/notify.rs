use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::summary::cap_message;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Telegram returned {status}: {body}")]
    Server { status: u16, body: String },
}

/// Receives the run digest.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), NotifyError>;
}

/// Writes the digest to the log instead of sending it anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        log::info!("Digest:\n{}", message);
        Ok(())
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

/// Sends the digest through a Telegram bot.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: Client,
    token: String,
    chat_id: String,
    base_url: String,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            token: token.into(),
            chat_id: chat_id.into(),
            base_url: TELEGRAM_API.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        let text = cap_message(message);
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);

        let resp = self
            .client
            .post(&url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text: &text,
                disable_web_page_preview: true,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Server {
                status: status.as_u16(),
                body,
            });
        }
        log::info!("Telegram message sent ({} chars)", text.chars().count());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answers a single request with `status` and `body`, handing back the
    /// raw request once it is done.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let addr = listener.local_addr().expect("local addr");

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.expect("read request");
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some((head, sent)) = text.split_once("\r\n\r\n") {
                    let length = head
                        .lines()
                        .filter_map(|l| l.split_once(':'))
                        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if sent.len() >= length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream
                .write_all(response.as_bytes())
                .await
                .expect("write response");
            String::from_utf8_lossy(&request).into_owned()
        });

        (format!("http://{addr}"), handle)
    }

    fn sent_json(request: &str) -> serde_json::Value {
        let (_, body) = request.split_once("\r\n\r\n").expect("request body");
        serde_json::from_str(body).expect("JSON body")
    }

    #[tokio::test]
    async fn test_telegram_sends_chat_and_text() {
        let (base_url, server) = serve_once("200 OK", r#"{"ok":true}"#).await;
        let notifier = TelegramNotifier::new("token123", "4711")
            .unwrap()
            .with_base_url(base_url);

        notifier.notify("🟢 Neue Versteigerungen: 4").await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /bottoken123/sendMessage HTTP/1.1"));
        let body = sent_json(&request);
        assert_eq!(body["chat_id"], "4711");
        assert_eq!(body["text"], "🟢 Neue Versteigerungen: 4");
        assert_eq!(body["disable_web_page_preview"], true);
    }

    #[tokio::test]
    async fn test_telegram_caps_long_digest() {
        let (base_url, server) = serve_once("200 OK", r#"{"ok":true}"#).await;
        let notifier = TelegramNotifier::new("t", "1").unwrap().with_base_url(base_url);

        notifier.notify(&"x".repeat(5000)).await.unwrap();

        let body = sent_json(&server.await.unwrap());
        let text = body["text"].as_str().expect("text");
        assert_eq!(text.chars().count(), 4096);
        assert!(text.ends_with("\n[...]"));
    }

    #[tokio::test]
    async fn test_telegram_error_status() {
        let (base_url, server) = serve_once(
            "500 Internal Server Error",
            r#"{"ok":false,"description":"Internal"}"#,
        )
        .await;
        let notifier = TelegramNotifier::new("t", "1").unwrap().with_base_url(base_url);

        let result = notifier.notify("Hallo").await;

        server.await.unwrap();
        match result {
            Err(NotifyError::Server { status, body }) => {
                assert_eq!(status, 500);
                assert!(body.contains("Internal"));
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }
}
