//! LLM collaborator client
//!
//! HTTP client for the local generation service (Ollama wire shape):
//! `POST {endpoint}/api/generate` with a non-streaming body, plus a
//! `GET {endpoint}/api/tags` health check. Query expansion is best-effort
//! and falls through to the original question on any failure; answer
//! generation retries transient failures on the remote schedule.

use crate::config::Config;
use crate::error::RagError;
use crate::runtime::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for the LLM collaborator.
pub struct LlmClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    options: GenerateOptions,
    retry: RetryPolicy,
}

impl LlmClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            endpoint: config.llm_endpoint.trim_end_matches('/').to_string(),
            model: config.llm_model.clone(),
            options: GenerateOptions {
                temperature: config.temperature,
                top_p: config.top_p,
                num_predict: config.max_tokens,
            },
            retry: RetryPolicy::remote(),
        })
    }

    /// Replace the retry schedule (used by tests).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Check that the generation service is reachable.
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.endpoint);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RagError::Resource(format!("LLM service unreachable at {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(RagError::Resource(format!(
                "LLM service health check failed with status {}",
                response.status()
            ))
            .into());
        }
        Ok(())
    }

    /// Generate a completion, retrying transient failures.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        self.retry
            .run("llm generate", || self.generate_once(prompt))
            .await
    }

    async fn generate_once(&self, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: self.options,
        };

        let response = self
            .http
            .post(format!("{}/api/generate", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::TransientRemote(format!("LLM request failed: {}", e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(
                RagError::TransientRemote(format!("LLM returned status {}", status)).into(),
            );
        }
        if !status.is_success() {
            anyhow::bail!("LLM request rejected with status {}", status);
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| RagError::TransientRemote(format!("LLM response unreadable: {}", e)))?;
        Ok(parsed.response)
    }

    /// Produce up to `extra` alternative phrasings of a question.
    ///
    /// The original question always leads the returned list. Any failure of
    /// the collaborator degrades to expansion-free retrieval instead of
    /// failing the query.
    pub async fn expand_query(&self, question: &str, extra: usize) -> Vec<String> {
        if extra == 0 {
            return vec![question.to_string()];
        }

        let prompt = format!(
            "Rephrase the following question in {} different ways. \
             Write one rephrasing per line, each ending with a question mark. \
             Do not answer the question.\n\nQuestion: {}",
            extra, question
        );

        match self.generate(&prompt).await {
            Ok(response) => parse_variants(question, &response, extra),
            Err(e) => {
                tracing::warn!("Query expansion failed, continuing with original only: {}", e);
                vec![question.to_string()]
            }
        }
    }
}

/// Extract question-shaped lines, deduplicated against the original.
fn parse_variants(original: &str, response: &str, extra: usize) -> Vec<String> {
    let mut variants = vec![original.to_string()];
    for line in response.lines() {
        if variants.len() >= extra + 1 {
            break;
        }
        let line = line.trim().trim_start_matches(['-', '*', ' ']);
        // Strip a leading "1." / "2)" style enumerator.
        let line = line
            .trim_start_matches(|c: char| c.is_ascii_digit())
            .trim_start_matches(['.', ')'])
            .trim();
        if !line.contains('?') {
            continue;
        }
        if variants.iter().any(|existing| existing == line) {
            continue;
        }
        variants.push(line.to_string());
    }
    variants
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn client_for(endpoint: &str) -> LlmClient {
        let config = Config {
            llm_endpoint: endpoint.to_string(),
            request_timeout_seconds: 5,
            ..Default::default()
        };
        LlmClient::new(&config)
            .unwrap()
            .with_retry(RetryPolicy::immediate())
    }

    /// Drain one HTTP request (headers plus content-length body).
    async fn read_http_request(socket: &mut tokio::net::TcpStream) {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => data.extend_from_slice(&buf[..n]),
            }
            if let Some(header_end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&data[..header_end]).to_lowercase();
                let content_length = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if data.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
    }

    /// Minimal HTTP server answering every request with the given status.
    async fn spawn_stub_server(status_line: &'static str, body: &'static str) -> (String, Arc<AtomicU32>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                read_http_request(&mut socket).await;
                let response = format!(
                    "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), hits)
    }

    #[tokio::test]
    async fn test_expansion_failure_yields_original_only() {
        let (endpoint, hits) =
            spawn_stub_server("HTTP/1.1 500 Internal Server Error", "").await;
        let client = client_for(&endpoint);

        let variants = client.expand_query("What is a chunk?", 3).await;
        assert_eq!(variants, vec!["What is a chunk?".to_string()]);
        // Three attempts were made before falling through.
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_generate_parses_response_field() {
        let (endpoint, _) = spawn_stub_server(
            "HTTP/1.1 200 OK",
            r#"{"response": "forty-two"}"#,
        )
        .await;
        let client = client_for(&endpoint);

        let answer = client.generate("meaning of life?").await.unwrap();
        assert_eq!(answer, "forty-two");
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (endpoint, hits) = spawn_stub_server("HTTP/1.1 404 Not Found", "").await;
        let client = client_for(&endpoint);

        assert!(client.generate("hello").await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let (endpoint, _) = spawn_stub_server("HTTP/1.1 200 OK", r#"{"models": []}"#).await;
        let client = client_for(&endpoint);
        assert!(client.health().await.is_ok());

        let unreachable = client_for("http://127.0.0.1:9");
        assert!(unreachable.health().await.is_err());
    }

    #[test]
    fn test_parse_variants_filters_and_dedupes() {
        let response = "\
1. How are chunks created?\n\
not a question at all\n\
2. How are chunks created?\n\
3) What splits a document into chunks?\n";
        let variants = parse_variants("How is a document chunked?", response, 3);
        assert_eq!(
            variants,
            vec![
                "How is a document chunked?".to_string(),
                "How are chunks created?".to_string(),
                "What splits a document into chunks?".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_variants_drops_exact_original() {
        let response = "How is a document chunked?\nWhat creates chunks?";
        let variants = parse_variants("How is a document chunked?", response, 3);
        assert_eq!(
            variants,
            vec![
                "How is a document chunked?".to_string(),
                "What creates chunks?".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_variants_caps_extra_count() {
        let response = "A? \nB?\nC?\nD?\nE?";
        let variants = parse_variants("Q?", response, 2);
        assert_eq!(variants.len(), 3); // original + 2
    }
}
