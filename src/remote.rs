// src/remote.rs

use crate::config::ApiConfig;
use crate::error::RemoteError;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;
use urlencoding::encode;

/// What the extraction service hands back for one uploaded document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub document_id: String,
    pub payload: Value,
}

impl ExtractionResult {
    /// Pull `data[0].document_id` out of an extraction response. Numeric ids
    /// are accepted and rendered as strings.
    pub fn from_response(payload: Value) -> Result<Self, RemoteError> {
        let id = payload
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(|first| first.get("document_id"));

        let document_id = match id {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(RemoteError::Shape(
                    "no document_id found in extraction response".to_string(),
                ));
            }
        };

        Ok(Self {
            document_id,
            payload,
        })
    }
}

/// The extraction and mapping services.
#[async_trait]
pub trait DocumentApi: Send + Sync {
    /// Upload a PDF for extraction.
    async fn extract(&self, pdf_path: &Path) -> Result<ExtractionResult, RemoteError>;

    /// Fetch the normalised mapping (`mapped_result`) for an extracted document.
    async fn mapping(&self, document_id: &str) -> Result<Map<String, Value>, RemoteError>;
}

/// HTTP client for the document services.
pub struct HttpDocumentApi {
    client: Client,
    extract_url: String,
    mapping_url: String,
    upload_field: String,
}

impl HttpDocumentApi {
    pub fn new(client: Client, api: &ApiConfig) -> Self {
        Self {
            client,
            extract_url: api.url(&api.extract_path),
            mapping_url: api.url(&api.mapping_path),
            upload_field: api.upload_field.clone(),
        }
    }
}

/// Build the client shared by every remote call.
pub fn build_client(api: &ApiConfig) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(api.timeout()).build()
}

/// Turn a non-2xx response into a `RemoteError::Status`, keeping the body.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Status { status, body })
}

#[async_trait]
impl DocumentApi for HttpDocumentApi {
    async fn extract(&self, pdf_path: &Path) -> Result<ExtractionResult, RemoteError> {
        let bytes = tokio::fs::read(pdf_path)
            .await
            .map_err(|source| RemoteError::Io {
                path: pdf_path.to_path_buf(),
                source,
            })?;
        let file_name = pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/pdf")?;
        let form = Form::new().part(self.upload_field.clone(), part);

        let response = self
            .client
            .post(&self.extract_url)
            .multipart(form)
            .send()
            .await?;
        let payload: Value = check_status(response).await?.json().await?;

        ExtractionResult::from_response(payload)
    }

    async fn mapping(&self, document_id: &str) -> Result<Map<String, Value>, RemoteError> {
        let url = format!(
            "{}/{}",
            self.mapping_url.trim_end_matches('/'),
            encode(document_id)
        );

        let response = self.client.get(&url).send().await?;
        let mut body: Value = check_status(response).await?.json().await?;
        debug!(response = %body, "Mapping response");

        match body.get_mut("mapped_result").map(Value::take) {
            Some(Value::Object(mapped)) => Ok(mapped),
            Some(_) => Err(RemoteError::Shape(
                "mapped_result is not an object".to_string(),
            )),
            None => Err(RemoteError::Shape(
                "no mapped_result in mapping response".to_string(),
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use reqwest::StatusCode;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// Answer one HTTP request with `status` and `body`. The handle yields
    /// the raw request text.
    pub async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            request
        });
        (base_url, handle)
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        while !request_complete(&buf) {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn request_complete(buf: &[u8]) -> bool {
        let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
        let body_len = buf.len() - (header_end + 4);
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok());
        match content_length {
            Some(len) => body_len >= len,
            None if headers.contains("transfer-encoding: chunked") => buf.ends_with(b"0\r\n\r\n"),
            None => true,
        }
    }

    fn api_at(base_url: &str) -> ApiConfig {
        ApiConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            ..ApiConfig::default()
        }
    }

    fn documents_at(base_url: &str) -> HttpDocumentApi {
        let api = api_at(base_url);
        HttpDocumentApi::new(build_client(&api).unwrap(), &api)
    }

    fn write_pdf(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("invoice1.pdf");
        std::fs::write(&path, b"%PDF-1.4 sample").unwrap();
        path
    }

    #[tokio::test]
    async fn extract_uploads_pdf_as_file_list_part() {
        let dir = TempDir::new().unwrap();
        let pdf = write_pdf(&dir);
        let (base_url, server) = serve_once("200 OK", r#"{"data":[{"document_id":"doc-1"}]}"#).await;

        let result = documents_at(&base_url).extract(&pdf).await.unwrap();
        assert_eq!(result.document_id, "doc-1");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /extract/ "), "{request}");
        assert!(request.contains(r#"name="file_list"; filename="invoice1.pdf""#));
        assert!(request.contains("application/pdf"));
        assert!(request.contains("%PDF-1.4 sample"));
    }

    #[tokio::test]
    async fn extract_failure_status_keeps_body() {
        let dir = TempDir::new().unwrap();
        let pdf = write_pdf(&dir);
        let (base_url, server) = serve_once("500 Internal Server Error", "oops").await;

        let err = documents_at(&base_url).extract(&pdf).await.unwrap_err();
        server.await.unwrap();
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        match err {
            RemoteError::Status { body, .. } => assert_eq!(body, "oops"),
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn extract_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let api = documents_at("http://127.0.0.1:9");
        let err = api.extract(&dir.path().join("gone.pdf")).await.unwrap_err();
        assert!(matches!(err, RemoteError::Io { .. }));
    }

    #[tokio::test]
    async fn mapping_encodes_document_id_in_path() {
        let (base_url, server) =
            serve_once("200 OK", r#"{"mapped_result":{"CardCode":"C1","DocumentLines":[]}}"#).await;

        let mapped = documents_at(&base_url).mapping("a/b 1").await.unwrap();
        assert_eq!(mapped.get("CardCode"), Some(&json!("C1")));

        let request = server.await.unwrap();
        assert!(
            request.starts_with("GET /mapping/get-mappings/a%2Fb%201 "),
            "{request}"
        );
    }

    #[tokio::test]
    async fn mapping_without_object_result_is_a_shape_error() {
        for body in [r#"{"other":1}"#, r#"{"mapped_result":[1,2]}"#, r#"{"mapped_result":null}"#] {
            let (base_url, server) = serve_once("200 OK", body).await;
            let err = documents_at(&base_url).mapping("doc-1").await.unwrap_err();
            server.await.unwrap();
            assert!(matches!(err, RemoteError::Shape(_)), "{body}: {err:?}");
        }
    }

    #[tokio::test]
    async fn mapping_not_found_is_a_status_error() {
        let (base_url, server) = serve_once("404 Not Found", r#"{"detail":"unknown"}"#).await;
        let err = documents_at(&base_url).mapping("doc-9").await.unwrap_err();
        server.await.unwrap();
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn numeric_document_id_is_accepted() {
        let result =
            ExtractionResult::from_response(json!({"data": [{"document_id": 42}]})).unwrap();
        assert_eq!(result.document_id, "42");
    }

    #[test]
    fn string_document_id_is_trimmed() {
        let result =
            ExtractionResult::from_response(json!({"data": [{"document_id": " doc-7 "}]}))
                .unwrap();
        assert_eq!(result.document_id, "doc-7");
    }

    #[test]
    fn missing_document_id_is_a_shape_error() {
        for payload in [
            json!({}),
            json!({"data": []}),
            json!({"data": [{"document_id": null}]}),
            json!({"data": [{"document_id": ""}]}),
        ] {
            assert!(matches!(
                ExtractionResult::from_response(payload),
                Err(RemoteError::Shape(_))
            ));
        }
    }

    #[test]
    fn urls_join_base_and_paths() {
        let api = ApiConfig {
            base_url: "http://svc:8080/".to_string(),
            ..ApiConfig::default()
        };
        let client = HttpDocumentApi::new(Client::new(), &api);
        assert_eq!(client.extract_url, "http://svc:8080/extract/");
        assert_eq!(client.mapping_url, "http://svc:8080/mapping/get-mappings");
        assert_eq!(client.upload_field, "file_list");
    }
}
