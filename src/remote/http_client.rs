use crate::remote::{RemoteError, RemoteResult};
use log::debug;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// HTTP transport for the Graph drive API.
///
/// Every response is funnelled through `check_status`, so callers only see
/// `RemoteError` variants and never raw status codes.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Get full URL by prepending the API base if needed
    pub fn get_full_url(&self, url: &str) -> String {
        if url.starts_with("http") {
            url.to_string()
        } else {
            format!("{}{}", self.base_url, url)
        }
    }

    fn request(&self, method: Method, url: &str, auth_header: &str) -> RequestBuilder {
        let url = self.get_full_url(url);
        debug!("{} {}", method, url);
        self.client
            .request(method, url)
            .header("Authorization", auth_header)
    }

    /// Make a GET request and decode the JSON body
    pub async fn get<T>(&self, url: &str, auth_header: &str) -> RemoteResult<T>
    where
        T: DeserializeOwned,
    {
        let response = send(self.request(Method::GET, url, auth_header)).await?;
        decode(response).await
    }

    /// Send a JSON body with the given method and decode the JSON response
    pub async fn send_json<T, B>(&self, method: Method, url: &str, body: &B, auth_header: &str) -> RemoteResult<T>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let builder = self
            .request(method, url, auth_header)
            .header("Content-Type", "application/json")
            .json(body);
        let response = send(builder).await?;
        decode(response).await
    }

    /// Make a DELETE request
    pub async fn delete(&self, url: &str, auth_header: &str) -> RemoteResult<()> {
        send(self.request(Method::DELETE, url, auth_header)).await?;
        Ok(())
    }

    /// Upload raw bytes with PUT and decode the JSON response
    pub async fn put_bytes<T>(&self, url: &str, data: &[u8], auth_header: &str) -> RemoteResult<T>
    where
        T: DeserializeOwned,
    {
        let builder = self
            .request(Method::PUT, url, auth_header)
            .header("Content-Type", "application/octet-stream")
            .body(data.to_vec());
        let response = send(builder).await?;
        decode(response).await
    }

    /// Download a byte range. An unsatisfiable range means end-of-file.
    pub async fn get_range(&self, url: &str, offset: u64, length: u64, auth_header: &str) -> RemoteResult<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let range = format!("bytes={}-{}", offset, offset + length - 1);
        let builder = self
            .request(Method::GET, url, auth_header)
            .header("Range", range);
        let response = builder
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Vec::new());
        }
        let response = check_status(response).await?;
        let full_body = response.status() == StatusCode::OK;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        // Servers that ignore Range answer 200 with the whole object
        if full_body {
            let start = (offset as usize).min(bytes.len());
            let end = (offset.saturating_add(length) as usize).min(bytes.len());
            return Ok(bytes[start..end].to_vec());
        }
        let mut data = bytes.to_vec();
        data.truncate(length as usize);
        Ok(data)
    }
}

async fn send(builder: RequestBuilder) -> RemoteResult<Response> {
    let response = builder
        .send()
        .await
        .map_err(|e| RemoteError::Network(e.to_string()))?;
    check_status(response).await
}

async fn decode<T: DeserializeOwned>(response: Response) -> RemoteResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| RemoteError::Protocol(format!("failed to decode response: {}", e)))
}

async fn check_status(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_to_error(status, body))
}

/// Map a failed HTTP status onto the remote error taxonomy
pub fn status_to_error(status: StatusCode, body: String) -> RemoteError {
    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound(body),
        StatusCode::CONFLICT => RemoteError::AlreadyExists(body),
        StatusCode::UNAUTHORIZED => RemoteError::AuthExpired,
        StatusCode::FORBIDDEN => RemoteError::PermissionDenied(body),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => RemoteError::RateLimited,
        _ => RemoteError::Network(format!("HTTP {}: {}", status, body)),
    }
}
