use std::time::Duration;

use log::debug;
use reqwest::StatusCode;

use crate::error::NetworkError;

/// Downloads the current picture of the bound camera.
///
/// Unlike the inference call, nothing here retries or tracks reachability:
/// a failed download is ambiguous between an offline camera and a network
/// hiccup, so callers just skip the detection pass.
#[derive(Clone)]
pub struct ImageFetcher {
    http: reqwest::Client,
    timeout: Duration,
}

impl ImageFetcher {
    /// Create a new ImageFetcher sharing the given HTTP client.
    ///
    /// # Arguments
    ///
    /// * `http` - Client used for the download
    /// * `timeout` - Bound on the whole download including the body
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// Fetch the image at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The request fails or exceeds the timeout
    /// - The server returns anything but 200
    /// - The response body cannot be read
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, NetworkError> {
        let timeout_seconds = self.timeout.as_secs();
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| NetworkError::from_reqwest(url, timeout_seconds, e))?;

        if response.status() != StatusCode::OK {
            return Err(NetworkError::UnexpectedStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| NetworkError::from_reqwest(url, timeout_seconds, e))?;
        debug!("Fetched {} bytes from {}", data.len(), url);
        Ok(data.to_vec())
    }
}

/// Turn a picture reference into an absolute URL.
///
/// Hosts usually publish camera pictures as paths (`/api/camera_proxy/...`);
/// those are prefixed with the externally reachable base URL.
pub fn resolve_image_url(reference: &str, base_url: &str) -> String {
    if reference.starts_with('/') {
        format!("{}{}", base_url.trim_end_matches('/'), reference)
    } else {
        reference.to_string()
    }
}

/// MIME type of encoded image bytes, falling back to JPEG for unknown data.
pub fn content_type(image_data: &[u8]) -> &'static str {
    image::guess_format(image_data)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/jpeg")
}
