//! Basic authentication decorator

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::{HttpRequest, HttpResponse, Transport};
use crate::api::constants::headers;
use crate::api::error::TransportError;

/// Adds `Authorization: Basic ..` to every request sent through `inner`
pub struct BasicAuthTransport<T> {
    inner: T,
    authorization: String,
}

impl<T> BasicAuthTransport<T> {
    pub fn new(inner: T, username: &str, password: &str) -> Self {
        let credentials = STANDARD.encode(format!("{}:{}", username, password));
        Self {
            inner,
            authorization: format!("Basic {}", credentials),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T> std::fmt::Debug for BasicAuthTransport<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Transport> Transport for BasicAuthTransport<T> {
    async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse, TransportError> {
        request
            .headers
            .insert(headers::AUTHORIZATION, self.authorization.clone());
        self.inner.send(request).await
    }
}
