//! # Call Credentials
//!
//! A [`Credentials`] supplier is asked for request metadata right before every call, and
//! [`Authenticated`] wraps any [`Transport`] so that metadata is attached to each request.
//! Suppliers that refresh tokens can do so inside [`Credentials::request_metadata`].
use crate::transport::{CallOptions, RequestStream, ResponseStream, RpcMethod, Transport};
use prost_reflect::DynamicMessage;
use std::fmt;
use tonic::Status;

/// Supplies the metadata that authenticates a call.
#[tonic::async_trait]
pub trait Credentials: Send + Sync + 'static {
    /// Returns the headers to attach to a call of `method`.
    ///
    /// An error fails the call with that status, without sending anything.
    async fn request_metadata(
        &self,
        method: &RpcMethod,
    ) -> Result<Vec<(String, String)>, Status>;
}

/// A fixed OAuth2-style bearer token, sent as `authorization: Bearer <token>`.
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

#[tonic::async_trait]
impl Credentials for BearerToken {
    async fn request_metadata(
        &self,
        _method: &RpcMethod,
    ) -> Result<Vec<(String, String)>, Status> {
        Ok(vec![(
            "authorization".to_string(),
            format!("Bearer {}", self.0),
        )])
    }
}

/// A [`Transport`] that attaches credentials to every call before delegating it.
#[derive(Debug, Clone)]
pub struct Authenticated<T, C> {
    inner: T,
    credentials: C,
}

impl<T, C> Authenticated<T, C>
where
    C: Credentials,
{
    pub fn new(inner: T, credentials: C) -> Self {
        Self { inner, credentials }
    }

    async fn authorize(
        &self,
        method: &RpcMethod,
        mut options: CallOptions,
    ) -> Result<CallOptions, Status> {
        let metadata = self.credentials.request_metadata(method).await?;
        options.headers.extend(metadata);
        Ok(options)
    }
}

#[tonic::async_trait]
impl<T, C> Transport for Authenticated<T, C>
where
    T: Transport,
    C: Credentials,
{
    async fn unary(
        &self,
        method: RpcMethod,
        request: DynamicMessage,
        options: CallOptions,
    ) -> Result<DynamicMessage, Status> {
        let options = self.authorize(&method, options).await?;
        self.inner.unary(method, request, options).await
    }

    async fn server_streaming(
        &self,
        method: RpcMethod,
        request: DynamicMessage,
        options: CallOptions,
    ) -> Result<ResponseStream, Status> {
        let options = self.authorize(&method, options).await?;
        self.inner.server_streaming(method, request, options).await
    }

    async fn client_streaming(
        &self,
        method: RpcMethod,
        requests: RequestStream,
        options: CallOptions,
    ) -> Result<DynamicMessage, Status> {
        let options = self.authorize(&method, options).await?;
        self.inner.client_streaming(method, requests, options).await
    }

    async fn streaming(
        &self,
        method: RpcMethod,
        requests: RequestStream,
        options: CallOptions,
    ) -> Result<ResponseStream, Status> {
        let options = self.authorize(&method, options).await?;
        self.inner.streaming(method, requests, options).await
    }
}
