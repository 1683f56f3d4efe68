//! # Schema Lookup
//!
//! Where method descriptors come from (server reflection, a `FileDescriptorSet` on disk, ...)
//! is up to the caller. [`SchemaProvider`] is the small interface the rest of the crate
//! expects from whatever holds them.
use prost_reflect::{DescriptorPool, MethodDescriptor};

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),

    #[error("Method '{method}' not found in service '{service}'")]
    MethodNotFound { service: String, method: String },
}

/// Resolves method descriptors by name.
pub trait SchemaProvider {
    /// Looks up `method` in the service with the fully qualified name `service`.
    fn method(&self, service: &str, method: &str) -> Result<MethodDescriptor, SchemaError>;
}

impl SchemaProvider for DescriptorPool {
    fn method(&self, service: &str, method: &str) -> Result<MethodDescriptor, SchemaError> {
        self.get_service_by_name(service)
            .ok_or_else(|| SchemaError::ServiceNotFound(service.to_string()))?
            .methods()
            .find(|m| m.name() == method)
            .ok_or_else(|| SchemaError::MethodNotFound {
                service: service.to_string(),
                method: method.to_string(),
            })
    }
}
