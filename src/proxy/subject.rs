use anyhow::Result;
use serde_json::Value;

use super::signature::Signature;

/// A method the subject exposes through the proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub name: String,
    pub signature: Signature,
}

impl MethodSignature {
    pub fn new(name: &str, signature: Signature) -> Self {
        Self {
            name: name.to_string(),
            signature,
        }
    }
}

/// An object whose method calls can be memoized by a [`Proxy`](super::Proxy)
pub trait Subject {
    /// Declared methods and their shapes. Read once, when the subject is
    /// handed to the proxy.
    fn methods(&self) -> Vec<MethodSignature>;

    /// Run `method` with already validated arguments
    fn call(&mut self, method: &str, args: &[Value]) -> Result<Value>;
}
