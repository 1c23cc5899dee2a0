use serde_json::{json, Value};

/// Identity of a proxied call: subject type, method name and ordered arguments
#[derive(Debug, Clone, PartialEq)]
pub struct CallInfo {
    pub subject_type: String,
    pub method: String,
    pub args: Vec<Value>,
}

impl CallInfo {
    pub fn new(subject_type: impl Into<String>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            subject_type: subject_type.into(),
            method: method.into(),
            args,
        }
    }

    /// Call identity for subject type `S`, named the same way the proxy names it
    pub fn for_subject<S: ?Sized>(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self::new(std::any::type_name::<S>(), method, args)
    }

    /// Canonical string form hashed into the cache key: `[type, method, [args...]]`
    pub fn canonical(&self) -> String {
        json!([self.subject_type, self.method, self.args]).to_string()
    }
}

/// What to look up hit counts by
#[derive(Debug, Clone)]
pub enum HitLookup {
    /// A key already produced by `make_hash`
    Key(String),
    /// A call identity to derive the key from
    Call(CallInfo),
}

impl From<&str> for HitLookup {
    fn from(key: &str) -> Self {
        HitLookup::Key(key.to_string())
    }
}

impl From<String> for HitLookup {
    fn from(key: String) -> Self {
        HitLookup::Key(key)
    }
}

impl From<&String> for HitLookup {
    fn from(key: &String) -> Self {
        HitLookup::Key(key.clone())
    }
}

impl From<CallInfo> for HitLookup {
    fn from(call: CallInfo) -> Self {
        HitLookup::Call(call)
    }
}

impl From<&CallInfo> for HitLookup {
    fn from(call: &CallInfo) -> Self {
        HitLookup::Call(call.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_form() {
        let call = CallInfo::new("Greeter", "greet", vec![json!("bob"), json!(2)]);
        assert_eq!(call.canonical(), r#"["Greeter","greet",["bob",2]]"#);
    }

    #[test]
    fn test_canonical_form_is_order_sensitive() {
        let a = CallInfo::new("T", "m", vec![json!(1), json!(2)]);
        let b = CallInfo::new("T", "m", vec![json!(2), json!(1)]);
        assert_ne!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_object_arguments_are_canonical_regardless_of_insertion_order() {
        let a = CallInfo::new("T", "m", vec![json!({"x": 1, "y": 2})]);
        let b = CallInfo::new("T", "m", vec![json!({"y": 2, "x": 1})]);
        assert_eq!(a.canonical(), b.canonical());
    }
}
