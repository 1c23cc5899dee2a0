use serde_json::Value;
use std::fmt;

/// Declared type of a parameter or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Any,
    Null,
    Bool,
    Int,
    Float,
    String,
    Array,
    Object,
}

impl ValueKind {
    /// Whether a runtime value satisfies this declared kind.
    /// Integers are accepted where floats are declared.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ValueKind::Any => true,
            ValueKind::Null => value.is_null(),
            ValueKind::Bool => value.is_boolean(),
            ValueKind::Int => value.is_i64() || value.is_u64(),
            ValueKind::Float => value.is_number(),
            ValueKind::String => value.is_string(),
            ValueKind::Array => value.is_array(),
            ValueKind::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Any => "any",
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// A declared parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub kind: ValueKind,
    pub required: bool,
}

/// Declared shape of a callable: ordered parameters and an optional return kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Param>,
    pub returns: Option<ValueKind>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a required parameter
    pub fn param(mut self, name: &str, kind: ValueKind) -> Self {
        self.params.push(Param {
            name: name.to_string(),
            kind,
            required: true,
        });
        self
    }

    /// Append an optional parameter
    pub fn optional(mut self, name: &str, kind: ValueKind) -> Self {
        self.params.push(Param {
            name: name.to_string(),
            kind,
            required: false,
        });
        self
    }

    pub fn returns(mut self, kind: ValueKind) -> Self {
        self.returns = Some(kind);
        self
    }

    pub fn required_count(&self) -> usize {
        self.params.iter().filter(|p| p.required).count()
    }

    /// Check an argument list against the declared parameters.
    /// Returns a human readable reason on mismatch.
    pub fn check_args(&self, args: &[Value]) -> Result<(), String> {
        let required = self.required_count();
        if args.len() < required {
            return Err(format!(
                "too few arguments: {} passed, at least {} expected",
                args.len(),
                required
            ));
        }
        if args.len() > self.params.len() {
            return Err(format!(
                "too many arguments: {} passed, at most {} expected",
                args.len(),
                self.params.len()
            ));
        }

        for (index, (param, arg)) in self.params.iter().zip(args).enumerate() {
            if !param.kind.accepts(arg) {
                return Err(format!(
                    "argument #{} ({}) must be of type {}, {} given",
                    index + 1,
                    param.name,
                    param.kind,
                    kind_of(arg)
                ));
            }
        }
        Ok(())
    }
}

fn kind_of(value: &Value) -> ValueKind {
    match value {
        Value::Null => ValueKind::Null,
        Value::Bool(_) => ValueKind::Bool,
        Value::Number(n) if n.is_f64() => ValueKind::Float,
        Value::Number(_) => ValueKind::Int,
        Value::String(_) => ValueKind::String,
        Value::Array(_) => ValueKind::Array,
        Value::Object(_) => ValueKind::Object,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_arity_bounds() {
        let sig = Signature::new()
            .param("a", ValueKind::Any)
            .optional("b", ValueKind::Int);

        assert!(sig.check_args(&[]).unwrap_err().contains("too few"));
        assert!(sig.check_args(&[json!("x")]).is_ok());
        assert!(sig.check_args(&[json!("x"), json!(2)]).is_ok());
        assert!(sig
            .check_args(&[json!("x"), json!(2), json!(3)])
            .unwrap_err()
            .contains("too many"));
    }

    #[test]
    fn test_kind_mismatch_names_the_argument() {
        let sig = Signature::new()
            .param("name", ValueKind::String)
            .param("count", ValueKind::Int);

        let reason = sig.check_args(&[json!("ok"), json!(1.5)]).unwrap_err();
        assert_eq!(reason, "argument #2 (count) must be of type int, float given");
    }

    #[test]
    fn test_float_accepts_integers() {
        assert!(ValueKind::Float.accepts(&json!(3)));
        assert!(!ValueKind::Int.accepts(&json!(3.5)));
        assert!(ValueKind::Any.accepts(&json!(null)));
    }
}
