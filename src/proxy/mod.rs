// Gateway module for the memoizing proxy - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod call;
mod hashing;
mod interceptor;
mod signature;
mod subject;

// Public re-exports - the ONLY way to access proxy functionality
pub use call::{CallInfo, HitLookup};
pub use hashing::{
    validate_hash_function, CallableKind, HashFunction, BUILTIN_HASH_FUNCTIONS,
    DEFAULT_HASH_FUNCTION,
};
pub use interceptor::{is_control_method, Proxy, CONTROL_SURFACE};
pub use signature::{Param, Signature, ValueKind};
pub use subject::{MethodSignature, Subject};
