//! Request and token gating around a single pipeline invocation.

mod handler;
mod hook;
mod policy;
mod usage;

pub use handler::{InterceptorOptions, InterceptorState, InvocationInterceptor};
pub use hook::{InvocationHook, RunInfo};
pub use policy::InterceptorPolicy;
pub use usage::UsageFields;
