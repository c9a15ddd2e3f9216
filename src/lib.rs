//! Tollgate - request and token quotas for language-model pipelines
//!
//! This crate gates pipeline invocations per identifier. A limiter gate
//! counts units in fixed windows held by a shared counter store, either in
//! process or behind a REST endpoint. An invocation interceptor charges one
//! request before the pipeline runs and the reported tokens after it
//! returns.

pub mod config;
pub mod error;
pub mod interceptor;
pub mod pipeline;
pub mod ratelimit;
