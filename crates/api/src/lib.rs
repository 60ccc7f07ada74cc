//! HTTP API: job submission routes and the per-job event stream.

pub mod app;
