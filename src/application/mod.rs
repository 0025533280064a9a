//! Application bootstrap: one proxy instance per configured service

pub mod app;

pub use app::{Application, ServiceInstance};
