//! HTTP surface over the generation runtime: course creation, workflow
//! control, quiz requests and operational views.

pub mod app;
