//! Streaming relay between web clients and a local Ollama server - Library exports for testing
//!
//! (c) ollama-relay authors 2026

pub mod api;
pub mod core;
pub mod infrastructure;

use crate::core::services::OllamaRelayService;
use crate::infrastructure::config::RelayConfig;
use crate::infrastructure::upstream::OllamaClient;
use anyhow::anyhow;
use di::{Injectable, Ref, ServiceCollection, ServiceProvider, singleton_as_self};

/// Registers the relay services around an already loaded configuration.
pub fn build_provider(config: RelayConfig) -> anyhow::Result<ServiceProvider> {
    ServiceCollection::new()
        .add(singleton_as_self::<RelayConfig>().from(move |_| Ref::new(config.clone())))
        .add(OllamaClient::singleton())
        .add(OllamaRelayService::singleton())
        .build_provider()
        .map_err(|e| anyhow!("invalid service registrations: {e:?}"))
}
