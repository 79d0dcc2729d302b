//! Core engine configuration

pub mod config;

pub use config::{
    ApplicationConfig, BackendKind, DirectXRendererConfig, EngineConfig, RendererConfig, ShaderConfig,
    TextureConfig, ViewConfig, VulkanRendererConfig,
};
