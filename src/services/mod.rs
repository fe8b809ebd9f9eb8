// Service exports
pub mod catalog;
pub mod postgres;
pub mod providers;
pub mod registry;

pub use catalog::{
    CatalogError, CatalogSource, CatalogStore, FileCatalog, HttpCatalogClient, StaticCatalog,
};
pub use postgres::PostgresCatalog;
pub use providers::{GenerateOptions, Provider, ProviderDescriptor, ProviderError, ProviderProfile};
pub use registry::{
    DegradeReason, FailedAttempt, ProviderOutcome, ProviderRegistry, RegistryConfig,
};
