//! Discovery: translation, debouncing, validation and snapshot publication.

pub mod controller;
pub mod debounce;
pub mod provider;
pub mod validate;

pub use controller::IngressController;
pub use debounce::Debouncer;
pub use provider::{ConfigProvider, ConfigSnapshot, ProviderOptions};
pub use validate::{ConfigValidator, RouteTableValidator};
