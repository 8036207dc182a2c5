pub mod auth;
pub mod config;
pub mod error;
pub mod factory;
pub mod providers;
pub mod traits;
pub mod types;

pub use auth::TokenSource;
pub use config::*;
pub use error::ProviderError;
pub use factory::*;
pub use traits::*;
pub use types::*;
