pub mod admission;
pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod provider;
pub mod quota;
pub mod server;

pub use admission::{Admission, AdmissionGate};
pub use config::Config;
pub use error::{Error, Result};
pub use provider::{Generator, ProviderClient, ProviderConfig, ProviderKind};
pub use quota::{QuotaConfig, QuotaStore};
pub use server::{create_app, Server};
