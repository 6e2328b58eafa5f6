pub mod health_check; // Public for OpenAPI annotations

pub use health_check::*;
