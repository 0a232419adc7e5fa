pub mod decoder;
pub mod registry;
pub mod services;
pub mod session;
pub mod traits;
pub mod transport;
