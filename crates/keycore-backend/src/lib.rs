//! Key backends for keycore.
//!
//! Every backend implements the [`KeyBackend`] contract; a
//! [`BackendRegistry`] owns the set of backends a process can use and
//! picks a default for the current platform.
//!
//! # Modules
//!
//! - [`backend`]: the backend contract
//! - [`registry`]: backend registration, lookup and default selection
//! - [`session`]: expiring in-memory sessions over locked memory
//! - [`keystore`]: on-disk envelope and public record formats
//! - [`software`]: password-encrypted local file backend
//! - [`platform`]: OS credential store backends (Keychain, Secret Service)
//! - [`env`]: keys supplied through environment variables
//! - [`remote`]: signing delegated to a paired remote wallet

pub mod backend;
pub mod env;
pub mod keystore;
pub mod platform;
pub mod registry;
pub mod remote;
pub mod session;
pub mod software;

pub use backend::KeyBackend;
pub use env::EnvBackend;
pub use platform::{PlatformBackend, SecretStore};
pub use registry::BackendRegistry;
pub use remote::RemoteSignerBackend;
pub use session::SessionStore;
pub use software::SoftwareBackend;
