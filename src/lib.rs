pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod http;
pub mod logging;
pub mod repository;
pub mod session;

pub use auth::{JwtCodec, LoginService, TokenService};
pub use config::{ServerConfig, TokenSettings};
pub use error::{AuthError, Result, TokenError};
pub use fingerprint::Fingerprint;
pub use http::{AuthHttpServer, HttpServerState};
pub use repository::{MemoryTokenRepository, PgTokenRepository, TokenFilter, TokenRepository};
