pub mod client;
pub mod error;
pub mod flow;
pub mod jws;
pub mod transport;
pub mod types;

pub use client::{AcmeClient, AcmeSettings};
pub use error::{AcmeError, AcmeResult};
pub use flow::{authorize_domain, request_certificate};
pub use jws::{AccountKey, Jwk};
pub use transport::{Body, HttpsTransport, Response, Transport};
