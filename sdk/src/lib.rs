//! DID-WBA mutual authentication core for agent network services.
//!
//! Agents identified by `did:wba` DIDs authenticate HTTP exchanges with
//! signed `DIDWba` Authorization headers, receive short-lived RS256 bearer
//! tokens for follow-up calls, and verify inbound requests through the
//! middleware in [`server`].

pub mod authenticator;
pub mod client;
pub mod config;
pub mod crypto;
pub mod did;
pub mod error;
pub mod header;
pub mod jwt;
pub mod keystore;
pub mod matcher;
pub mod nonce;
pub mod resolver;
pub mod server;
pub mod token_store;
pub mod transport;

pub use client::{AuthCallResult, AuthClient};
pub use config::AuthConfig;
pub use did::{AuthenticationContext, DidCredentials, DidDocument, DidKeyPair};
pub use error::AuthError;
pub use keystore::KeyStore;
pub use resolver::DidResolver;
pub use server::{auth_middleware, AuthServerState};
