#![warn(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::similar_names,
    clippy::cast_possible_truncation, // TODO
    clippy::too_many_lines, // TODO
)]

pub mod admission;
mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod flags;
pub mod flow_control;
pub mod frame;
pub mod hpack;
pub mod middleware;
pub mod pool;
pub mod quality;
mod request;
mod response;
pub mod settings;
mod stream;
pub mod timeout;
pub mod transport;
pub mod types;

pub use admission::Priority;
pub use bytes::Bytes;
pub use client::Client;
pub use config::{AdaptiveTimeoutConfig, AdmissionConfig, ClientConfig, ConnectionConfig, PoolConfig};
pub use error::{Http2Error, RequestError};
pub use request::{Method, Request, RequestMetadata};
pub use response::Response;
pub use transport::Transport;
pub use url::Url;
