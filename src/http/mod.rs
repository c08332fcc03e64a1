//! Minimal HTTP/1.1 front end for the sandbox and the lesson store.

pub mod request;
pub mod response;
pub mod router;
pub mod server;

pub use request::{read_request, Request, RequestError};
pub use response::Response;
pub use router::Router;
pub use server::HttpServer;
