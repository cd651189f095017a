//! Repeater data model.
//!
//! Requests arrive from the remote scanning service, are executed by a
//! protocol-specific runner and come back as exactly one [`Response`].

pub mod headers;
pub mod net;
pub mod protocol;
pub mod request;
pub mod response;
pub mod server_error;
pub mod wire;

pub use headers::Headers;
pub use net::{dial, io_error_code, DialError};
pub use protocol::Protocol;
pub use request::{Request, RequestError, RequestOptions};
pub use response::{Outcome, Response};
pub use server_error::{ErrorCode, ServerError};
pub use wire::{WireRequest, WireResponse};
