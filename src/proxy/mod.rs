//! HTTP relay module.
//!
//! Accepts chat requests, normalizes them, opens a streaming completion
//! upstream and re-encodes the output as Server-Sent Events.

mod handlers;
pub mod normalize;
mod server;
pub mod sse;
pub mod stream;
pub mod types;
pub mod upstream;

pub use handlers::parse_payload;
pub use normalize::{normalize, InputForm, NormalizedRequest};
pub use server::{create_router, run_server, AppState, RequestId, REQUEST_ID_HEADER};
pub use sse::{encode_events, StreamEvent};
pub use stream::FragmentStream;
pub use types::{Content, Message, Part};
pub use upstream::UpstreamClient;
