//! Filtering HTTP/HTTPS forward proxy.
//!
//! One task per accepted connection drives the session: parse the request,
//! apply the word and host policies, then either forward the request with a
//! rewritten head and a policy-cleared response, or splice a CONNECT tunnel.

mod body;
mod framed;
mod server;
mod session;
mod tunnel;
mod upstream;

pub use body::{read_message_body, BodyReadOutcome};
pub use framed::FramedStream;
pub use server::ProxyServer;
pub use tunnel::relay_until_closed;
pub use upstream::connect_upstream;
