//! Gateway: HTTP + WebSocket front end.
//!
//! Single port serves `GET /` (health), `GET /fetch` (keyword-filtered history) and
//! `GET /ws` (live feed). Every request except health must carry the shared key.

mod auth;
mod live;
mod protocol;
mod server;

pub use auth::SharedKey;
pub use protocol::{
    FetchQuery, LiveFrame, LiveQuery, Notice, CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR,
    CLOSE_NORMAL, CLOSE_POLICY_VIOLATION,
};
pub use server::{router, run_gateway, serve, ClientSlot, FetchError, GatewayState};
