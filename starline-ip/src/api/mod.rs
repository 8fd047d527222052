//! HTTP API handlers for starline-ip

pub mod answers;
pub mod buildinfo;
pub mod health;
pub mod interviews;
pub mod sse;
pub mod users;

pub use answers::answer_routes;
pub use buildinfo::get_build_info;
pub use health::health_routes;
pub use interviews::interview_routes;
pub use sse::event_stream;
pub use users::user_routes;
