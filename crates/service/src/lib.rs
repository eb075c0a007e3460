pub mod dashboard;
pub mod http;

pub use dashboard::Dashboard;
pub use http::{router, serve, ApiError};
