pub mod routes;
mod gateway;
mod monitor;
mod student;

pub use gateway::{authorize, handle_connection, RoleSession, Route};
pub use monitor::MonitorSession;
pub use student::StudentSession;
