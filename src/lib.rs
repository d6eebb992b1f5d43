pub mod app;
pub mod config;
pub mod exception;
pub mod param;
pub mod request;
pub mod response;
pub mod server;
pub mod supervisor;
pub mod util;

pub use app::{App, CounterApp};
pub use config::Config;
pub use exception::Exception;
pub use param::{HttpRequestMethod, HttpVersion};
pub use request::{AppRequest, Request};
pub use response::{AppResponse, Response};
pub use server::ServerHandle;
pub use supervisor::{EpochState, Fault, RecoveryPolicy, Supervisor};
pub use util::HtmlBuilder;
