pub mod app;
pub mod replay;

pub use app::run as run_app;
