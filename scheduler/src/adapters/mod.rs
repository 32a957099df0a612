mod log_writer;
mod loopback_transport;
mod mailer;
mod process_spawner;
mod store;

pub use log_writer::FileLogWriter;
pub use loopback_transport::LoopbackTransport;
pub use mailer::LoggingMailer;
pub use process_spawner::ProcessSpawner;
pub use store::JsonFileStore;
