pub mod acceptor;
pub mod setup;

pub use acceptor::build_rustls;
pub use setup::setup_tls;
