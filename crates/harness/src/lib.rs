pub mod device;
pub mod server;

pub use device::TestDevice;
pub use server::TestServer;
