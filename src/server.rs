pub mod domain;
pub mod license;
pub mod registry;

pub use domain::{Server, Services};
pub use license::{Confirm, FixedAnswer};
pub use registry::ServerRegistry;
