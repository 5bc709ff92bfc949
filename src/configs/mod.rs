pub mod base;
pub mod chimes;
pub mod logging;
pub mod session;
pub mod voice;

pub use base::*;
pub use chimes::*;
pub use logging::*;
pub use session::*;
pub use voice::*;
