//! Pomodoro-style focus sessions bound to voice channels.

pub mod chimes;
pub mod focus;
pub mod panel;
pub mod registry;
pub mod timer;

pub use chimes::{ChimeKind, Chimes};
pub use focus::{Session, SessionContext};
pub use panel::{PanelRef, Phase, SessionSnapshot, StatusPanel};
pub use registry::SessionRegistry;
pub use timer::TaskCounts;
