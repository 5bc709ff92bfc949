pub mod audio;
pub mod common;
pub mod configs;
pub mod dispatch;
pub mod gateway;
pub mod playback;
pub mod session;
pub mod voice;
