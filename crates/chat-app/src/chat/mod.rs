/// Plain-text formatting of the merged thread and the loading line.
pub mod render;
pub mod session;

pub use render::{render_item, render_loading, render_thread};
pub use session::{ChatSession, SessionError, SessionResult};
