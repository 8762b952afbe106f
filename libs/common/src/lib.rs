pub mod mirror;
pub mod protocol;

pub use mirror::{Mirror, MirrorInbox, RenderMarker};
pub use protocol::{ClientMessage, Identity, MarkerPosition, Position, ServerMessage};
