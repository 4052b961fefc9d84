//! Wire protocol for the maze race server.
//!
//! - **Types** ([`Player`], [`GameMode`], [`GameSnapshot`], ids) shared by
//!   the wire format and the session layer.
//! - **Inbound** ([`Envelope`], [`Command`], [`Handshake`]) with payload
//!   validation.
//! - **Outbound** ([`Response`]).
//! - **Codec** ([`Codec`], [`JsonCodec`]) converting to and from frames.
//!
//! ```text
//! Transport (bytes) → Envelope → Command → session layer → Response → bytes
//! ```

mod codec;
mod command;
mod error;
mod response;
mod types;

pub use codec::{Codec, JsonCodec};
pub use command::{Command, Envelope, Handshake, MAX_FLAG_LEN, MAX_USERNAME_LEN};
pub use error::ProtocolError;
pub use response::Response;
pub use types::{
    GameId, GameMode, GameSnapshot, Player, PlayerId, PlayerScore, PlayerUpdate, Position,
};
