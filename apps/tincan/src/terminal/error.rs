use std::io;
use thiserror::Error;

use crate::room::RoomError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Room(#[from] RoomError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("no room matching '{0}' was found on this network")]
    RoomNotFound(String),
    #[error("'{0}' matches several rooms; join by host id instead")]
    AmbiguousRoom(String),
    #[error("terminal runtime error: {0}")]
    Runtime(String),
}
