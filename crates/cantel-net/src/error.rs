use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TcpError {
    #[error("could not create socket: {0}")]
    Socket(#[source] io::Error),
    #[error("could not connect: {0}")]
    Connect(#[source] io::Error),
    #[error("could not register socket with poll: {0}")]
    Register(#[source] io::Error),
}
