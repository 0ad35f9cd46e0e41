//! Scripted node client.

use crate::error::SimError;
use camurai_core::{read_frame, write_frame, CamuraiError, Frame};
use camurai_env::Coord;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::time::timeout;

/// Longest wait for an expected frame (wall clock).
const STALL: Duration = Duration::from_secs(2);

/// Silence that counts as "nothing more is coming" when draining.
const QUIET: Duration = Duration::from_millis(20);

/// One simulated node: a button, a joy sensor, and a light/buzzer that
/// only exists as the frames it receives.
pub struct SimNode {
    peer: IpAddr,
    coord: Option<Coord>,
    stream: DuplexStream,
}

impl SimNode {
    pub fn new(peer: IpAddr, coord: Option<Coord>, stream: DuplexStream) -> Self {
        Self { peer, coord, stream }
    }

    pub fn peer(&self) -> IpAddr {
        self.peer
    }

    /// Grid cell the address table maps this node to, if any.
    pub fn coord(&self) -> Option<Coord> {
        self.coord
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<(), SimError> {
        write_frame(&mut self.stream, frame).await?;
        Ok(())
    }

    /// Button down, then up.
    pub async fn press(&mut self) -> Result<(), SimError> {
        self.send(&Frame::ButtonPressed).await?;
        self.send(&Frame::ButtonReleased).await
    }

    pub async fn joy(&mut self, intensity: u8) -> Result<(), SimError> {
        self.send(&Frame::Joy(intensity)).await
    }

    /// Next frame from the coordinator.
    pub async fn next_frame(&mut self) -> Result<Frame, SimError> {
        match timeout(STALL, read_frame(&mut self.stream)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SimError::Timeout(format!("a frame at {}", self))),
        }
    }

    /// Fails unless the next frame is `expected`.
    pub async fn expect(&mut self, expected: &Frame) -> Result<(), SimError> {
        let got = self.next_frame().await?;
        if &got == expected {
            Ok(())
        } else {
            Err(SimError::Unexpected {
                node: self.to_string(),
                expected: format!("{:?}", expected),
                got: format!("{:?}", got),
            })
        }
    }

    /// Skips frames until one matches `pred`.
    pub async fn wait_for<F>(&mut self, what: &str, mut pred: F) -> Result<Frame, SimError>
    where
        F: FnMut(&Frame) -> bool,
    {
        loop {
            match self.next_frame().await {
                Ok(frame) if pred(&frame) => return Ok(frame),
                Ok(_) => continue,
                Err(SimError::Timeout(_)) => {
                    return Err(SimError::Timeout(format!("{} at {}", what, self)));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Everything that arrives before the link goes quiet.
    pub async fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(Ok(frame)) = timeout(QUIET, read_frame(&mut self.stream)).await {
            frames.push(frame);
        }
        frames
    }

    /// Skips frames until the coordinator closes the link.
    pub async fn expect_closed(&mut self) -> Result<(), SimError> {
        loop {
            match self.next_frame().await {
                Ok(_) => continue,
                Err(SimError::Link(CamuraiError::ConnectionClosed)) => return Ok(()),
                Err(SimError::Timeout(_)) => {
                    return Err(SimError::Timeout(format!("{} to be closed", self)));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drops the link, like a node losing power.
    pub fn disconnect(self) {}
}

impl fmt::Display for SimNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.coord {
            Some(coord) => write!(f, "node ({}) {}", coord, self.peer),
            None => write!(f, "node {}", self.peer),
        }
    }
}
