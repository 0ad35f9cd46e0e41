//! Common types shared by the coordinator and its environments.

use serde::{Deserialize, Serialize};

/// Grid coordinate of a node, 0-indexed.
///
/// Serialized as a two-element array `[x, y]` so address tables read
/// naturally in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "[u16; 2]", into = "[u16; 2]")]
pub struct Coord {
    pub x: u16,
    pub y: u16,
}

impl Coord {
    /// Creates a new coordinate.
    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }

    /// Chessboard distance (square rings).
    pub fn chebyshev(&self, other: Coord) -> u16 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }

    /// Taxicab distance (diamond rings).
    pub fn manhattan(&self, other: Coord) -> u16 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// Returns true if the coordinate lies inside a `width x height` grid.
    pub fn within(&self, width: u16, height: u16) -> bool {
        self.x < width && self.y < height
    }
}

impl From<[u16; 2]> for Coord {
    fn from([x, y]: [u16; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Coord> for [u16; 2] {
    fn from(coord: Coord) -> Self {
        [coord.x, coord.y]
    }
}

impl std::fmt::Display for Coord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// An RGB color, 0-255 per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Creates a new color.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Returns the wire representation.
    pub fn to_bytes(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self { r, g, b }
    }
}

impl From<Rgb> for [u8; 3] {
    fn from(rgb: Rgb) -> Self {
        rgb.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_distances() {
        let origin = Coord::new(1, 1);

        assert_eq!(origin.chebyshev(Coord::new(3, 3)), 2);
        assert_eq!(origin.manhattan(Coord::new(3, 3)), 4);
        assert_eq!(origin.chebyshev(Coord::new(0, 2)), 1);
        assert_eq!(origin.manhattan(Coord::new(0, 2)), 2);
        assert_eq!(origin.chebyshev(origin), 0);
    }

    #[test]
    fn test_within_grid() {
        assert!(Coord::new(3, 3).within(4, 4));
        assert!(!Coord::new(4, 0).within(4, 4));
        assert!(!Coord::new(0, 4).within(4, 4));
    }

    #[test]
    fn test_display() {
        assert_eq!(Coord::new(2, 3).to_string(), "2,3");
    }
}
