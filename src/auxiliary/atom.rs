//! Atoms in a structure.

use std::fmt;

use anyhow::{self, ensure, format_err};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Structure representing an atom (or an empty site) in a structure.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    /// The atomic symbol of the atom.
    pub atomic_symbol: String,

    /// The Cartesian position of the atom in Ångström.
    pub coordinates: Point3<f64>,
}

impl Atom {
    /// Constructs a new atom.
    ///
    /// # Arguments
    ///
    /// * `atomic_symbol` - The atomic symbol of the atom.
    /// * `coordinates` - The Cartesian position of the atom in Ångström.
    pub fn new(atomic_symbol: &str, coordinates: Point3<f64>) -> Self {
        Self {
            atomic_symbol: atomic_symbol.to_string(),
            coordinates,
        }
    }

    /// Parses an atom line in an `xyz` file to construct an [`Atom`].
    ///
    /// # Arguments
    ///
    /// * `line` - A line in an `xyz` file containing an atomic symbol and three Cartesian
    ///   coordinates.
    ///
    /// # Returns
    ///
    /// The parsed [`Atom`] if the line has the correct format, or an error otherwise.
    pub fn from_xyz(line: &str) -> Result<Self, anyhow::Error> {
        let split = line.split_whitespace().collect::<Vec<_>>();
        ensure!(
            split.len() == 4,
            "Expected an atomic symbol and three coordinates, but found `{line}`."
        );
        let coords = split[1..]
            .iter()
            .map(|x| {
                x.parse::<f64>()
                    .map_err(|_| format_err!("Unable to parse coordinate `{x}` in `{line}`."))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(
            split[0],
            Point3::new(coords[0], coords[1], coords[2]),
        ))
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>3} {:+14.8} {:+14.8} {:+14.8}",
            self.atomic_symbol, self.coordinates[0], self.coordinates[1], self.coordinates[2],
        )
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}
