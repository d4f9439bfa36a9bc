//! Reader of raw binary numeric files.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::marker::PhantomData;
use std::path::Path;

use anyhow::{self, ensure, Context};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use ndarray::{Array2, ShapeBuilder};
use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "numeric_tests.rs"]
mod numeric_tests;

/// Enumerated type for the byte order of a binary file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// Enumerated type for the element order of a matrix stored in a binary file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixOrder {
    /// Rows are stored one after another.
    RowMajor,

    /// Columns are stored one after another, as written by Fortran codes.
    #[default]
    ColMajor,
}

/// Iterable structure for reading numeric binary files.
pub(crate) struct NumericReader<R: BufRead, B: ByteOrder, T> {
    /// The inner file reader.
    inner: R,

    /// The byte order of the numeric values to be read.
    byte_order: PhantomData<B>,

    /// The type of the numeric values to be read.
    numeric_type: PhantomData<T>,
}

impl<R: BufRead, B: ByteOrder, T> NumericReader<R, B, T> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            byte_order: PhantomData,
            numeric_type: PhantomData,
        }
    }
}

impl<B: ByteOrder, T> NumericReader<BufReader<File>, B, T> {
    /// Constructs a new numeric binary reader wrapping around a buffered file reader.
    ///
    /// # Arguments
    ///
    /// * `filename` - The path to the file to be read.
    pub(crate) fn from_file<P: AsRef<Path>>(filename: P) -> Result<Self, anyhow::Error> {
        let f = File::open(&filename)
            .with_context(|| format!("Unable to open `{}`", filename.as_ref().display()))?;
        Ok(Self::new(BufReader::new(f)))
    }
}

macro_rules! impl_iterator_numeric_reader {
    ($($t:ty),+) => {$(
        impl<R: BufRead> Iterator for NumericReader<R, LittleEndian, $t> {
            type Item = $t;

            fn next(&mut self) -> Option<Self::Item> {
                let mut buff: [u8; std::mem::size_of::<$t>()] = [0_u8; std::mem::size_of::<$t>()];
                self.inner.read_exact(&mut buff).ok()?;
                Some(<$t>::from_le_bytes(buff))
            }
        }

        impl<R: BufRead> Iterator for NumericReader<R, BigEndian, $t> {
            type Item = $t;

            fn next(&mut self) -> Option<Self::Item> {
                let mut buff: [u8; std::mem::size_of::<$t>()] = [0_u8; std::mem::size_of::<$t>()];
                self.inner.read_exact(&mut buff).ok()?;
                Some(<$t>::from_be_bytes(buff))
            }
        }
    )+}
}

impl_iterator_numeric_reader!(f64);

/// Reads a real matrix of a known shape from a raw binary file.
///
/// # Arguments
///
/// * `filename` - The path to the file to be read.
/// * `shape` - The shape of the matrix.
/// * `endianness` - The byte order of the values.
/// * `order` - The element order of the values.
///
/// # Errors
///
/// Errors if the file cannot be read, if its length is not a whole number of `f64` values, or if it
/// does not contain exactly the number of values implied by `shape`.
pub(crate) fn read_f64_matrix<P: AsRef<Path>>(
    filename: P,
    shape: (usize, usize),
    endianness: Endianness,
    order: MatrixOrder,
) -> Result<Array2<f64>, anyhow::Error> {
    let n_bytes = fs::metadata(&filename)
        .with_context(|| format!("Unable to open `{}`", filename.as_ref().display()))?
        .len();
    let value_size = std::mem::size_of::<f64>() as u64;
    ensure!(
        n_bytes % value_size == 0,
        "`{}` is {n_bytes} bytes long, which is not a whole number of {value_size}-byte values.",
        filename.as_ref().display()
    );
    let values = match endianness {
        Endianness::Little => {
            NumericReader::<_, LittleEndian, f64>::from_file(&filename)?.collect::<Vec<_>>()
        }
        Endianness::Big => {
            NumericReader::<_, BigEndian, f64>::from_file(&filename)?.collect::<Vec<_>>()
        }
    };
    ensure!(
        values.len() == shape.0 * shape.1,
        "`{}` holds {} values, but a {}×{} matrix requires {}.",
        filename.as_ref().display(),
        values.len(),
        shape.0,
        shape.1,
        shape.0 * shape.1
    );
    let mat = match order {
        MatrixOrder::RowMajor => Array2::from_shape_vec(shape, values)?,
        MatrixOrder::ColMajor => Array2::from_shape_vec(shape.f(), values)?
            .as_standard_layout()
            .to_owned(),
    };
    Ok(mat)
}
