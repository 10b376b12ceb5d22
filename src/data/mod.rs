mod dataset;
mod loader;
mod split;

pub use dataset::ImageDataset;
pub use loader::load_directory;
pub use split::train_val_split;

use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

/// Errors produced while reading an image directory into a dataset.
#[derive(Debug)]
pub enum DataError {
    Io(io::Error),

    /// An image file could not be decoded.
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },

    /// The root directory contains no class subdirectories.
    NoClasses(PathBuf),

    /// The class subdirectories contain no image files.
    NoImages(PathBuf),
}

impl Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataError::Io(e) => write!(f, "io error: {e}"),
            DataError::Decode { path, source } => {
                write!(f, "cannot decode image '{}': {source}", path.display())
            }
            DataError::NoClasses(root) => write!(
                f,
                "'{}' has no class subdirectories to load labels from",
                root.display()
            ),
            DataError::NoImages(root) => {
                write!(f, "no image files found under '{}'", root.display())
            }
        }
    }
}

impl Error for DataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DataError::Io(e) => Some(e),
            DataError::Decode { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for DataError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
