use std::{
    error::Error,
    fmt::{self, Display},
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::arch::{Layer, LayerSpec, Sequential};

const MAGIC: &str = "mri-classifier";
const VERSION: u32 = 1;

/// Errors produced while saving or loading a model file.
#[derive(Debug)]
pub enum PersistError {
    Io(io::Error),

    /// The architecture header is missing, malformed or incompatible.
    Header(String),

    /// The tensor payload does not match the declared architecture.
    TensorCount { got: usize, expected: usize },
    TensorShape {
        index: usize,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
}

impl Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Io(e) => write!(f, "io error: {e}"),
            PersistError::Header(msg) => write!(f, "invalid model header: {msg}"),
            PersistError::TensorCount { got, expected } => {
                write!(f, "model file has {got} tensors, expected {expected}")
            }
            PersistError::TensorShape {
                index,
                got,
                expected,
            } => write!(
                f,
                "tensor {index} has shape {got:?}, expected {expected:?}"
            ),
        }
    }
}

impl Error for PersistError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PersistError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PersistError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

#[derive(Serialize, Deserialize)]
struct Header {
    magic: String,
    version: u32,
    layers: Vec<LayerSpec>,
}

/// Writes the model to `path`: a JSON architecture header line followed by
/// every state tensor as raw `f32` bytes (native endianness; the format is
/// meant for same-machine reload, not interchange).
pub fn save(model: &Sequential, path: &Path) -> Result<(), PersistError> {
    let header = Header {
        magic: MAGIC.to_string(),
        version: VERSION,
        layers: model.layers().iter().map(Layer::spec).collect(),
    };
    let json =
        serde_json::to_string(&header).map_err(|e| PersistError::Header(e.to_string()))?;

    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(json.as_bytes())?;
    out.write_all(b"\n")?;

    let tensors = model.state_tensors();
    out.write_all(&(tensors.len() as u64).to_le_bytes())?;
    for tensor in tensors {
        let shape = tensor.shape();
        out.write_all(&(shape.len() as u64).to_le_bytes())?;
        for &dim in shape {
            out.write_all(&(dim as u64).to_le_bytes())?;
        }
        let values: Vec<f32> = tensor.iter().copied().collect();
        out.write_all(bytemuck::cast_slice(&values))?;
    }
    out.flush()?;

    log::info!(
        "saved model ({} parameters) to '{}'",
        model.param_count(),
        path.display()
    );
    Ok(())
}

/// Reads a model written by [`save`], rebuilding the architecture from the
/// header and filling every state tensor.
pub fn load(path: &Path) -> Result<Sequential, PersistError> {
    let mut input = BufReader::new(File::open(path)?);

    let mut line = String::new();
    input.read_line(&mut line)?;
    let header: Header = serde_json::from_str(line.trim_end())
        .map_err(|e| PersistError::Header(e.to_string()))?;
    if header.magic != MAGIC {
        return Err(PersistError::Header(format!(
            "unrecognized magic '{}'",
            header.magic
        )));
    }
    if header.version != VERSION {
        return Err(PersistError::Header(format!(
            "unsupported version {}",
            header.version
        )));
    }

    let mut model = Sequential::new(header.layers.iter().map(Layer::from_spec));

    let count = read_u64(&mut input)? as usize;
    let mut tensors = model.state_tensors_mut();
    if count != tensors.len() {
        return Err(PersistError::TensorCount {
            got: count,
            expected: tensors.len(),
        });
    }

    for (index, tensor) in tensors.iter_mut().enumerate() {
        let rank = read_u64(&mut input)? as usize;
        let mut shape = Vec::with_capacity(rank);
        for _ in 0..rank {
            shape.push(read_u64(&mut input)? as usize);
        }
        if shape != tensor.shape() {
            return Err(PersistError::TensorShape {
                index,
                got: shape,
                expected: tensor.shape().to_vec(),
            });
        }

        let mut bytes = vec![0u8; tensor.len() * std::mem::size_of::<f32>()];
        input.read_exact(&mut bytes)?;
        let values: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);
        for (slot, value) in tensor.iter_mut().zip(values) {
            *slot = value;
        }
    }

    Ok(model)
}

fn read_u64<R: Read>(input: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
