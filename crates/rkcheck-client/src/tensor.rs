use std::fmt;

use anyhow::{bail, ensure, Result};
use bytes::Bytes;
use rand::Rng;
use smallvec::SmallVec;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DType {
    F32,
    F16,
    I64,
    I32,
    I8,
    U8,
}

impl DType {
    /// Wire name used by the v2 inference protocol.
    pub fn triton_name(&self) -> &'static str {
        match self {
            DType::F32 => "FP32",
            DType::F16 => "FP16",
            DType::I64 => "INT64",
            DType::I32 => "INT32",
            DType::I8 => "INT8",
            DType::U8 => "UINT8",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(match raw {
            "FP32" => DType::F32,
            "FP16" => DType::F16,
            "INT64" => DType::I64,
            "INT32" => DType::I32,
            "INT8" => DType::I8,
            "UINT8" => DType::U8,
            other => bail!("unsupported datatype: {other}"),
        })
    }

    pub fn byte_size(&self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 => 2,
            DType::I64 => 8,
            DType::I8 | DType::U8 => 1,
        }
    }
}

/// Tensor dims as the wire carries them (signed, row-major).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shape(pub SmallVec<[i64; 6]>);

impl Shape {
    pub fn from_slice(d: &[i64]) -> Self {
        Self(d.iter().copied().collect())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn numel(&self) -> usize {
        self.0
            .iter()
            .map(|d| usize::try_from(*d).unwrap_or(0))
            .product::<usize>()
            .max(1)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, ")")
    }
}

/// One named input tensor, ready to send. Storage is CPU bytes only;
/// the server side owns device placement.
#[derive(Clone, Debug)]
pub struct InferInput {
    pub name: String,
    pub dtype: DType,
    pub shape: Shape,
    pub data: Bytes,
}

impl InferInput {
    pub fn new(name: impl Into<String>, dtype: DType, shape: Shape, data: Bytes) -> Result<Self> {
        let expected = shape.numel() * dtype.byte_size();
        ensure!(
            data.len() == expected,
            "input data is {} bytes, shape {} with dtype {} needs {}",
            data.len(),
            shape,
            dtype.triton_name(),
            expected
        );
        Ok(Self {
            name: name.into(),
            dtype,
            shape,
            data,
        })
    }
}

/// Uniform random INT8 payload with values in [0, upper). The bound is a
/// byte so a full [0, 128) range stays representable.
pub fn random_i8_image(shape: &Shape, upper: u8) -> Bytes {
    let mut rng = rand::thread_rng();
    let data: Vec<u8> = (0..shape.numel())
        .map(|_| rng.gen_range(0..upper))
        .collect();
    Bytes::from(data)
}
