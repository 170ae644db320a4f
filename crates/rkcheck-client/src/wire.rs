//! KServe v2 HTTP inference protocol: JSON headers plus the binary tensor
//! extension. Requests always ship input payloads in the binary region;
//! responses are accepted either as pure JSON or with binary outputs.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tensor::{DType, InferInput, Shape};

/// Header naming the length of the JSON part of a mixed JSON+binary body.
pub const INFER_HEADER_LEN: &str = "Inference-Header-Content-Length";

#[derive(Debug, Serialize)]
struct InferRequestHeader<'a> {
    inputs: Vec<WireInput<'a>>,
}

#[derive(Debug, Serialize)]
struct WireInput<'a> {
    name: &'a str,
    shape: &'a [i64],
    datatype: &'static str,
    parameters: BinaryParams,
}

#[derive(Debug, Serialize)]
struct BinaryParams {
    binary_data_size: usize,
}

/// Builds the request body: JSON header followed by each input's raw bytes
/// in declaration order. Returns the body and the JSON header length, which
/// the caller must send as `Inference-Header-Content-Length`.
pub fn encode_request(inputs: &[InferInput]) -> Result<(Vec<u8>, usize)> {
    let header = InferRequestHeader {
        inputs: inputs
            .iter()
            .map(|input| WireInput {
                name: &input.name,
                shape: input.shape.0.as_slice(),
                datatype: input.dtype.triton_name(),
                parameters: BinaryParams {
                    binary_data_size: input.data.len(),
                },
            })
            .collect(),
    };

    let mut body = serde_json::to_vec(&header).context("failed to encode request header")?;
    let header_len = body.len();
    for input in inputs {
        body.extend_from_slice(&input.data);
    }
    Ok((body, header_len))
}

#[derive(Clone, Debug, Deserialize)]
pub struct InferResponseHeader {
    pub model_name: String,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub outputs: Vec<WireOutput>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WireOutput {
    pub name: String,
    pub datatype: String,
    pub shape: Vec<i64>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub parameters: Option<OutputParams>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OutputParams {
    #[serde(default)]
    pub binary_data_size: Option<usize>,
}

/// Error body the server sends with non-2xx statuses.
#[derive(Clone, Debug, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// One fully decoded named output.
#[derive(Clone, Debug)]
pub struct OutputTensor {
    pub name: String,
    pub dtype: DType,
    pub shape: Shape,
    pub data: Bytes,
}

/// Decodes a response body. `json_len` is the value of
/// `Inference-Header-Content-Length` when the server used the binary
/// extension; absent, the whole body is the JSON header.
pub fn decode_response(
    body: Bytes,
    json_len: Option<usize>,
) -> Result<(InferResponseHeader, Vec<OutputTensor>)> {
    let json_len = json_len.unwrap_or(body.len());
    if json_len > body.len() {
        bail!(
            "response header length {json_len} exceeds body length {}",
            body.len()
        );
    }

    let header: InferResponseHeader =
        serde_json::from_slice(&body[..json_len]).context("malformed inference response header")?;

    let mut cursor = json_len;
    let mut outputs = Vec::with_capacity(header.outputs.len());
    for out in &header.outputs {
        let dtype = DType::parse(&out.datatype)
            .with_context(|| format!("output '{}' has a bad datatype", out.name))?;
        let shape = Shape::from_slice(&out.shape);

        let data = match out.parameters.as_ref().and_then(|p| p.binary_data_size) {
            Some(len) => {
                if cursor + len > body.len() {
                    bail!("binary region for output '{}' overruns the body", out.name);
                }
                let slice = body.slice(cursor..cursor + len);
                cursor += len;
                slice
            }
            None => {
                let values = out.data.as_ref().with_context(|| {
                    format!("output '{}' has neither JSON data nor a binary region", out.name)
                })?;
                json_data_to_bytes(dtype, values)
                    .with_context(|| format!("bad JSON data for output '{}'", out.name))?
            }
        };

        let expected = shape.numel() * dtype.byte_size();
        if data.len() != expected {
            bail!(
                "output '{}' is {} bytes, shape {} with dtype {} needs {}",
                out.name,
                data.len(),
                shape,
                dtype.triton_name(),
                expected
            );
        }

        outputs.push(OutputTensor {
            name: out.name.clone(),
            dtype,
            shape,
            data,
        });
    }

    Ok((header, outputs))
}

// The protocol allows "data" to be flat or nested; flatten row-major.
fn json_data_to_bytes(dtype: DType, values: &Value) -> Result<Bytes> {
    let mut buf = Vec::new();
    push_values(dtype, values, &mut buf)?;
    Ok(Bytes::from(buf))
}

fn push_values(dtype: DType, value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Array(items) => {
            for item in items {
                push_values(dtype, item, buf)?;
            }
            Ok(())
        }
        scalar => push_scalar(dtype, scalar, buf),
    }
}

fn push_scalar(dtype: DType, value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match dtype {
        DType::F32 => {
            let v = value.as_f64().context("expected a number")?;
            buf.extend_from_slice(&(v as f32).to_le_bytes());
        }
        DType::F16 => bail!("FP16 outputs are only supported via the binary extension"),
        DType::I64 => {
            let v = value.as_i64().context("expected an integer")?;
            buf.extend_from_slice(&v.to_le_bytes());
        }
        DType::I32 => {
            let v = value.as_i64().context("expected an integer")?;
            let v = i32::try_from(v).context("value out of range for INT32")?;
            buf.extend_from_slice(&v.to_le_bytes());
        }
        DType::I8 => {
            let v = value.as_i64().context("expected an integer")?;
            let v = i8::try_from(v).context("value out of range for INT8")?;
            buf.push(v as u8);
        }
        DType::U8 => {
            let v = value.as_u64().context("expected an unsigned integer")?;
            let v = u8::try_from(v).context("value out of range for UINT8")?;
            buf.push(v);
        }
    }
    Ok(())
}
