use crate::Node;
use itertools::izip;
use nnlib::{NodeInput, OpType, TensorDef};
use std::collections::HashMap;

#[derive(Clone, Debug)]
struct Value {
    dims: [u32; 4],
    bytes: Vec<u8>,
}

impl Value {
    fn from_f32(dims: [u32; 4], data: impl IntoIterator<Item = f32>) -> Self {
        Self {
            dims,
            bytes: data.into_iter().flat_map(f32::to_le_bytes).collect(),
        }
    }

    fn f32s(&self) -> Vec<f32> {
        f32s(&self.bytes)
    }

    fn scalar(&self) -> Result<f32, String> {
        self.f32s()
            .first()
            .copied()
            .ok_or_else(|| "empty scalar".to_string())
    }
}

pub(crate) fn f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn i32s(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn numel(dims: &[u32; 4]) -> usize {
    dims.iter().product::<u32>() as _
}

/// 按追加顺序解释执行节点。
pub(crate) fn run(
    nodes: &[Node],
    inputs: &[TensorDef],
    outputs: &mut [TensorDef],
) -> Result<(), String> {
    let mut values = HashMap::<u32, Vec<Value>>::new();
    let get = |values: &HashMap<u32, Vec<Value>>, input: &NodeInput| {
        values
            .get(&input.src_id)
            .and_then(|slots| slots.get(input.output_idx as usize))
            .cloned()
            .ok_or_else(|| format!("{input} is not computed"))
    };

    for node in nodes {
        let args = node
            .inputs
            .iter()
            .map(|input| get(&values, input))
            .collect::<Result<Vec<_>, _>>()?;

        let results = match node.op {
            OpType::INPUT => {
                if inputs.len() != node.outputs.len() {
                    return Err(format!(
                        "graph takes {} inputs, got {}",
                        node.outputs.len(),
                        inputs.len()
                    ));
                }
                inputs
                    .iter()
                    .map(|t| Value {
                        dims: t.dims(),
                        bytes: t.bytes().to_vec(),
                    })
                    .collect()
            }
            OpType::OUTPUT => {
                if outputs.len() != args.len() {
                    return Err(format!(
                        "graph gives {} outputs, got {} buffers",
                        args.len(),
                        outputs.len()
                    ));
                }
                for (value, out) in izip!(&args, outputs.iter_mut()) {
                    if value.bytes.len() > out.len() {
                        return Err(format!(
                            "output needs {} bytes, buffer has {}",
                            value.bytes.len(),
                            out.len()
                        ));
                    }
                    out.bytes_mut()[..value.bytes.len()].copy_from_slice(&value.bytes);
                    [out.batches, out.height, out.width, out.depth] = value.dims;
                    out.data_valid_len = value.bytes.len() as _;
                }
                vec![]
            }
            OpType::Const => {
                let mut dims = [1; 4];
                dims.copy_from_slice(node.outputs[0].dims());
                vec![Value {
                    dims,
                    bytes: node.data.clone(),
                }]
            }
            OpType::Nop => args,
            OpType::Add_f => vec![binary(&args, |a, b| a + b)?],
            OpType::Mul_f => vec![binary(&args, |a, b| a * b)?],
            OpType::BiasAdd_f => {
                let [x, bias] = &args[..] else {
                    return Err("BiasAdd_f takes 2 inputs".into());
                };
                let bias = bias.f32s();
                if bias.is_empty() {
                    return Err("empty bias".into());
                }
                let data = x.f32s();
                let y = data
                    .iter()
                    .enumerate()
                    .map(|(i, v)| v + bias[i % bias.len()]);
                vec![Value::from_f32(x.dims, y)]
            }
            OpType::Relu_f => vec![unary(&args, |x| x.max(0.))?],
            OpType::ReluX_f => {
                let max = args.get(1).ok_or("ReluX_f takes 2 inputs")?.scalar()?;
                vec![unary(&args, |x| x.clamp(0., max))?]
            }
            OpType::Clamp_f => {
                let min = args.get(1).ok_or("Clamp_f takes 3 inputs")?.scalar()?;
                let max = args.get(2).ok_or("Clamp_f takes 3 inputs")?.scalar()?;
                vec![unary(&args, |x| x.clamp(min, max))?]
            }
            OpType::Sigmoid_f => vec![unary(&args, |x| 1. / (1. + (-x).exp()))?],
            OpType::Tanh_f => vec![unary(&args, f32::tanh)?],
            OpType::Reshape => {
                let [x, shape] = &args[..] else {
                    return Err("Reshape takes 2 inputs".into());
                };
                vec![reshape(x, &i32s(&shape.bytes))?]
            }
            OpType::MatMul_f => {
                let [a, b] = &args[..] else {
                    return Err("MatMul_f takes 2 inputs".into());
                };
                vec![matmul(a, b)?]
            }
            op => return Err(format!("{op} is not interpreted")),
        };
        values.insert(node.id, results);
    }
    Ok(())
}

fn unary(args: &[Value], f: impl Fn(f32) -> f32) -> Result<Value, String> {
    let x = args.first().ok_or("missing operand")?;
    Ok(Value::from_f32(x.dims, x.f32s().into_iter().map(f)))
}

fn binary(args: &[Value], f: impl Fn(f32, f32) -> f32) -> Result<Value, String> {
    let [a, b] = args else {
        return Err(format!("binary op takes 2 inputs, got {}", args.len()));
    };
    let (x, y) = (a.f32s(), b.f32s());
    let (dims, data) = if x.len() == y.len() {
        (a.dims, izip!(&x, &y).map(|(&x, &y)| f(x, y)).collect::<Vec<_>>())
    } else if y.len() == 1 {
        (a.dims, x.iter().map(|&x| f(x, y[0])).collect())
    } else if x.len() == 1 {
        (b.dims, y.iter().map(|&y| f(x[0], y)).collect())
    } else {
        return Err(format!("cannot broadcast {:?} with {:?}", a.dims, b.dims));
    };
    Ok(Value::from_f32(dims, data))
}

fn reshape(x: &Value, shape: &[i32]) -> Result<Value, String> {
    if shape.len() > 4 {
        return Err(format!("rank of {shape:?} exceeds 4"));
    }
    let total = numel(&x.dims) as i64;
    let known = shape.iter().filter(|&&d| d >= 0).map(|&d| d as i64).product::<i64>();
    let mut dims = [1u32; 4];
    for (dst, &d) in dims[4 - shape.len()..].iter_mut().zip(shape) {
        *dst = if d < 0 {
            if known == 0 {
                return Err("cannot infer wildcard".into());
            }
            (total / known) as _
        } else {
            d as _
        }
    }
    if numel(&dims) as i64 != total {
        return Err(format!("cannot reshape {:?} to {shape:?}", x.dims));
    }
    Ok(Value {
        dims,
        bytes: x.bytes.clone(),
    })
}

fn matmul(a: &Value, b: &Value) -> Result<Value, String> {
    let [_, _, k, n] = b.dims.map(|d| d as usize);
    let depth = a.dims[3] as usize;
    if depth != k {
        return Err(format!("cannot multiply {:?} by {:?}", a.dims, b.dims));
    }
    let m = numel(&a.dims) / k;
    let (x, w) = (a.f32s(), b.f32s());
    let mut y = vec![0.; m * n];
    for i in 0..m {
        for j in 0..n {
            y[i * n + j] = (0..k).map(|l| x[i * k + l] * w[l * n + j]).sum();
        }
    }
    Ok(Value::from_f32([1, 1, m as _, n as _], y))
}
