use crate::{
    HvxError, HvxResult,
    desc::{Request, RequestArgument},
    model::{Model, dims4},
};
use log::{info, warn};
use nnlib::TensorDef;
use std::ops::Range;

/// 请求引用的一块内存池。
pub trait RunTimePool {
    /// 池的全部字节。
    fn buffer(&mut self) -> &mut [u8];

    /// 执行结束后调用，用于把写回的数据同步给池的持有者。
    fn update(&mut self) {}
}

impl RunTimePool for Vec<u8> {
    fn buffer(&mut self) -> &mut [u8] {
        self
    }
}

/// 运行时写回的输出形状与有效字节数。
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OutputShape {
    pub dimensions: Vec<u32>,
    pub length: usize,
}

/// 一个请求参数在池中的位置。
struct Region {
    pool: usize,
    range: Range<usize>,
    dims: [u32; 4],
}

impl Region {
    fn overlaps(&self, other: &Self) -> bool {
        self.pool == other.pool
            && self.range.start < other.range.end
            && other.range.start < self.range.end
    }
}

impl Model<'_> {
    /// 执行一次推理，尚未编译的模型先编译。
    pub fn execute<P: RunTimePool>(
        &mut self,
        request: &Request,
        pools: &mut [P],
    ) -> HvxResult<Vec<OutputShape>> {
        self.compile()?;

        check_count("inputs", self.inputs.len(), request.inputs.len())?;
        check_count("outputs", self.outputs.len(), request.outputs.len())?;

        let sizes = pools.iter_mut().map(|p| p.buffer().len()).collect::<Vec<_>>();
        let inputs = self.regions(&self.inputs, &request.inputs, &sizes)?;
        let outputs = self.regions(&self.outputs, &request.outputs, &sizes)?;
        for (k, out) in outputs.iter().enumerate() {
            let aliased = inputs.iter().chain(&outputs[..k]).any(|r| r.overlaps(out));
            if aliased {
                return Err(HvxError::Request(format!("output {k} overlaps another argument")));
            }
        }

        let bases = pools
            .iter_mut()
            .map(|p| p.buffer().as_mut_ptr())
            .collect::<Vec<_>>();
        let tensor = |r: &Region| {
            // SAFETY: 区域已检查落在池内，输出区域互不重叠也不与输入重叠，
            // 池在定义存活期间被 `pools` 的独占借用锁住
            unsafe { TensorDef::from_raw(r.dims, bases[r.pool].add(r.range.start), r.range.len()) }
        };
        let input_defs = inputs.iter().map(tensor).collect::<Vec<_>>();
        let mut output_defs = outputs.iter().map(tensor).collect::<Vec<_>>();

        let result = self.lib.execute(self.graph, &input_defs, &mut output_defs);
        let shapes = output_defs
            .iter()
            .map(|def| OutputShape {
                dimensions: def.dims().to_vec(),
                length: def.data_valid_len as _,
            })
            .collect::<Vec<_>>();
        drop(input_defs);
        drop(output_defs);

        for pool in pools.iter_mut() {
            pool.update()
        }
        match result {
            Ok(()) => {
                info!("{} executed", self.graph);
                Ok(shapes)
            }
            Err(e) => {
                warn!("{} failed to execute: {e}", self.graph);
                Err(e.into())
            }
        }
    }

    fn regions(
        &self,
        operands: &[u32],
        args: &[RequestArgument],
        sizes: &[usize],
    ) -> HvxResult<Vec<Region>> {
        operands
            .iter()
            .zip(args)
            .map(|(&i, arg)| {
                let info = self.operands.get(i)?;
                // 覆盖的形状只对本次请求有效
                let dims = if arg.dimensions.is_empty() {
                    &info.dimensions
                } else {
                    &arg.dimensions
                };
                let len = dims
                    .iter()
                    .try_fold(info.ty.size(), |acc, &d| acc.checked_mul(d as usize))
                    .filter(|&len| len <= TensorDef::MAX_LEN)
                    .ok_or_else(|| {
                        HvxError::Request(format!("operand {i} of {dims:?} is too large"))
                    })?;
                let loc = arg.location;
                if loc.length != 0 && len > loc.length as usize {
                    return Err(HvxError::Request(format!(
                        "operand {i} needs {len} bytes, argument holds {}",
                        loc.length
                    )));
                }
                let pool = loc.pool_index as usize;
                let size = *sizes.get(pool).ok_or_else(|| {
                    HvxError::Request(format!("pool {pool} of {} pools", sizes.len()))
                })?;
                let start = loc.offset as usize;
                let end = start
                    .checked_add(len)
                    .filter(|&end| end <= size)
                    .ok_or_else(|| {
                        HvxError::Request(format!(
                            "operand {i} of {len} bytes at {start} exceeds pool {pool} of {size} bytes"
                        ))
                    })?;
                Ok(Region {
                    pool,
                    range: start..end,
                    dims: dims4(dims)?,
                })
            })
            .collect()
    }
}

fn check_count(what: &str, expected: usize, actual: usize) -> HvxResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(HvxError::Request(format!(
            "model takes {expected} {what}, request gives {actual}"
        )))
    }
}
