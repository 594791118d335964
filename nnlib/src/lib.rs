mod config;
mod controller;
mod op;

use std::{fmt, marker::PhantomData, slice};
use thiserror::Error;

pub use config::Config;
pub use controller::{Controller, PerfInfo};
pub use op::{OpType, Padding};

/// 运行时图标识符，`0` 表示无效。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug)]
#[repr(transparent)]
pub struct GraphId(pub i32);

impl GraphId {
    pub const INVALID: Self = Self(0);

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph#{:x}", self.0)
    }
}

/// 对某个节点某个输出槽的引用，全零表示未绑定。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug)]
#[repr(C)]
pub struct NodeInput {
    pub src_id: u32,
    pub output_idx: u32,
}

impl NodeInput {
    pub const fn new(src_id: u32, output_idx: u32) -> Self {
        Self { src_id, output_idx }
    }

    pub const fn is_bound(&self) -> bool {
        self.src_id != 0 || self.output_idx != 0
    }
}

impl fmt::Display for NodeInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}:{}", self.src_id, self.output_idx)
    }
}

pub const MAX_RANK: usize = 8;

/// 节点输出的形状与元素描述。
#[derive(Clone, Copy, PartialEq, Default, Debug)]
#[repr(C)]
pub struct NodeOutput {
    pub rank: u32,
    pub max_sizes: [u32; MAX_RANK],
    pub elementsize: u32,
    pub zero_offset: i32,
    pub stepsize: f32,
}

impl NodeOutput {
    /// 按 4 维对齐 `dims` 构造输出描述。
    pub fn new(dims: &[u32], elementsize: u32) -> NnResult<Self> {
        let aligned = aligned_dims(dims, 4)?;
        let rank = aligned.len().min(MAX_RANK);
        let mut max_sizes = [0; MAX_RANK];
        max_sizes[..rank].copy_from_slice(&aligned[..rank]);
        Ok(Self {
            rank: rank as _,
            max_sizes,
            elementsize,
            zero_offset: 0,
            stepsize: 0.,
        })
    }

    /// 单元素输出，用于量化节点附带的 min/max。
    pub fn scalar(elementsize: u32) -> Self {
        let mut max_sizes = [0; MAX_RANK];
        max_sizes[..4].fill(1);
        Self {
            rank: 4,
            max_sizes,
            elementsize,
            zero_offset: 0,
            stepsize: 0.,
        }
    }

    pub fn dims(&self) -> &[u32] {
        &self.max_sizes[..self.rank as usize]
    }
}

/// 执行时传给运行时的张量，借用调用方的缓冲区。
#[derive(Debug)]
#[repr(C)]
pub struct TensorDef<'a> {
    pub batches: u32,
    pub height: u32,
    pub width: u32,
    pub depth: u32,
    data: *mut u8,
    data_len: i32,
    pub data_valid_len: u32,
    unused: u32,
    _buf: PhantomData<&'a mut [u8]>,
}

impl<'a> TensorDef<'a> {
    /// 运行时以 32 位有符号数记录缓冲区长度。
    pub const MAX_LEN: usize = i32::MAX as usize;

    pub fn input(dims: [u32; 4], data: &'a [u8]) -> Self {
        // SAFETY: 区域来自一个存活 'a 的切片，运行时只读输入
        unsafe { Self::from_raw(dims, data.as_ptr().cast_mut(), data.len()) }
    }

    pub fn output(dims: [u32; 4], data: &'a mut [u8]) -> Self {
        // SAFETY: 区域来自一个存活 'a 的独占切片
        unsafe { Self::from_raw(dims, data.as_mut_ptr(), data.len()) }
    }

    /// # Safety
    ///
    /// `data..data + len` 必须在 `'a` 内有效，且不与其他存活的可变借用重叠。
    /// 超过 [`Self::MAX_LEN`] 的部分不会交给运行时。
    pub unsafe fn from_raw(dims: [u32; 4], data: *mut u8, len: usize) -> Self {
        let len = len.min(Self::MAX_LEN);
        let [batches, height, width, depth] = dims;
        Self {
            batches,
            height,
            width,
            depth,
            data,
            data_len: len as _,
            data_valid_len: len as _,
            unused: 0,
            _buf: PhantomData,
        }
    }

    pub const fn dims(&self) -> [u32; 4] {
        [self.batches, self.height, self.width, self.depth]
    }

    pub const fn len(&self) -> usize {
        self.data_len as _
    }

    pub const fn is_empty(&self) -> bool {
        self.data_len == 0
    }

    pub fn bytes(&self) -> &[u8] {
        // SAFETY: 构造时保证区域有效
        unsafe { slice::from_raw_parts(self.data, self.len()) }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: 构造时保证区域有效且独占
        unsafe { slice::from_raw_parts_mut(self.data, self.len()) }
    }
}

#[derive(Error, Clone, PartialEq, Eq, Debug)]
pub enum NnError {
    #[error("hexagon_nn_controller_{0} is not loaded")]
    Missing(&'static str),
    #[error("hexagon_nn_controller_{call} returned {status}")]
    Status { call: &'static str, status: i32 },
    #[error("cannot load {path}: {reason}")]
    Load { path: String, reason: String },
    #[error("runtime returned invalid {0}")]
    InvalidGraph(GraphId),
    #[error("rank {rank} exceeds alignment of {max}")]
    Rank { rank: usize, max: usize },
    #[error("invalid op name {0:?}")]
    OpName(String),
}

pub type NnResult<T> = Result<T, NnError>;

/// hexagon_nn 运行时的控制接口。
pub trait NnLib {
    /// 创建一个空图，返回图标识符。
    fn init(&self) -> NnResult<GraphId>;

    /// 设置图的调试输出等级。
    fn set_debug_level(&self, graph: GraphId, level: i32) -> NnResult<()>;

    /// 向图中追加一个计算节点，`node` 由调用方分配且不为 0。
    fn append_node(
        &self,
        graph: GraphId,
        node: u32,
        op: OpType,
        padding: Padding,
        inputs: &[NodeInput],
        outputs: &[NodeOutput],
    ) -> NnResult<()>;

    /// 向图中追加一个常量节点，数据按 `dims` 排布并被运行时复制。
    fn append_const_node(
        &self,
        graph: GraphId,
        node: u32,
        dims: [u32; 4],
        data: &[u8],
    ) -> NnResult<()>;

    /// 完成构图，此后图不可再修改。
    fn prepare(&self, graph: GraphId) -> NnResult<()>;

    /// 执行已准备的图，运行时写回输出张量的数据与实际形状。
    fn execute(
        &self,
        graph: GraphId,
        inputs: &[TensorDef],
        outputs: &mut [TensorDef],
    ) -> NnResult<()>;

    /// 销毁图。
    fn teardown(&self, graph: GraphId) -> NnResult<()>;

    /// 读取调试日志，以 NUL 结尾写入 `buf`。
    fn getlog(&self, graph: GraphId, buf: &mut [u8]) -> NnResult<()>;

    /// 读取图结构的文本转储，以 NUL 结尾写入 `buf`。
    fn snpprint(&self, graph: GraphId, buf: &mut [u8]) -> NnResult<()>;

    fn version(&self) -> NnResult<i32>;

    fn op_name_to_id(&self, name: &str) -> NnResult<u32>;
}

/// 与本绑定匹配的运行时版本。
pub const EXPECTED_VERSION: i32 = 92;

/// 运行时可用且版本匹配。
pub fn is_available(lib: &(impl NnLib + ?Sized)) -> bool {
    lib.version() == Ok(EXPECTED_VERSION)
}

/// 在 `dims` 前补 1 直到长度为 `n`。
pub fn aligned_dims(dims: &[u32], n: usize) -> NnResult<Vec<u32>> {
    if dims.len() > n {
        return Err(NnError::Rank {
            rank: dims.len(),
            max: n,
        });
    }
    let mut ans = vec![1; n - dims.len()];
    ans.extend_from_slice(dims);
    Ok(ans)
}

/// 取 `buf` 中第一个 NUL 之前的文本。
pub fn c_str(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}
