use crate::{
    Config, GraphId, NnError, NnLib, NnResult, NodeInput, NodeOutput, OpType, Padding, TensorDef,
    c_str,
};
use libloading::Library;
use log::{debug, info, warn};
use std::ffi::{CString, c_char, c_int, c_uint};

type InitFn = unsafe extern "C" fn() -> GraphId;
type GraphFn = unsafe extern "C" fn(GraphId) -> c_int;
type BufferFn = unsafe extern "C" fn(GraphId, *mut u8, c_uint) -> c_int;
type DebugLevelFn = unsafe extern "C" fn(GraphId, c_int) -> c_int;
type AppendNodeFn = unsafe extern "C" fn(
    GraphId,
    c_uint,
    c_uint,
    c_uint,
    *const NodeInput,
    c_uint,
    *const NodeOutput,
    c_uint,
) -> c_int;
type AppendConstNodeFn =
    unsafe extern "C" fn(GraphId, c_uint, c_uint, c_uint, c_uint, c_uint, *const u8, c_uint) -> c_int;
type ExecuteFn = unsafe extern "C" fn(
    GraphId,
    *const TensorDef<'static>,
    c_uint,
    *mut TensorDef<'static>,
    c_uint,
) -> c_int;
type PerfInfoFn = unsafe extern "C" fn(GraphId, *mut PerfInfo, c_uint, *mut c_uint) -> c_int;
type ResetPerfInfoFn = unsafe extern "C" fn(GraphId, c_uint) -> c_int;
type VersionFn = unsafe extern "C" fn(*mut c_int) -> c_int;
type CyclesFn = unsafe extern "C" fn(GraphId, *mut c_uint, *mut c_uint) -> c_int;
type NameToIdFn = unsafe extern "C" fn(*const c_char, *mut c_uint) -> c_int;
type IdToNameFn = unsafe extern "C" fn(c_uint, *mut c_char, c_int) -> c_int;
type VoidFn = unsafe extern "C" fn() -> c_int;
type PowerSaveFn = unsafe extern "C" fn(c_uint) -> c_int;

/// 节点性能计数。
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
#[repr(C)]
pub struct PerfInfo {
    pub node_id: u32,
    pub executions: u32,
    pub counter_lo: u32,
    pub counter_hi: u32,
}

impl PerfInfo {
    pub const fn counter(&self) -> u64 {
        (self.counter_hi as u64) << 32 | self.counter_lo as u64
    }
}

macro_rules! symbols {
    ($($field:ident: $ty:ty = $name:literal;)+) => {
        #[derive(Default)]
        struct Symbols {
            $($field: Option<$ty>,)+
        }

        /// 各符号去掉 `hexagon_nn_controller_` 前缀后的导出名。
        struct Names {
            $($field: &'static str,)+
        }

        const NAMES: Names = Names {
            $($field: $name,)+
        };

        impl Symbols {
            fn resolve(lib: &Library) -> Self {
                Self {
                    $($field: load_symbol(lib, $name),)+
                }
            }

            fn missing(&self) -> Vec<&'static str> {
                let mut ans = Vec::new();
                $(
                    if self.$field.is_none() {
                        ans.push($name)
                    }
                )+
                ans
            }
        }
    };
}

symbols! {
    init                      : InitFn            = "init";
    getlog                    : BufferFn          = "getlog";
    snpprint                  : BufferFn          = "snpprint";
    set_debug_level           : DebugLevelFn      = "set_debug_level";
    prepare                   : GraphFn           = "prepare";
    append_node               : AppendNodeFn      = "append_node";
    append_const_node         : AppendConstNodeFn = "append_const_node";
    execute_new               : ExecuteFn         = "execute_new";
    teardown                  : GraphFn           = "teardown";
    get_perfinfo              : PerfInfoFn        = "get_perfinfo";
    reset_perfinfo            : ResetPerfInfoFn   = "reset_perfinfo";
    version                   : VersionFn         = "version";
    last_execution_cycles     : CyclesFn          = "last_execution_cycles";
    get_hexagon_binary_version: VersionFn         = "GetHexagonBinaryVersion";
    op_name_to_id             : NameToIdFn        = "op_name_to_id";
    op_id_to_name             : IdToNameFn        = "op_id_to_name";
    disable_dcvs              : VoidFn            = "disable_dcvs";
    set_powersave_level       : PowerSaveFn       = "set_powersave_level";
    config                    : VoidFn            = "config";
}

fn load_symbol<T: Copy>(lib: &Library, name: &str) -> Option<T> {
    let symbol = format!("hexagon_nn_controller_{name}\0");
    // SAFETY: T 与该符号的 C 签名一致
    match unsafe { lib.get::<T>(symbol.as_bytes()) } {
        Ok(f) => Some(*f),
        Err(e) => {
            debug!("hexagon_nn_controller_{name} unresolved: {e}");
            None
        }
    }
}

fn check(call: &'static str, status: c_int) -> NnResult<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(NnError::Status { call, status })
    }
}

macro_rules! call {
    ($self:ident.$field:ident($($arg:expr),*)) => {{
        let f = $self.symbols.$field.ok_or(NnError::Missing(NAMES.$field))?;
        // SAFETY: 符号来自仍处于加载状态的库，参数满足其 C 接口约定
        let status = unsafe { f($($arg),*) };
        check(NAMES.$field, status)
    }};
}

/// 动态加载的 hexagon_nn 控制库。
///
/// 每个符号单独解析，缺失的符号只影响对应的调用。
#[derive(Default)]
pub struct Controller {
    symbols: Symbols,
    lib: Option<Library>,
    config: Config,
}

impl Controller {
    pub fn open(config: &Config) -> NnResult<Self> {
        let path = &config.library;
        // SAFETY: 加载厂商库会执行其初始化代码
        let lib = unsafe { Library::new(path) }.map_err(|e| NnError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let symbols = Symbols::resolve(&lib);
        let missing = symbols.missing();
        if missing.is_empty() {
            info!("loaded {}", path.display())
        } else {
            warn!(
                "loaded {} without {}",
                path.display(),
                missing.join(", ")
            )
        }

        Ok(Self {
            symbols,
            lib: Some(lib),
            config: config.clone(),
        })
    }

    pub fn is_open(&self) -> bool {
        self.lib.is_some()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 清空所有符号并卸载库。
    pub fn close(&mut self) {
        self.symbols = Symbols::default();
        if self.lib.take().is_some() {
            info!("unloaded {}", self.config.library.display())
        }
    }

    /// 以原配置重新加载库。
    pub fn reopen(&mut self) -> NnResult<()> {
        self.close();
        *self = Self::open(&self.config)?;
        Ok(())
    }

    pub fn perf_info(&self, graph: GraphId, capacity: usize) -> NnResult<Vec<PerfInfo>> {
        let mut info = vec![PerfInfo::default(); capacity];
        let mut n: c_uint = 0;
        call!(self.get_perfinfo(graph, info.as_mut_ptr(), capacity as _, &mut n))?;
        info.truncate(n as _);
        Ok(info)
    }

    pub fn reset_perf_info(&self, graph: GraphId, event: u32) -> NnResult<()> {
        call!(self.reset_perfinfo(graph, event))
    }

    pub fn last_execution_cycles(&self, graph: GraphId) -> NnResult<u64> {
        let mut lo: c_uint = 0;
        let mut hi: c_uint = 0;
        call!(self.last_execution_cycles(graph, &mut lo, &mut hi))?;
        Ok((hi as u64) << 32 | lo as u64)
    }

    pub fn binary_version(&self) -> NnResult<i32> {
        let mut ver: c_int = 0;
        call!(self.get_hexagon_binary_version(&mut ver))?;
        Ok(ver)
    }

    pub fn op_id_to_name(&self, id: u32) -> NnResult<String> {
        let mut buf = [0u8; 64];
        call!(self.op_id_to_name(id, buf.as_mut_ptr().cast(), buf.len() as _))?;
        Ok(c_str(&buf))
    }

    pub fn disable_dcvs(&self) -> NnResult<()> {
        call!(self.disable_dcvs())
    }

    pub fn set_powersave_level(&self, level: u32) -> NnResult<()> {
        call!(self.set_powersave_level(level))
    }

    pub fn configure(&self) -> NnResult<()> {
        call!(self.config())
    }
}

impl NnLib for Controller {
    fn init(&self) -> NnResult<GraphId> {
        let f = self.symbols.init.ok_or(NnError::Missing(NAMES.init))?;
        // SAFETY: 无参数调用
        let graph = unsafe { f() };
        if graph.is_valid() {
            Ok(graph)
        } else {
            Err(NnError::InvalidGraph(graph))
        }
    }

    fn set_debug_level(&self, graph: GraphId, level: i32) -> NnResult<()> {
        call!(self.set_debug_level(graph, level))
    }

    fn append_node(
        &self,
        graph: GraphId,
        node: u32,
        op: OpType,
        padding: Padding,
        inputs: &[NodeInput],
        outputs: &[NodeOutput],
    ) -> NnResult<()> {
        call!(self.append_node(
            graph,
            node,
            op.id(),
            padding as _,
            inputs.as_ptr(),
            inputs.len() as _,
            outputs.as_ptr(),
            outputs.len() as _
        ))
    }

    fn append_const_node(
        &self,
        graph: GraphId,
        node: u32,
        dims: [u32; 4],
        data: &[u8],
    ) -> NnResult<()> {
        let [b, h, w, d] = dims;
        call!(self.append_const_node(graph, node, b, h, w, d, data.as_ptr(), data.len() as _))
    }

    fn prepare(&self, graph: GraphId) -> NnResult<()> {
        call!(self.prepare(graph))
    }

    fn execute(
        &self,
        graph: GraphId,
        inputs: &[TensorDef],
        outputs: &mut [TensorDef],
    ) -> NnResult<()> {
        call!(self.execute_new(
            graph,
            inputs.as_ptr().cast(),
            inputs.len() as _,
            outputs.as_mut_ptr().cast(),
            outputs.len() as _
        ))
    }

    fn teardown(&self, graph: GraphId) -> NnResult<()> {
        call!(self.teardown(graph))
    }

    fn getlog(&self, graph: GraphId, buf: &mut [u8]) -> NnResult<()> {
        call!(self.getlog(graph, buf.as_mut_ptr(), buf.len() as _))
    }

    fn snpprint(&self, graph: GraphId, buf: &mut [u8]) -> NnResult<()> {
        call!(self.snpprint(graph, buf.as_mut_ptr(), buf.len() as _))
    }

    fn version(&self) -> NnResult<i32> {
        let mut ver: c_int = 0;
        call!(self.version(&mut ver))?;
        Ok(ver)
    }

    fn op_name_to_id(&self, name: &str) -> NnResult<u32> {
        let name = CString::new(name).map_err(|_| NnError::OpName(name.into()))?;
        let mut id: c_uint = 0;
        call!(self.op_name_to_id(name.as_ptr(), &mut id))?;
        Ok(id)
    }
}
