use crate::{
    HvxError, HvxResult,
    compile::CompileState,
    desc::{Element, FusedActivation, ModelDesc, OperandLifeTime, Operation, to_bytes},
    layout::transpose,
    operand::Operands,
    shape::Shape,
};
use log::{debug, warn};
use nnlib::{Config, GraphId, NnError, NnLib, NodeInput, NodeOutput, OpType, Padding};
use std::sync::Arc;

/// 一个模型与它在运行时中的图。
pub struct Model<'lib> {
    pub(crate) lib: &'lib dyn NnLib,
    pub(crate) config: Config,
    pub(crate) graph: GraphId,
    pub(crate) next_node: u32,
    pub(crate) operands: Operands,
    pub(crate) operations: Arc<[Operation]>,
    pub(crate) inputs: Vec<u32>,
    pub(crate) outputs: Vec<u32>,
    pub(crate) state: CompileState,
}

/// 融合激活对应的节点类型与附加参数。
pub(crate) struct Activation {
    pub op: OpType,
    pub args: Vec<NodeInput>,
}

impl<'lib> Model<'lib> {
    pub fn new(lib: &'lib dyn NnLib, desc: &ModelDesc) -> HvxResult<Self> {
        Self::with_config(lib, desc, Config::default())
    }

    pub fn with_config(lib: &'lib dyn NnLib, desc: &ModelDesc, config: Config) -> HvxResult<Self> {
        let operands = Operands::from_desc(desc)?;
        let n = operands.len() as u32;
        let indices = desc
            .operations
            .iter()
            .flat_map(|op| op.inputs.iter().chain(&op.outputs))
            .chain(&desc.input_indexes)
            .chain(&desc.output_indexes);
        for &i in indices {
            if i >= n {
                return Err(HvxError::OperandIndex(i));
            }
        }

        let graph = init_graph(lib, &config)?;
        Ok(Self {
            lib,
            config,
            graph,
            next_node: 0,
            operands,
            operations: desc.operations.clone().into(),
            inputs: desc.input_indexes.clone(),
            outputs: desc.output_indexes.clone(),
            state: CompileState::Unbuilt,
        })
    }

    pub const fn graph(&self) -> GraphId {
        self.graph
    }

    pub const fn state(&self) -> CompileState {
        self.state
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn operands(&self) -> &Operands {
        &self.operands
    }

    pub fn shape(&self, i: u32) -> HvxResult<Shape> {
        self.operands.shape(i)
    }

    /// 把操作数改为常量，已构建的图会被重置。
    pub fn set_constant(&mut self, i: u32, data: impl Into<Arc<[u8]>>) -> HvxResult<()> {
        self.operands.set_constant(i, data)?;
        if self.next_node > 0 {
            self.reset()?
        }
        Ok(())
    }

    /// 销毁当前图并换一个空图，清除所有已记忆的节点。
    pub fn reset(&mut self) -> HvxResult<()> {
        warn!("reset {}", self.graph);
        let old = std::mem::replace(&mut self.graph, GraphId::INVALID);
        teardown(self.lib, old);
        self.next_node = 0;
        self.operands.clear_handles();
        self.state = CompileState::Unbuilt;
        self.graph = init_graph(self.lib, &self.config)?;
        Ok(())
    }
}

impl Drop for Model<'_> {
    fn drop(&mut self) {
        teardown(self.lib, self.graph)
    }
}

fn init_graph(lib: &dyn NnLib, config: &Config) -> HvxResult<GraphId> {
    let graph = lib.init()?;
    if !graph.is_valid() {
        return Err(NnError::InvalidGraph(graph).into());
    }
    if let Err(e) = lib.set_debug_level(graph, config.debug_level) {
        warn!("{graph} keeps default debug level: {e}")
    }
    debug!("{graph} created");
    Ok(graph)
}

fn teardown(lib: &dyn NnLib, graph: GraphId) {
    if graph.is_valid() {
        if let Err(e) = lib.teardown(graph) {
            warn!("failed to teardown {graph}: {e}")
        }
    }
}

/// 按 4 维对齐。
pub(crate) fn dims4(dims: &[u32]) -> HvxResult<[u32; 4]> {
    let aligned = nnlib::aligned_dims(dims, 4)?;
    Ok([aligned[0], aligned[1], aligned[2], aligned[3]])
}

// 节点构造
impl Model<'_> {
    fn next_id(&mut self) -> u32 {
        self.next_node += 1;
        self.next_node
    }

    pub(crate) fn const_node(&mut self, dims: [u32; 4], data: &[u8]) -> HvxResult<NodeInput> {
        let id = self.next_id();
        self.lib.append_const_node(self.graph, id, dims, data)?;
        debug!("{} %{id} = const {dims:?} ({} bytes)", self.graph, data.len());
        Ok(NodeInput::new(id, 0))
    }

    /// 只用形状携带参数的常量，例如窗口与步长。
    pub(crate) fn shape_node(&mut self, dims: [u32; 4]) -> HvxResult<NodeInput> {
        self.const_node(dims, &[0; 4])
    }

    pub(crate) fn values<T: Element>(&mut self, dims: [u32; 4], values: &[T]) -> HvxResult<NodeInput> {
        self.const_node(dims, &to_bytes(values))
    }

    pub(crate) fn scalar<T: Element>(&mut self, value: T) -> HvxResult<NodeInput> {
        self.values([1; 4], &[value])
    }

    /// 操作数对应的张量，常量在第一次引用时追加到图中。
    ///
    /// 省略的可选操作数得到未绑定的引用。
    pub(crate) fn tensor(&mut self, i: u32) -> HvxResult<NodeInput> {
        let info = self.operands.get(i)?;
        if info.tensor.is_bound() {
            return Ok(info.tensor);
        }
        if info.lifetime == OperandLifeTime::NoValue {
            return Ok(NodeInput::default());
        }
        let Some(data) = info.data.clone() else {
            return Err(HvxError::Unbound(i));
        };
        let dims = dims4(&info.dimensions)?;
        let node = self.const_node(dims, &data)?;
        self.operands.bind(i, node)?;
        Ok(node)
    }

    /// 量化操作数所能表示的最小值。
    pub(crate) fn quantization_min(&mut self, i: u32) -> HvxResult<NodeInput> {
        let info = self.operands.get(i)?;
        if info.min.is_bound() {
            return Ok(info.min);
        }
        let (value, max) = (info.dequantize(0), info.max);
        let min = self.scalar(value)?;
        self.operands.bind_range(i, min, max)?;
        Ok(min)
    }

    /// 量化操作数所能表示的最大值。
    pub(crate) fn quantization_max(&mut self, i: u32) -> HvxResult<NodeInput> {
        let info = self.operands.get(i)?;
        if info.max.is_bound() {
            return Ok(info.max);
        }
        let (value, min) = (info.dequantize(255), info.min);
        let max = self.scalar(value)?;
        self.operands.bind_range(i, min, max)?;
        Ok(max)
    }

    /// 量化值 `q` 在操作数量化参数下对应的实数，不记忆。
    pub(crate) fn quantization_value(&mut self, i: u32, q: i32) -> HvxResult<NodeInput> {
        let value = self.operands.get(i)?.dequantize(q);
        self.scalar(value)
    }

    /// 卷积核 `[out, h, w, in]` 转置为 `[h, w, in, out]`。
    pub(crate) fn conv_filter(&mut self, i: u32) -> HvxResult<NodeInput> {
        let info = self.operands.get(i)?;
        let [d0, d1, d2, d3] = dims4(&info.dimensions)?;
        let size = info.ty.size();
        let data = self.constant_data(i)?;
        // 数据长度已与形状核对，乘积不会溢出
        let cols = d1 as usize * d2 as usize * d3 as usize;
        let data = transpose(&data, d0 as _, cols, size);
        self.const_node([d1, d2, d3, d0], &data)
    }

    /// 深度卷积核 `[1, h, w, c * m]` 视作 `[h, w, c, m]`，数据不动。
    pub(crate) fn depthwise_filter(&mut self, i: u32, multiplier: u32) -> HvxResult<NodeInput> {
        let info = self.operands.get(i)?;
        let [d0, d1, d2, d3] = dims4(&info.dimensions)?;
        if multiplier == 0 || d3 % multiplier != 0 {
            return Err(HvxError::Data {
                operand: i,
                reason: format!("depth {d3} is not a multiple of {multiplier}"),
            });
        }
        let n = d0.checked_mul(multiplier).ok_or_else(|| HvxError::Data {
            operand: i,
            reason: format!("{d0} x {multiplier} overflows"),
        })?;
        let data = self.constant_data(i)?;
        self.const_node([d1, d2, d3 / multiplier, n], &data)
    }

    /// 全连接权重 `[units, input]` 转置为 `[input, units]`。
    pub(crate) fn fc_weights(&mut self, i: u32) -> HvxResult<NodeInput> {
        let info = self.operands.get(i)?;
        let &[units, input] = &info.dimensions[..] else {
            return Err(HvxError::Data {
                operand: i,
                reason: format!("weights {:?} are not 2D", info.dimensions),
            });
        };
        let size = info.ty.size();
        let data = self.constant_data(i)?;
        let data = transpose(&data, units as _, input as _, size);
        self.const_node([1, 1, input, units], &data)
    }

    /// 常量的全部数据，长度必须与形状一致。
    fn constant_data(&self, i: u32) -> HvxResult<Arc<[u8]>> {
        let len = self.operands.byte_len(i)?;
        let info = self.operands.get(i)?;
        let data = info.data.clone().ok_or(HvxError::Unbound(i))?;
        if data.len() != len {
            return Err(HvxError::Data {
                operand: i,
                reason: format!("expect {len} bytes, got {}", data.len()),
            });
        }
        Ok(data)
    }
}

// 激活函数
impl Model<'_> {
    fn activation_code(&self, i: u32) -> HvxResult<FusedActivation> {
        let code = self.operands.scalar::<i32>(i)?;
        FusedActivation::try_from(code).map_err(HvxError::Activation)
    }

    pub(crate) fn float_activation(&mut self, i: u32) -> HvxResult<Activation> {
        Ok(match self.activation_code(i)? {
            FusedActivation::None => Activation {
                op: OpType::Nop,
                args: vec![],
            },
            FusedActivation::Relu => Activation {
                op: OpType::Relu_f,
                args: vec![],
            },
            FusedActivation::Relu1 => Activation {
                op: OpType::Clamp_f,
                args: vec![self.scalar(-1f32)?, self.scalar(1f32)?],
            },
            FusedActivation::Relu6 => Activation {
                op: OpType::ReluX_f,
                args: vec![self.scalar(6f32)?],
            },
        })
    }

    /// 量化激活，边界按 `dst` 的量化网格取整。
    pub(crate) fn quant8_activation(&mut self, i: u32, dst: u32) -> HvxResult<Activation> {
        Ok(match self.activation_code(i)? {
            FusedActivation::None => Activation {
                op: OpType::Nop,
                args: vec![],
            },
            FusedActivation::Relu => Activation {
                op: OpType::QuantizedRelu_8,
                args: vec![],
            },
            FusedActivation::Relu1 => Activation {
                op: OpType::QuantizedClamp_8,
                args: vec![self.snapped(dst, -1.)?, self.snapped(dst, 1.)?],
            },
            FusedActivation::Relu6 => Activation {
                op: OpType::QuantizedReluX_8,
                args: vec![self.snapped(dst, 6.)?],
            },
        })
    }

    fn snapped(&mut self, dst: u32, value: f32) -> HvxResult<NodeInput> {
        let info = self.operands.get(dst)?;
        if info.scale <= 0. || !info.scale.is_finite() {
            return Err(HvxError::Data {
                operand: dst,
                reason: format!("scale {} is not positive", info.scale),
            });
        }
        let q = ((value / info.scale).round() as i32)
            .saturating_add(info.zero_point)
            .clamp(0, 255);
        self.quantization_value(dst, q)
    }
}

// 节点追加与输出登记
impl Model<'_> {
    /// 操作数作为节点输出的描述，量化张量附带 min 与 max 两个标量。
    pub(crate) fn outputs_of(&self, outs: &[u32]) -> HvxResult<Vec<NodeOutput>> {
        let mut ans = Vec::with_capacity(outs.len() * 3);
        for &i in outs {
            let info = self.operands.get(i)?;
            ans.push(NodeOutput::new(&info.dimensions, info.ty.size() as _)?);
            if info.ty.is_quant8() {
                ans.push(NodeOutput::scalar(4));
                ans.push(NodeOutput::scalar(4));
            }
        }
        Ok(ans)
    }

    /// 追加计算节点，所有输入必须已绑定。
    pub(crate) fn append(
        &mut self,
        op: OpType,
        padding: Padding,
        inputs: &[NodeInput],
        outputs: &[NodeOutput],
    ) -> HvxResult<u32> {
        if inputs.iter().any(|input| !input.is_bound()) {
            return Err(HvxError::Unwired { op });
        }
        let id = self.next_id();
        self.lib
            .append_node(self.graph, id, op, padding, inputs, outputs)?;
        debug!(
            "{} %{id} = {op}[{padding}] {} inputs -> {} outputs",
            self.graph,
            inputs.len(),
            outputs.len()
        );
        Ok(id)
    }

    /// 把 `node` 的输出依次登记给 `outs`，量化操作数连带登记 min 与 max。
    pub(crate) fn register(&mut self, node: u32, outs: &[u32]) -> HvxResult<()> {
        let mut idx = 0;
        for &i in outs {
            self.operands.bind(i, NodeInput::new(node, idx))?;
            idx += 1;
            if self.operands.get(i)?.ty.is_quant8() {
                let min = NodeInput::new(node, idx);
                let max = NodeInput::new(node, idx + 1);
                self.operands.bind_range(i, min, max)?;
                idx += 2
            }
        }
        Ok(())
    }

    pub(crate) fn basic(
        &mut self,
        op: OpType,
        padding: Padding,
        inputs: &[NodeInput],
        outs: &[u32],
    ) -> HvxResult<()> {
        let outputs = self.outputs_of(outs)?;
        let node = self.append(op, padding, inputs, &outputs)?;
        self.register(node, outs)
    }

    /// 基础节点后接激活节点，量化时激活节点取基础节点的值与范围。
    pub(crate) fn with_activation(
        &mut self,
        op: OpType,
        padding: Padding,
        inputs: &[NodeInput],
        act: Activation,
        outs: &[u32],
    ) -> HvxResult<()> {
        let outputs = self.outputs_of(outs)?;
        let base = self.append(op, padding, inputs, &outputs)?;
        // 量化输出连带 min 与 max
        let n = if outputs.len() > outs.len() { 3 } else { 1 };
        let act_inputs = (0..n)
            .map(|k| NodeInput::new(base, k))
            .chain(act.args)
            .collect::<Vec<_>>();
        let node = self.append(act.op, Padding::Na, &act_inputs, &outputs)?;
        self.register(node, outs)
    }

    /// 浮点融合算子：基础节点，可选的偏置，激活。
    pub(crate) fn fused_float(
        &mut self,
        op: OpType,
        padding: Padding,
        inputs: &[NodeInput],
        bias: NodeInput,
        act: Activation,
        outs: &[u32],
    ) -> HvxResult<()> {
        let outputs = self.outputs_of(outs)?;
        let mut prev = self.append(op, padding, inputs, &outputs)?;
        if bias.is_bound() {
            prev = self.append(
                OpType::BiasAdd_f,
                Padding::Na,
                &[NodeInput::new(prev, 0), bias],
                &outputs,
            )?
        }
        let act_inputs = [vec![NodeInput::new(prev, 0)], act.args].concat();
        let node = self.append(act.op, Padding::Na, &act_inputs, &outputs)?;
        self.register(node, outs)
    }

    /// 量化融合算子：32 位累加的基础节点，可选的 32 位偏置，
    /// 重量化到输出的范围，再在 8 位空间中激活。
    pub(crate) fn fused_quant8(
        &mut self,
        op: OpType,
        padding: Padding,
        inputs: &[NodeInput],
        bias: NodeInput,
        act: Activation,
        outs: &[u32],
    ) -> HvxResult<()> {
        let &[dst] = outs else {
            return Err(HvxError::Unwired { op });
        };
        let dims = self.operands.get(dst)?.dimensions.clone();
        let tensor32 = NodeOutput::new(&dims, 4)?;
        let out32 = [tensor32, NodeOutput::scalar(4), NodeOutput::scalar(4)];
        let out8 = [
            NodeOutput::new(&dims, 1)?,
            NodeOutput::scalar(4),
            NodeOutput::scalar(4),
        ];

        let base = self.append(op, padding, inputs, &out32)?;
        let old_min = NodeInput::new(base, 1);
        let old_max = NodeInput::new(base, 2);
        let mut prev = base;
        if bias.is_bound() {
            prev = self.append(
                OpType::Add_int32,
                Padding::Na,
                &[NodeInput::new(prev, 0), bias],
                &[tensor32],
            )?
        }
        let new_min = self.quantization_min(dst)?;
        let new_max = self.quantization_max(dst)?;
        let requantized = self.append(
            OpType::Requantize_32to8,
            Padding::Na,
            &[NodeInput::new(prev, 0), old_min, old_max, new_min, new_max],
            &out8,
        )?;
        let act_inputs = (0..3)
            .map(|k| NodeInput::new(requantized, k))
            .chain(act.args)
            .collect::<Vec<_>>();
        let node = self.append(act.op, Padding::Na, &act_inputs, &out8)?;
        self.register(node, outs)
    }
}
