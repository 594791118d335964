use crate::{
    CompileState, HvxError, Model, ModelBuilder, Operand, OperandType, OperationType, Request,
    RequestArgument, from_bytes, to_bytes,
};
use nnlib::{NodeInput, OpType, Padding};
use test_nnlib::{Node, TestNnLib};

fn float(dims: impl Into<Vec<u32>>) -> Operand {
    Operand::new(OperandType::TensorFloat32, dims)
}

fn find(nodes: &[Node], op: OpType) -> &Node {
    nodes.iter().find(|node| node.op == op).unwrap()
}

#[test]
fn test_add() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let a = builder.input(float([1, 2, 2, 1]));
    let b = builder.input(float([1, 2, 2, 1]));
    let act = builder.scalar_i32(0);
    let y = builder.output(float([1, 2, 2, 1]));
    builder.operation(OperationType::Add, &[a, b, act], &[y]);
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    assert_eq!(model.supported_operations(), [true]);
    model.compile().unwrap();
    let g = model.graph();
    let ops = lib.ops(g).into_iter().map(|n| n.op).collect::<Vec<_>>();
    assert_eq!(ops, [OpType::INPUT, OpType::Add_f, OpType::Nop, OpType::OUTPUT]);
    assert!(lib.consts(g).is_empty());

    let nodes = lib.nodes(g);
    assert_eq!(nodes[1].inputs, [NodeInput::new(1, 0), NodeInput::new(1, 1)]);
    assert_eq!(nodes[3].inputs, [NodeInput::new(3, 0)]);

    let mut data = to_bytes(&[1f32, 2., 3., 4., 5., 6., 7., 8.]);
    data.resize(48, 0);
    let mut pools = vec![data];
    let request = Request {
        inputs: vec![RequestArgument::new(0, 0, 16), RequestArgument::new(0, 16, 16)],
        outputs: vec![RequestArgument::new(0, 32, 16)],
    };
    let shapes = model.execute(&request, &mut pools).unwrap();
    assert_eq!(shapes[0].length, 16);
    assert_eq!(from_bytes::<f32>(&pools[0][32..]), [6., 8., 10., 12.]);
}

#[test]
fn test_unsupported() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let x = builder.input(float([1, 4]));
    let y = builder.output(float([1, 4]));
    builder.operation(OperationType::Lstm, &[x], &[y]);
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    assert_eq!(model.supported_operations(), [false]);
    assert_eq!(
        model.compile(),
        Err(HvxError::Unsupported(OperationType::Lstm))
    );
}

#[test]
fn test_recover_after_failure() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let x = builder.input(float([1, 3, 3, 2]));
    let w = builder.temporary(float([2, 1, 1, 2]));
    let b = builder.constant(float([2]), &[0f32, 0.]);
    let params = [2, 1, 1, 0].map(|v| builder.scalar_i32(v));
    let y = builder.output(float([1, 3, 3, 2]));
    builder.operation(OperationType::Conv2d, &[&[x, w, b][..], &params].concat(), &[y]);
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    let old = model.graph();
    assert_eq!(
        model.compile(),
        Err(HvxError::NotConstant {
            op: OperationType::Conv2d,
            operand: w,
        })
    );
    assert_eq!(model.state(), CompileState::Failed);
    assert_ne!(model.graph(), old);
    assert_eq!(lib.live_graphs(), [model.graph()]);

    model.set_constant(w, to_bytes(&[1f32, 2., 3., 4.])).unwrap();
    model.compile().unwrap();
    assert_eq!(model.state(), CompileState::Prepared);

    let nodes = lib.nodes(model.graph());
    let conv = find(&nodes, OpType::Conv2d_f);
    assert_eq!(conv.padding, Padding::Valid);
    let filter = lib.node(model.graph(), conv.inputs[1].src_id).unwrap();
    assert_eq!(filter.outputs[0].dims(), [1, 1, 2, 2]);
    assert_eq!(filter.f32s(), [1., 3., 2., 4.]);
    assert_eq!(find(&nodes, OpType::BiasAdd_f).inputs[0], NodeInput::new(conv.id, 0));
}

#[test]
fn test_reshape_mismatch() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let x = builder.input(float([2, 3]));
    let shape = builder.constant(Operand::new(OperandType::TensorInt32, [2]), &[4i32, 2]);
    let y = builder.output(float([4, 2]));
    builder.operation(OperationType::Reshape, &[x, shape], &[y]);
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    assert!(matches!(model.compile(), Err(HvxError::Shape { .. })));
    assert!(lib.nodes(model.graph()).is_empty());
}

#[test]
fn test_reshape() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let x = builder.input(float([2, 3]));
    let shape = builder.constant(Operand::new(OperandType::TensorInt32, [2]), &[3i32, -1]);
    let y = builder.output(float([0, 0]));
    builder.operation(OperationType::Reshape, &[x, shape], &[y]);
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    model.compile().unwrap();
    assert_eq!(model.shape(y).unwrap().dimensions, [3, 2]);

    let mut pools = vec![to_bytes(&[0f32, 1., 2., 3., 4., 5.]), vec![0; 24]];
    let request = Request {
        inputs: vec![RequestArgument::new(0, 0, 24)],
        outputs: vec![RequestArgument::new(1, 0, 24)],
    };
    let shapes = model.execute(&request, &mut pools).unwrap();
    assert_eq!(shapes[0].dimensions, [1, 1, 3, 2]);
    assert_eq!(from_bytes::<f32>(&pools[1]), [0., 1., 2., 3., 4., 5.]);
}

#[test]
fn test_fully_connected() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let x = builder.input(float([1, 3]));
    let w = builder.constant(float([2, 3]), &[1f32, 0., 1., 0., 1., 0.]);
    let b = builder.constant(float([2]), &[0.5f32, -10.]);
    let act = builder.scalar_i32(1);
    let y = builder.output(float([1, 2]));
    builder.operation(OperationType::FullyConnected, &[x, w, b, act], &[y]);
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    let mut pools = vec![to_bytes(&[1f32, 2., 3.]), vec![0; 8]];
    let request = Request {
        inputs: vec![RequestArgument::new(0, 0, 12)],
        outputs: vec![RequestArgument::new(1, 0, 8)],
    };
    let shapes = model.execute(&request, &mut pools).unwrap();
    assert_eq!(shapes[0].dimensions, [1, 1, 1, 2]);
    assert_eq!(from_bytes::<f32>(&pools[1]), [4.5, 0.]);

    let ops = lib.ops(model.graph()).into_iter().map(|n| n.op).collect::<Vec<_>>();
    assert_eq!(
        ops,
        [
            OpType::INPUT,
            OpType::MatMul_f,
            OpType::BiasAdd_f,
            OpType::Relu_f,
            OpType::OUTPUT
        ]
    );
}

#[test]
fn test_fused_activations() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let x = builder.input(float([4]));
    let relu1 = builder.scalar_i32(2);
    let relu6 = builder.scalar_i32(3);
    let t = builder.temporary(float([4]));
    let y = builder.output(float([4]));
    builder
        .operation(OperationType::Mul, &[x, x, relu6], &[t])
        .operation(OperationType::Add, &[t, x, relu1], &[y]);
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    let mut pools = vec![to_bytes(&[-3f32, 0.5, 2., 3.]), vec![0; 16]];
    let request = Request {
        inputs: vec![RequestArgument::new(0, 0, 16)],
        outputs: vec![RequestArgument::new(1, 0, 16)],
    };
    model.execute(&request, &mut pools).unwrap();
    // relu1(min(x * x, 6) + x)
    assert_eq!(from_bytes::<f32>(&pools[1]), [1., 0.75, 1., 1.]);

    let nodes = lib.nodes(model.graph());
    let clamp = find(&nodes, OpType::Clamp_f);
    let bounds = clamp.inputs[1..]
        .iter()
        .map(|i| lib.node(model.graph(), i.src_id).unwrap().f32s()[0])
        .collect::<Vec<_>>();
    assert_eq!(bounds, [-1., 1.]);
    let relux = find(&nodes, OpType::ReluX_f);
    assert_eq!(lib.node(model.graph(), relux.inputs[1].src_id).unwrap().f32s(), [6.]);
}

#[test]
fn test_quant8_add() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let a = builder.input(Operand::quant8([1, 2, 2, 1], 0.5, 0));
    let b = builder.input(Operand::quant8([1, 2, 2, 1], 0.5, 0));
    let act = builder.scalar_i32(0);
    let y = builder.output(Operand::quant8([1, 2, 2, 1], 1., 128));
    builder.operation(OperationType::Add, &[a, b, act], &[y]);
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    model.compile().unwrap();
    let g = model.graph();
    let nodes = lib.nodes(g);
    let ops = lib.ops(g).into_iter().map(|n| n.op).collect::<Vec<_>>();
    assert_eq!(
        ops,
        [
            OpType::INPUT,
            OpType::QuantizedAdd_8p8to32,
            OpType::Requantize_32to8,
            OpType::Nop,
            OpType::OUTPUT
        ]
    );

    let add = find(&nodes, OpType::QuantizedAdd_8p8to32);
    assert_eq!(add.inputs.len(), 6);
    assert_eq!(add.inputs[0], NodeInput::new(1, 0));
    assert_eq!(add.inputs[3], NodeInput::new(1, 1));
    let value = |i: &NodeInput| lib.node(g, i.src_id).unwrap().f32s();
    assert_eq!(value(&add.inputs[1]), [0.]);
    assert_eq!(value(&add.inputs[2]), [127.5]);
    assert_eq!(add.outputs[0].elementsize, 4);

    let requantize = find(&nodes, OpType::Requantize_32to8);
    assert_eq!(requantize.inputs[0], NodeInput::new(add.id, 0));
    assert_eq!(requantize.inputs[1], NodeInput::new(add.id, 1));
    assert_eq!(requantize.inputs[2], NodeInput::new(add.id, 2));
    assert_eq!(value(&requantize.inputs[3]), [-128.]);
    assert_eq!(value(&requantize.inputs[4]), [127.]);
    assert_eq!(requantize.outputs[0].elementsize, 1);

    let nop = find(&nodes, OpType::Nop);
    assert_eq!(
        nop.inputs,
        (0..3).map(|k| NodeInput::new(requantize.id, k)).collect::<Vec<_>>()
    );
    assert_eq!(find(&nodes, OpType::OUTPUT).inputs, [NodeInput::new(nop.id, 0)]);
}

#[test]
fn test_quant8_chain() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let x = builder.input(Operand::quant8([1, 4], 0.5, 0));
    let t = builder.temporary(Operand::quant8([1, 4], 0.5, 0));
    let y = builder.output(float([1, 4]));
    builder
        .operation(OperationType::Relu, &[x], &[t])
        .operation(OperationType::Dequantize, &[t], &[y]);
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    model.compile().unwrap();
    let nodes = lib.nodes(model.graph());
    let relu = find(&nodes, OpType::QuantizedRelu_8);
    assert_eq!(relu.outputs.len(), 3);
    // 下游直接取上游节点附带的范围
    let dequantize = find(&nodes, OpType::Dequantize);
    assert_eq!(
        dequantize.inputs,
        (0..3).map(|k| NodeInput::new(relu.id, k)).collect::<Vec<_>>()
    );
}

#[test]
fn test_padding_schemes() {
    let build = |pads: [i32; 4]| {
        let mut builder = ModelBuilder::default();
        let x = builder.input(float([1, 3, 3, 1]));
        let w = builder.constant(float([1, 3, 3, 1]), &[1f32; 9]);
        let b = builder.constant(float([1]), &[0f32]);
        let params = [pads[0], pads[1], pads[2], pads[3], 1, 1, 0].map(|v| builder.scalar_i32(v));
        let y = builder.output(float([0, 0, 0, 0]));
        builder.operation(OperationType::Conv2d, &[&[x, w, b][..], &params].concat(), &[y]);
        (builder.build(), y)
    };

    let lib = TestNnLib::default();
    for (pads, padding, dims) in [
        ([1, 1, 1, 1], Padding::Same, [1, 3, 3, 1]),
        ([0, 0, 0, 0], Padding::Valid, [1, 1, 1, 1]),
    ] {
        let (desc, y) = build(pads);
        let mut model = Model::new(&lib, &desc).unwrap();
        model.compile().unwrap();
        let nodes = lib.nodes(model.graph());
        assert_eq!(find(&nodes, OpType::Conv2d_f).padding, padding);
        assert_eq!(model.shape(y).unwrap().dimensions, dims);
    }

    let (desc, _) = build([2, 0, 0, 0]);
    let mut model = Model::new(&lib, &desc).unwrap();
    assert_eq!(
        model.compile(),
        Err(HvxError::UnknownPadding {
            op: OperationType::Conv2d
        })
    );
}

#[test]
fn test_set_constant_resets() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let x = builder.input(float([2]));
    let c = builder.constant(float([2]), &[1f32, 1.]);
    let act = builder.scalar_i32(0);
    let y = builder.output(float([2]));
    builder.operation(OperationType::Mul, &[x, c, act], &[y]);
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    model.compile().unwrap();
    let old = model.graph();
    model.set_constant(c, to_bytes(&[2f32, 3.])).unwrap();
    assert_eq!(model.state(), CompileState::Unbuilt);
    assert_ne!(model.graph(), old);

    let mut pools = vec![to_bytes(&[5f32, 7.]), vec![0; 8]];
    let request = Request {
        inputs: vec![RequestArgument::new(0, 0, 8)],
        outputs: vec![RequestArgument::new(1, 0, 8)],
    };
    model.execute(&request, &mut pools).unwrap();
    assert_eq!(from_bytes::<f32>(&pools[1]), [10., 21.]);
    assert_eq!(lib.live_graphs(), [model.graph()]);
}

#[test]
fn test_quant8_conv() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let x = builder.input(Operand::quant8([1, 2, 2, 1], 0.5, 0));
    let w = builder.constant(Operand::quant8([1, 1, 1, 1], 0.25, 10), &[12u8]);
    let b = builder.constant(Operand::new(OperandType::TensorInt32, [1]), &[3i32]);
    let params = [2, 1, 1, 0].map(|v| builder.scalar_i32(v));
    let y = builder.output(Operand::quant8([1, 2, 2, 1], 1., 128));
    builder.operation(OperationType::Conv2d, &[&[x, w, b][..], &params].concat(), &[y]);
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    model.compile().unwrap();
    let g = model.graph();
    let ops = lib.ops(g).into_iter().map(|n| n.op).collect::<Vec<_>>();
    assert_eq!(
        ops,
        [
            OpType::INPUT,
            OpType::QuantizedConv2d_8x8to32,
            OpType::Add_int32,
            OpType::Requantize_32to8,
            OpType::Nop,
            OpType::OUTPUT
        ]
    );

    let nodes = lib.nodes(g);
    let value = |i: &NodeInput| lib.node(g, i.src_id).unwrap().f32s();
    let conv = find(&nodes, OpType::QuantizedConv2d_8x8to32);
    assert_eq!(conv.padding, Padding::Valid);
    assert_eq!(conv.inputs.len(), 7);
    assert_eq!(conv.inputs[0], NodeInput::new(1, 0));
    assert_eq!(lib.node(g, conv.inputs[1].src_id).unwrap().data, [12u8]);
    assert_eq!(value(&conv.inputs[2]), [0.]);
    assert_eq!(value(&conv.inputs[3]), [127.5]);
    assert_eq!(value(&conv.inputs[4]), [-2.5]);
    assert_eq!(value(&conv.inputs[5]), [61.25]);

    let bias = find(&nodes, OpType::Add_int32);
    assert_eq!(bias.inputs[0], NodeInput::new(conv.id, 0));
    assert_eq!(lib.node(g, bias.inputs[1].src_id).unwrap().i32s(), [3]);
    assert_eq!(bias.outputs[0].elementsize, 4);

    // 旧范围取自卷积节点本身，而不是偏置节点
    let requantize = find(&nodes, OpType::Requantize_32to8);
    assert_eq!(requantize.inputs[0], NodeInput::new(bias.id, 0));
    assert_eq!(requantize.inputs[1], NodeInput::new(conv.id, 1));
    assert_eq!(requantize.inputs[2], NodeInput::new(conv.id, 2));
    assert_eq!(value(&requantize.inputs[3]), [-128.]);
    assert_eq!(value(&requantize.inputs[4]), [127.]);
}

#[test]
fn test_quant8_depthwise_conv() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let x = builder.input(Operand::quant8([1, 2, 2, 2], 0.5, 0));
    let w = builder.constant(Operand::quant8([1, 1, 1, 4], 0.25, 10), &[10u8, 11, 12, 13]);
    let b = builder.no_value(OperandType::TensorInt32);
    let params = [2, 1, 1, 2, 0].map(|v| builder.scalar_i32(v));
    let y = builder.output(Operand::quant8([1, 2, 2, 4], 1., 128));
    builder.operation(
        OperationType::DepthwiseConv2d,
        &[&[x, w, b][..], &params].concat(),
        &[y],
    );
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    model.compile().unwrap();
    let g = model.graph();
    let ops = lib.ops(g).into_iter().map(|n| n.op).collect::<Vec<_>>();
    assert_eq!(
        ops,
        [
            OpType::INPUT,
            OpType::QuantizedDepthwiseConv2d_8x8to32,
            OpType::Requantize_32to8,
            OpType::Nop,
            OpType::OUTPUT
        ]
    );

    let nodes = lib.nodes(g);
    let value = |i: &NodeInput| lib.node(g, i.src_id).unwrap().f32s();
    let conv = find(&nodes, OpType::QuantizedDepthwiseConv2d_8x8to32);
    let filter = lib.node(g, conv.inputs[1].src_id).unwrap();
    assert_eq!(filter.outputs[0].dims(), [1, 1, 2, 2]);
    assert_eq!(filter.data, [10u8, 11, 12, 13]);
    // 卷积核的范围来自卷积核自己的量化参数
    assert_eq!(value(&conv.inputs[2]), [0.]);
    assert_eq!(value(&conv.inputs[3]), [127.5]);
    assert_eq!(value(&conv.inputs[4]), [-2.5]);
    assert_eq!(value(&conv.inputs[5]), [61.25]);

    // 没有偏置时直接重量化
    let requantize = find(&nodes, OpType::Requantize_32to8);
    assert_eq!(
        requantize.inputs[..3],
        [0, 1, 2].map(|k| NodeInput::new(conv.id, k))
    );
}

#[test]
fn test_quant8_logistic() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let x = builder.input(Operand::quant8([1, 4], 0.5, 0));
    let y = builder.output(Operand::quant8([1, 4], 1. / 256., 0));
    builder.operation(OperationType::Logistic, &[x], &[y]);
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    model.compile().unwrap();
    let g = model.graph();
    let nodes = lib.nodes(g);
    let sigmoid = find(&nodes, OpType::QuantizedSigmoid_8);
    let value = |i: &NodeInput| lib.node(g, i.src_id).unwrap().f32s();
    assert_eq!(sigmoid.inputs[0], NodeInput::new(1, 0));
    assert_eq!(value(&sigmoid.inputs[1]), [0.]);
    assert_eq!(value(&sigmoid.inputs[2]), [128.]);
    assert_eq!(sigmoid.outputs.len(), 3);
}

#[test]
fn test_concatenation_axis() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let a = builder.input(float([2, 3]));
    let b = builder.input(float([2, 1]));
    let axis = builder.scalar_i32(1);
    let y = builder.output(float([2, 4]));
    builder.operation(OperationType::Concatenation, &[a, b, axis], &[y]);
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    model.compile().unwrap();
    let g = model.graph();
    let nodes = lib.nodes(g);
    let concat = find(&nodes, OpType::Concat_f);
    // 2 维的第 1 轴对齐到 4 维后是第 3 轴
    assert_eq!(lib.node(g, concat.inputs[0].src_id).unwrap().i32s(), [3]);
    assert_eq!(concat.inputs[1..], [NodeInput::new(1, 0), NodeInput::new(1, 1)]);
    assert_eq!(concat.outputs[0].dims(), [1, 1, 2, 4]);
}

#[test]
fn test_lrn() {
    let lib = TestNnLib::default();
    let build = |radius: i32| {
        let mut builder = ModelBuilder::default();
        let x = builder.input(float([1, 1, 1, 3]));
        let radius = builder.scalar_i32(radius);
        let params = [1f32, 1e-4, 0.75].map(|v| builder.scalar_f32(v));
        let y = builder.output(float([1, 1, 1, 3]));
        builder.operation(
            OperationType::LocalResponseNormalization,
            &[&[x, radius][..], &params].concat(),
            &[y],
        );
        builder.build()
    };

    for (radius, n) in [(1, 3), (100, 5)] {
        let mut model = Model::new(&lib, &build(radius)).unwrap();
        model.compile().unwrap();
        let g = model.graph();
        let nodes = lib.nodes(g);
        let lrn = find(&nodes, OpType::LRN_f);
        assert_eq!(lrn.inputs.len(), 5);
        let window = lib.node(g, lrn.inputs[1].src_id).unwrap();
        assert_eq!(window.outputs[0].dims(), [1, 1, 1, n]);
        assert_eq!(window.f32s(), vec![1.; n as usize]);
        let beta = lib.node(g, lrn.inputs[4].src_id).unwrap();
        assert_eq!(beta.f32s(), [0.75]);
    }

    let mut model = Model::new(&lib, &build(-1)).unwrap();
    assert_eq!(model.supported_operations(), [false]);
    assert!(matches!(model.compile(), Err(HvxError::Shape { .. })));
}

#[test]
fn test_l2_pool_and_resize() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let x = builder.input(float([1, 4, 4, 1]));
    let pool = [2, 2, 2, 2, 2, 0].map(|v| builder.scalar_i32(v));
    let t = builder.temporary(float([1, 2, 2, 1]));
    let width = builder.scalar_i32(4);
    let height = builder.scalar_i32(3);
    let y = builder.output(float([1, 3, 4, 1]));
    builder
        .operation(OperationType::L2Pool2d, &[&[x][..], &pool].concat(), &[t])
        .operation(OperationType::ResizeBilinear, &[t, width, height], &[y]);
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    assert_eq!(model.supported_operations(), [true, true]);
    model.compile().unwrap();
    let g = model.graph();
    let nodes = lib.nodes(g);

    let l2 = find(&nodes, OpType::L2Pool_f);
    assert_eq!(l2.padding, Padding::Valid);
    assert_eq!(l2.inputs[0], NodeInput::new(1, 0));
    let dims = |i: &NodeInput| lib.node(g, i.src_id).unwrap().outputs[0].dims().to_vec();
    assert_eq!(dims(&l2.inputs[1]), [1, 2, 2, 1]);
    assert_eq!(dims(&l2.inputs[2]), [1, 2, 2, 1]);
    let nop = find(&nodes, OpType::Nop);
    assert_eq!(nop.inputs, [NodeInput::new(l2.id, 0)]);

    let resize = find(&nodes, OpType::ResizeBilinear_f);
    assert_eq!(resize.inputs[0], NodeInput::new(nop.id, 0));
    let size = lib.node(g, resize.inputs[1].src_id).unwrap();
    assert_eq!(size.i32s(), [3, 4]);
    assert_eq!(resize.outputs[0].dims(), [1, 3, 4, 1]);
}

#[test]
fn test_depthwise_multiplier_overflow() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let x = builder.input(float([1, 2, 2, 3]));
    let w = builder.constant(float([1, 1, 1, 3]), &[1f32; 3]);
    let b = builder.no_value(OperandType::TensorFloat32);
    let params = [2, 1, 1, i32::MAX, 0].map(|v| builder.scalar_i32(v));
    let y = builder.output(float([1, 2, 2, 3]));
    builder.operation(
        OperationType::DepthwiseConv2d,
        &[&[x, w, b][..], &params].concat(),
        &[y],
    );
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    assert_eq!(model.supported_operations(), [false]);
    assert!(matches!(model.compile(), Err(HvxError::Shape { .. })));
    assert_eq!(model.state(), CompileState::Failed);
}

#[test]
fn test_weights_shorter_than_shape() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let x = builder.input(float([1, 65536]));
    let w = builder.constant(float([65536, 65536]), &[0f32; 4]);
    let b = builder.no_value(OperandType::TensorFloat32);
    let act = builder.scalar_i32(0);
    let y = builder.output(float([1, 65536]));
    builder.operation(OperationType::FullyConnected, &[x, w, b, act], &[y]);
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    assert_eq!(model.supported_operations(), [false]);
    assert!(matches!(
        model.compile(),
        Err(HvxError::Data { operand, .. }) if operand == w
    ));
    assert_eq!(model.state(), CompileState::Failed);
    assert!(lib.nodes(model.graph()).is_empty());
    assert_eq!(lib.live_graphs(), [model.graph()]);
}

#[test]
fn test_rank5_activation() {
    let lib = TestNnLib::default();
    let mut builder = ModelBuilder::default();
    let x = builder.input(float([1, 1, 1, 2, 2]));
    let y = builder.output(float([1, 1, 1, 2, 2]));
    builder.operation(OperationType::Relu, &[x], &[y]);
    let mut model = Model::new(&lib, &builder.build()).unwrap();

    assert_eq!(model.supported_operations(), [false]);
    assert!(matches!(model.compile(), Err(HvxError::Shape { .. })));
}
