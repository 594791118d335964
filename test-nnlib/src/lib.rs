mod exec;

use itertools::Itertools;
use nnlib::{
    GraphId, NnError, NnLib, NnResult, NodeInput, NodeOutput, OpType, Padding, TensorDef,
};
use patricia_tree::PatriciaMap;
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, HashSet},
    fmt::Write,
};

/// 内存中的运行时替身，记录所有节点并解释执行一部分浮点节点。
#[derive(Default)]
#[repr(transparent)]
pub struct TestNnLib(RefCell<Internal>);

/// 图中的一个节点，常量节点的类型为 `OP_Const`。
#[derive(Clone, PartialEq, Debug)]
pub struct Node {
    pub id: u32,
    pub op: OpType,
    pub padding: Padding,
    pub inputs: Vec<NodeInput>,
    pub outputs: Vec<NodeOutput>,
    pub data: Vec<u8>,
}

impl Node {
    pub fn is_const(&self) -> bool {
        self.op == OpType::Const
    }

    /// 常量数据按小端 f32 解释。
    pub fn f32s(&self) -> Vec<f32> {
        exec::f32s(&self.data)
    }

    /// 常量数据按小端 i32 解释。
    pub fn i32s(&self) -> Vec<i32> {
        self.data
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

#[derive(Default)]
struct Internal {
    next_graph: i32,
    graphs: HashMap<GraphId, Graph>,
    rejected: HashSet<OpType>,
    fail_prepare: bool,
    version: Option<i32>,
    names: PatriciaMap<u32>,
}

#[derive(Default)]
struct Graph {
    nodes: BTreeMap<u32, Node>,
    order: Vec<u32>,
    prepared: bool,
    debug_level: i32,
    log: String,
}

fn fail(call: &'static str) -> NnError {
    NnError::Status { call, status: -1 }
}

impl Internal {
    fn graph(&mut self, id: GraphId) -> NnResult<&mut Graph> {
        self.graphs.get_mut(&id).ok_or(NnError::InvalidGraph(id))
    }
}

impl Graph {
    fn append(&mut self, call: &'static str, graph: GraphId, node: Node) -> NnResult<()> {
        if self.prepared {
            println!("[nnlib:{graph}] {call} %{} after prepare", node.id);
            return Err(fail(call));
        }
        if node.id == 0 || self.nodes.contains_key(&node.id) {
            println!("[nnlib:{graph}] {call} bad node id %{}", node.id);
            return Err(fail(call));
        }
        for input in &node.inputs {
            let valid = self
                .nodes
                .get(&input.src_id)
                .is_some_and(|src| (input.output_idx as usize) < src.outputs.len());
            if !valid {
                println!("[nnlib:{graph}] {call} %{} dangling input {input}", node.id);
                return Err(fail(call));
            }
        }
        let line = format!(
            "%{} = {}[{}]({}) -> {}",
            node.id,
            node.op,
            node.padding,
            node.inputs.iter().join(", "),
            node.outputs
                .iter()
                .map(|o| format!("{:?}x{}", o.dims(), o.elementsize))
                .join(", "),
        );
        println!("[nnlib:{graph}] {line}");
        writeln!(self.log, "{line}").ok();
        self.order.push(node.id);
        self.nodes.insert(node.id, node);
        Ok(())
    }

    fn ordered(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }
}

/// 以 NUL 结尾写入，超长截断。
fn write_c_str(buf: &mut [u8], text: &str) {
    let Some(cap) = buf.len().checked_sub(1) else {
        return;
    };
    let n = text.len().min(cap);
    buf[..n].copy_from_slice(&text.as_bytes()[..n]);
    buf[n] = 0
}

impl NnLib for TestNnLib {
    fn init(&self) -> NnResult<GraphId> {
        let mut internal = self.0.borrow_mut();
        internal.next_graph += 1;
        let id = GraphId(internal.next_graph);
        internal.graphs.insert(id, Graph::default());
        println!("[nnlib:_] init -> {id}");
        Ok(id)
    }

    fn set_debug_level(&self, graph: GraphId, level: i32) -> NnResult<()> {
        self.0.borrow_mut().graph(graph)?.debug_level = level;
        Ok(())
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
        let mut internal = self.0.borrow_mut();
        if internal.rejected.contains(&op) {
            println!("[nnlib:{graph}] reject {op}");
            return Err(fail("append_node"));
        }
        internal.graph(graph)?.append(
            "append_node",
            graph,
            Node {
                id: node,
                op,
                padding,
                inputs: inputs.to_vec(),
                outputs: outputs.to_vec(),
                data: Vec::new(),
            },
        )
    }

    fn append_const_node(
        &self,
        graph: GraphId,
        node: u32,
        dims: [u32; 4],
        data: &[u8],
    ) -> NnResult<()> {
        let n = dims.iter().product::<u32>() as usize;
        let elementsize = if n > 0 && data.len() % n == 0 {
            (data.len() / n) as u32
        } else {
            1
        };
        let output = NodeOutput::new(&dims, elementsize)?;
        self.0.borrow_mut().graph(graph)?.append(
            "append_const_node",
            graph,
            Node {
                id: node,
                op: OpType::Const,
                padding: Padding::Na,
                inputs: Vec::new(),
                outputs: vec![output],
                data: data.to_vec(),
            },
        )
    }

    fn prepare(&self, graph: GraphId) -> NnResult<()> {
        let mut internal = self.0.borrow_mut();
        let fail_prepare = internal.fail_prepare;
        let g = internal.graph(graph)?;
        if fail_prepare || g.prepared {
            println!("[nnlib:{graph}] prepare failed");
            return Err(fail("prepare"));
        }
        g.prepared = true;
        println!("[nnlib:{graph}] prepare {} nodes", g.order.len());
        Ok(())
    }

    fn execute(
        &self,
        graph: GraphId,
        inputs: &[TensorDef],
        outputs: &mut [TensorDef],
    ) -> NnResult<()> {
        let mut internal = self.0.borrow_mut();
        let g = internal.graph(graph)?;
        if !g.prepared {
            println!("[nnlib:{graph}] execute before prepare");
            return Err(fail("execute_new"));
        }
        let nodes = g.ordered().cloned().collect::<Vec<_>>();
        match exec::run(&nodes, inputs, outputs) {
            Ok(()) => {
                println!("[nnlib:{graph}] execute ok");
                writeln!(g.log, "execute ok").ok();
                Ok(())
            }
            Err(reason) => {
                println!("[nnlib:{graph}] execute failed: {reason}");
                writeln!(g.log, "execute failed: {reason}").ok();
                Err(fail("execute_new"))
            }
        }
    }

    fn teardown(&self, graph: GraphId) -> NnResult<()> {
        let mut internal = self.0.borrow_mut();
        internal
            .graphs
            .remove(&graph)
            .ok_or(NnError::InvalidGraph(graph))?;
        println!("[nnlib:_] teardown {graph}");
        Ok(())
    }

    fn getlog(&self, graph: GraphId, buf: &mut [u8]) -> NnResult<()> {
        let mut internal = self.0.borrow_mut();
        let g = internal.graph(graph)?;
        let text = format!("debug level {}\n{}", g.debug_level, g.log);
        write_c_str(buf, &text);
        Ok(())
    }

    fn snpprint(&self, graph: GraphId, buf: &mut [u8]) -> NnResult<()> {
        let mut internal = self.0.borrow_mut();
        let g = internal.graph(graph)?;
        let text = g
            .ordered()
            .map(|node| format!("%{} {} <- [{}]", node.id, node.op, node.inputs.iter().join(" ")))
            .join("\n");
        write_c_str(buf, &text);
        Ok(())
    }

    fn version(&self) -> NnResult<i32> {
        Ok(self.0.borrow().version.unwrap_or(nnlib::EXPECTED_VERSION))
    }

    fn op_name_to_id(&self, name: &str) -> NnResult<u32> {
        let mut internal = self.0.borrow_mut();
        if internal.names.is_empty() {
            for op in OpType::ALL {
                internal.names.insert(op.name(), op.id());
            }
        }
        internal
            .names
            .get(name)
            .copied()
            .ok_or_else(|| NnError::OpName(name.into()))
    }
}

impl TestNnLib {
    /// 此后追加 `op` 类型的节点都会失败。
    pub fn reject(&self, op: OpType) {
        self.0.borrow_mut().rejected.insert(op);
    }

    pub fn accept_all(&self) {
        self.0.borrow_mut().rejected.clear()
    }

    pub fn fail_prepare(&self, fail: bool) {
        self.0.borrow_mut().fail_prepare = fail
    }

    pub fn set_version(&self, version: i32) {
        self.0.borrow_mut().version = Some(version)
    }

    /// 尚未销毁的图。
    pub fn live_graphs(&self) -> Vec<GraphId> {
        let mut ans = self.0.borrow().graphs.keys().copied().collect::<Vec<_>>();
        ans.sort_by_key(|g| g.0);
        ans
    }

    pub fn is_prepared(&self, graph: GraphId) -> bool {
        self.0
            .borrow()
            .graphs
            .get(&graph)
            .is_some_and(|g| g.prepared)
    }

    /// 按追加顺序列出图中的节点。
    pub fn nodes(&self, graph: GraphId) -> Vec<Node> {
        self.0
            .borrow()
            .graphs
            .get(&graph)
            .map(|g| g.ordered().cloned().collect())
            .unwrap_or_default()
    }

    /// 按追加顺序列出图中的计算节点。
    pub fn ops(&self, graph: GraphId) -> Vec<Node> {
        self.nodes(graph)
            .into_iter()
            .filter(|node| !node.is_const())
            .collect()
    }

    /// 按追加顺序列出图中的常量节点。
    pub fn consts(&self, graph: GraphId) -> Vec<Node> {
        self.nodes(graph)
            .into_iter()
            .filter(Node::is_const)
            .collect()
    }

    pub fn node(&self, graph: GraphId, id: u32) -> Option<Node> {
        self.0
            .borrow()
            .graphs
            .get(&graph)
            .and_then(|g| g.nodes.get(&id).cloned())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_record() {
        let lib = TestNnLib::default();
        let g = lib.init().unwrap();
        assert_eq!(lib.live_graphs(), [g]);

        let out = NodeOutput::new(&[2], 4).unwrap();
        lib.append_node(g, 1, OpType::INPUT, Padding::Na, &[], &[out])
            .unwrap();
        lib.append_const_node(g, 2, [1, 1, 1, 2], &[0; 8]).unwrap();
        lib.append_node(
            g,
            3,
            OpType::Add_f,
            Padding::Na,
            &[NodeInput::new(1, 0), NodeInput::new(2, 0)],
            &[out],
        )
        .unwrap();

        // 悬空输入、重复编号和 0 号节点
        let dangling = [NodeInput::new(1, 1)];
        assert!(lib.append_node(g, 4, OpType::Nop, Padding::Na, &dangling, &[out]).is_err());
        assert!(lib.append_node(g, 3, OpType::Nop, Padding::Na, &[], &[out]).is_err());
        assert!(lib.append_node(g, 0, OpType::Nop, Padding::Na, &[], &[out]).is_err());
        let unbound = [NodeInput::default()];
        assert!(lib.append_node(g, 5, OpType::Nop, Padding::Na, &unbound, &[out]).is_err());

        let nodes = lib.nodes(g);
        assert_eq!(nodes.len(), 3);
        assert!(nodes[1].is_const());
        assert_eq!(nodes[1].outputs[0].elementsize, 4);
        assert_eq!(lib.ops(g).len(), 2);
        assert_eq!(lib.node(g, 3).unwrap().op, OpType::Add_f);

        let mut buf = [0u8; 256];
        lib.snpprint(g, &mut buf).unwrap();
        assert!(nnlib::c_str(&buf).contains("%3 OP_Add_f <- [%1:0 %2:0]"));

        lib.teardown(g).unwrap();
        assert!(lib.live_graphs().is_empty());
        assert_eq!(lib.teardown(g), Err(NnError::InvalidGraph(g)));
    }

    #[test]
    fn test_failure_injection() {
        let lib = TestNnLib::default();
        let g = lib.init().unwrap();
        lib.reject(OpType::Nop);
        assert!(lib.append_node(g, 1, OpType::Nop, Padding::Na, &[], &[]).is_err());
        lib.accept_all();
        lib.append_node(g, 1, OpType::Nop, Padding::Na, &[], &[]).unwrap();

        lib.fail_prepare(true);
        assert!(lib.prepare(g).is_err());
        lib.fail_prepare(false);
        lib.prepare(g).unwrap();
        assert!(lib.is_prepared(g));
        assert!(lib.append_node(g, 2, OpType::Nop, Padding::Na, &[], &[]).is_err());
    }

    #[test]
    fn test_version() {
        let lib = TestNnLib::default();
        assert!(nnlib::is_available(&lib));
        lib.set_version(91);
        assert!(!nnlib::is_available(&lib));
        assert_eq!(lib.op_name_to_id("OP_Add_f"), Ok(OpType::Add_f.id()));
        assert!(lib.op_name_to_id("OP_Bogus").is_err());
    }

    #[test]
    fn test_c_str_truncate() {
        let mut buf = [0xffu8; 4];
        write_c_str(&mut buf, "abcdef");
        assert_eq!(buf, *b"abc\0");
    }
}
