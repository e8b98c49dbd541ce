//! 测试用的 SPIR-V 汇编器，用来手工构造最小的 module

use rustc_hash::FxHashMap;
use spirv::{AddressingModel, Capability, Decoration, Dim, ExecutionMode, ExecutionModel, MemoryModel, Op, StorageClass};

fn encode_string(s: &str) -> Vec<u32> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes.chunks(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

fn inst(out: &mut Vec<u32>, opcode: Op, operands: &[u32]) {
    out.push((((operands.len() + 1) as u32) << 16) | opcode as u32);
    out.extend_from_slice(operands);
}

pub(crate) struct SpirvAssembler {
    next_id: u32,
    entry_points: Vec<u32>,
    execution_modes: Vec<u32>,
    debug: Vec<u32>,
    annotations: Vec<u32>,
    globals: Vec<u32>,
    functions: Vec<u32>,

    uint_type: Option<u32>,
    void_type: Option<u32>,
    /// pointer 类型 -> 指向的类型
    pointees: FxHashMap<u32, u32>,
    /// 变量 -> (指向的类型, storage class)
    variables: FxHashMap<u32, (u32, StorageClass)>,
}
impl SpirvAssembler {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            entry_points: vec![],
            execution_modes: vec![],
            debug: vec![],
            annotations: vec![],
            globals: vec![],
            functions: vec![],
            uint_type: None,
            void_type: None,
            pointees: FxHashMap::default(),
            variables: FxHashMap::default(),
        }
    }

    /// 分配一个没有任何声明的 id
    pub fn fresh_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn name(&mut self, id: u32, name: &str) {
        let mut operands = vec![id];
        operands.extend(encode_string(name));
        inst(&mut self.debug, Op::Name, &operands);
    }

    pub fn member_name(&mut self, struct_id: u32, member: u32, name: &str) {
        let mut operands = vec![struct_id, member];
        operands.extend(encode_string(name));
        inst(&mut self.debug, Op::MemberName, &operands);
    }

    pub fn decorate(&mut self, id: u32, decoration: Decoration, literal: Option<u32>) {
        let mut operands = vec![id, decoration as u32];
        operands.extend(literal);
        inst(&mut self.annotations, Op::Decorate, &operands);
    }

    pub fn member_decorate(&mut self, struct_id: u32, member: u32, decoration: Decoration, literal: Option<u32>) {
        let mut operands = vec![struct_id, member, decoration as u32];
        operands.extend(literal);
        inst(&mut self.annotations, Op::MemberDecorate, &operands);
    }

    fn type_with(&mut self, opcode: Op, args: &[u32]) -> u32 {
        let id = self.fresh_id();
        let mut operands = vec![id];
        operands.extend_from_slice(args);
        inst(&mut self.globals, opcode, &operands);
        id
    }

    pub fn type_void(&mut self) -> u32 {
        if let Some(id) = self.void_type {
            return id;
        }
        let id = self.type_with(Op::TypeVoid, &[]);
        self.void_type = Some(id);
        id
    }

    pub fn type_float(&mut self, width: u32) -> u32 {
        self.type_with(Op::TypeFloat, &[width])
    }

    pub fn type_int(&mut self, width: u32, signed: bool) -> u32 {
        self.type_with(Op::TypeInt, &[width, signed as u32])
    }

    pub fn type_vector(&mut self, component: u32, count: u32) -> u32 {
        self.type_with(Op::TypeVector, &[component, count])
    }

    pub fn type_matrix(&mut self, column: u32, columns: u32) -> u32 {
        self.type_with(Op::TypeMatrix, &[column, columns])
    }

    /// format 固定为 Unknown，不使用多重采样
    pub fn type_image(&mut self, sampled_type: u32, dim: Dim, depth: u32, arrayed: bool, sampled: u32) -> u32 {
        self.type_with(Op::TypeImage, &[sampled_type, dim as u32, depth, arrayed as u32, 0, sampled, 0])
    }

    pub fn type_sampled_image(&mut self, image: u32) -> u32 {
        self.type_with(Op::TypeSampledImage, &[image])
    }

    pub fn constant_u32(&mut self, value: u32) -> u32 {
        let uint = match self.uint_type {
            Some(id) => id,
            None => {
                let id = self.type_int(32, false);
                self.uint_type = Some(id);
                id
            }
        };
        let id = self.fresh_id();
        inst(&mut self.globals, Op::Constant, &[uint, id, value]);
        id
    }

    pub fn type_array(&mut self, element: u32, length: u32) -> u32 {
        let length_id = self.constant_u32(length);
        self.type_with(Op::TypeArray, &[element, length_id])
    }

    pub fn type_runtime_array(&mut self, element: u32) -> u32 {
        self.type_with(Op::TypeRuntimeArray, &[element])
    }

    pub fn type_struct(&mut self, members: &[u32], name: &str) -> u32 {
        let id = self.type_with(Op::TypeStruct, members);
        self.name(id, name);
        id
    }

    pub fn type_pointer(&mut self, storage_class: StorageClass, pointee: u32) -> u32 {
        let id = self.type_with(Op::TypePointer, &[storage_class as u32, pointee]);
        self.pointees.insert(id, pointee);
        id
    }

    pub fn variable(&mut self, pointer_type: u32, storage_class: StorageClass, name: &str) -> u32 {
        let id = self.fresh_id();
        inst(&mut self.globals, Op::Variable, &[pointer_type, id, storage_class as u32]);
        self.name(id, name);
        let pointee = self.pointees.get(&pointer_type).copied().unwrap_or(pointer_type);
        self.variables.insert(id, (pointee, storage_class));
        id
    }

    /// 生成 fragment entry point `main`，依次 load 给定的变量；返回函数 id
    pub fn function_using(&mut self, ids: &[u32]) -> u32 {
        self.function_with(ids, &[])
    }

    /// 同 [`Self::function_using`]，`extra` 中的指令原样放在第一个 block 的开头
    pub fn function_with(&mut self, ids: &[u32], extra: &[(Op, Vec<u32>)]) -> u32 {
        let void = self.type_void();
        let fn_type = self.type_with(Op::TypeFunction, &[void]);
        let function = self.fresh_id();
        let label = self.fresh_id();

        let mut body = vec![];
        inst(&mut body, Op::Function, &[void, function, 0, fn_type]);
        inst(&mut body, Op::Label, &[label]);
        for (opcode, operands) in extra {
            inst(&mut body, *opcode, operands);
        }
        let mut interface = vec![];
        for &id in ids {
            let (pointee, storage_class) = self.variables.get(&id).copied().unwrap_or((void, StorageClass::Private));
            if matches!(storage_class, StorageClass::Input | StorageClass::Output) {
                interface.push(id);
            }
            let result = self.fresh_id();
            inst(&mut body, Op::Load, &[pointee, result, id]);
        }
        inst(&mut body, Op::Return, &[]);
        inst(&mut body, Op::FunctionEnd, &[]);
        self.functions.extend(body);

        let mut operands = vec![ExecutionModel::Fragment as u32, function];
        operands.extend(encode_string("main"));
        operands.extend(interface);
        inst(&mut self.entry_points, Op::EntryPoint, &operands);
        inst(&mut self.execution_modes, Op::ExecutionMode, &[function, ExecutionMode::OriginUpperLeft as u32]);

        function
    }

    pub fn finish(self) -> Vec<u32> {
        let mut words = vec![spirv::MAGIC_NUMBER, 0x0001_0000, 0, self.next_id, 0];
        inst(&mut words, Op::Capability, &[Capability::Shader as u32]);
        inst(&mut words, Op::MemoryModel, &[AddressingModel::Logical as u32, MemoryModel::GLSL450 as u32]);
        words.extend(self.entry_points);
        words.extend(self.execution_modes);
        words.extend(self.debug);
        words.extend(self.annotations);
        words.extend(self.globals);
        words.extend(self.functions);
        words
    }
}
