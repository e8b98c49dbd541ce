//! SPIR-V 读取器
//!
//! 只解析反射需要的部分：名字、类型、常量、decoration（包括 literal 在二进制中的位置）、
//! 全局变量和 entry point。资源是否被使用交给 spirq 判断，见 [`SpirvModule::active_resource_ids`]。

mod active;
mod layout;
mod resources;

#[cfg(test)]
pub(crate) mod assembler;

pub use layout::BlockMember;
pub use resources::{Resource, ShaderResources};
pub use spirv::{Decoration, Dim, ExecutionModel, Op, StorageClass};

use rustc_hash::FxHashMap;

const HEADER_WORDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpirvError {
    #[error("module is too short to contain a header")]
    MissingHeader,
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),
    #[error("truncated instruction at word {0}")]
    Truncated(usize),
    #[error("malformed {what} at word {offset}")]
    Malformed { what: &'static str, offset: usize },
    #[error("reflection failed: {0}")]
    Reflect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpirvType {
    Void,
    Bool,
    Int { width: u32, signed: bool },
    Float { width: u32 },
    Vector { component: u32, count: u32 },
    Matrix { column: u32, columns: u32 },
    Image { sampled_type: u32, dim: Dim, depth: u32, arrayed: bool, sampled: u32 },
    Sampler,
    SampledImage { image: u32 },
    Array { element: u32, length_id: u32 },
    RuntimeArray { element: u32 },
    Struct { members: Vec<u32> },
    Pointer { storage_class: StorageClass, pointee: u32 },
    Function,
}

/// 标量的基础类型
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    Int,
    Uint,
    Float,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct DecorationEntry {
    decoration: u32,
    /// 第一个 literal 参数
    literal: Option<u32>,
    /// 第一个 literal 参数在整个 module 中的 word 下标，用于直接修改二进制
    literal_offset: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    pub id: u32,
    pub pointer_type: u32,
    pub pointee_type: u32,
    pub storage_class: StorageClass,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPoint {
    pub execution_model: ExecutionModel,
    pub function_id: u32,
    pub name: String,
    pub interface: Vec<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct SpirvModule {
    words: Vec<u32>,

    names: FxHashMap<u32, String>,
    member_names: FxHashMap<(u32, u32), String>,
    types: FxHashMap<u32, SpirvType>,
    constants: FxHashMap<u32, u32>,
    decorations: FxHashMap<u32, Vec<DecorationEntry>>,
    member_decorations: FxHashMap<(u32, u32), Vec<DecorationEntry>>,
    /// 全局变量，按声明顺序
    variables: Vec<Variable>,
    entry_points: Vec<EntryPoint>,
}

/// 解码 literal string：UTF-8，以 nul 结尾，按 word 填充
fn decode_string(words: &[u32]) -> (String, usize) {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for (i, word) in words.iter().enumerate() {
        for byte in word.to_le_bytes() {
            if byte == 0 {
                return (String::from_utf8_lossy(&bytes).into_owned(), i + 1);
            }
            bytes.push(byte);
        }
    }
    (String::from_utf8_lossy(&bytes).into_owned(), words.len())
}

// new & init
impl SpirvModule {
    pub fn parse(words: Vec<u32>) -> Result<Self, SpirvError> {
        if words.len() < HEADER_WORDS {
            return Err(SpirvError::MissingHeader);
        }
        if words[0] != spirv::MAGIC_NUMBER {
            return Err(SpirvError::BadMagic(words[0]));
        }

        let mut module = Self::default();
        let mut in_function = false;
        let mut offset = HEADER_WORDS;

        while offset < words.len() {
            let word_count = (words[offset] >> 16) as usize;
            if word_count == 0 || offset + word_count > words.len() {
                return Err(SpirvError::Truncated(offset));
            }
            let operands = &words[offset + 1..offset + word_count];
            let malformed = |what| SpirvError::Malformed { what, offset };

            // 不认识的 opcode（例如更新版本的扩展指令）直接跳过
            let Some(opcode) = Op::from_u32(words[offset] & 0xffff) else {
                offset += word_count;
                continue;
            };

            match opcode {
                Op::Function => in_function = true,
                Op::FunctionEnd => in_function = false,
                // 函数体中的局部变量不是 shader 接口
                _ if in_function => {}
                Op::Name => {
                    let (&target, rest) = operands.split_first().ok_or(malformed("OpName"))?;
                    module.names.insert(target, decode_string(rest).0);
                }
                Op::MemberName => {
                    if operands.len() < 2 {
                        return Err(malformed("OpMemberName"));
                    }
                    module.member_names.insert((operands[0], operands[1]), decode_string(&operands[2..]).0);
                }
                Op::EntryPoint => {
                    if operands.len() < 3 {
                        return Err(malformed("OpEntryPoint"));
                    }
                    let execution_model =
                        ExecutionModel::from_u32(operands[0]).ok_or(malformed("OpEntryPoint execution model"))?;
                    let (name, name_words) = decode_string(&operands[2..]);
                    module.entry_points.push(EntryPoint {
                        execution_model,
                        function_id: operands[1],
                        name,
                        interface: operands[2 + name_words..].to_vec(),
                    });
                }
                Op::Decorate => {
                    if operands.len() < 2 {
                        return Err(malformed("OpDecorate"));
                    }
                    module.decorations.entry(operands[0]).or_default().push(DecorationEntry {
                        decoration: operands[1],
                        literal: operands.get(2).copied(),
                        literal_offset: (operands.len() > 2).then_some(offset + 3),
                    });
                }
                Op::MemberDecorate => {
                    if operands.len() < 3 {
                        return Err(malformed("OpMemberDecorate"));
                    }
                    module.member_decorations.entry((operands[0], operands[1])).or_default().push(DecorationEntry {
                        decoration: operands[2],
                        literal: operands.get(3).copied(),
                        literal_offset: (operands.len() > 3).then_some(offset + 4),
                    });
                }
                Op::Constant | Op::SpecConstant => {
                    if operands.len() < 3 {
                        return Err(malformed("OpConstant"));
                    }
                    module.constants.insert(operands[1], operands[2]);
                }
                Op::Variable => {
                    if operands.len() < 3 {
                        return Err(malformed("OpVariable"));
                    }
                    let pointee_type = match module.types.get(&operands[0]) {
                        Some(SpirvType::Pointer { pointee, .. }) => *pointee,
                        _ => return Err(malformed("OpVariable pointer type")),
                    };
                    let storage_class =
                        StorageClass::from_u32(operands[2]).ok_or(malformed("OpVariable storage class"))?;
                    module.variables.push(Variable {
                        id: operands[1],
                        pointer_type: operands[0],
                        pointee_type,
                        storage_class,
                    });
                }
                _ => {
                    if let Some((id, ty)) = Self::parse_type(opcode, operands).ok_or(malformed("type declaration"))? {
                        module.types.insert(id, ty);
                    }
                }
            }

            offset += word_count;
        }

        module.words = words;
        Ok(module)
    }

    /// 外层 None 表示操作数不足，内层 None 表示不是类型声明或者是不关心的类型
    fn parse_type(opcode: Op, operands: &[u32]) -> Option<Option<(u32, SpirvType)>> {
        let arg = |i: usize| operands.get(i).copied();
        let ty = match opcode {
            Op::TypeVoid => SpirvType::Void,
            Op::TypeBool => SpirvType::Bool,
            Op::TypeInt => SpirvType::Int {
                width: arg(1)?,
                signed: arg(2)? != 0,
            },
            Op::TypeFloat => SpirvType::Float { width: arg(1)? },
            Op::TypeVector => SpirvType::Vector {
                component: arg(1)?,
                count: arg(2)?,
            },
            Op::TypeMatrix => SpirvType::Matrix {
                column: arg(1)?,
                columns: arg(2)?,
            },
            Op::TypeImage => SpirvType::Image {
                sampled_type: arg(1)?,
                dim: Dim::from_u32(arg(2)?)?,
                depth: arg(3)?,
                arrayed: arg(4)? != 0,
                sampled: arg(6)?,
            },
            Op::TypeSampler => SpirvType::Sampler,
            Op::TypeSampledImage => SpirvType::SampledImage { image: arg(1)? },
            Op::TypeArray => SpirvType::Array {
                element: arg(1)?,
                length_id: arg(2)?,
            },
            Op::TypeRuntimeArray => SpirvType::RuntimeArray { element: arg(1)? },
            Op::TypeStruct => SpirvType::Struct {
                members: operands.get(1..)?.to_vec(),
            },
            Op::TypePointer => SpirvType::Pointer {
                storage_class: StorageClass::from_u32(arg(1)?)?,
                pointee: arg(2)?,
            },
            Op::TypeFunction => SpirvType::Function,
            _ => return Some(None),
        };
        Some(Some((arg(0)?, ty)))
    }
}
// getters
impl SpirvModule {
    #[inline]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    #[inline]
    pub fn into_words(self) -> Vec<u32> {
        self.words
    }

    #[inline]
    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(&id).map(String::as_str).filter(|name| !name.is_empty())
    }

    #[inline]
    pub fn member_name(&self, struct_id: u32, index: u32) -> Option<&str> {
        self.member_names.get(&(struct_id, index)).map(String::as_str)
    }

    #[inline]
    pub fn ty(&self, id: u32) -> Option<&SpirvType> {
        self.types.get(&id)
    }

    #[inline]
    pub fn constant(&self, id: u32) -> Option<u32> {
        self.constants.get(&id).copied()
    }

    #[inline]
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    #[inline]
    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    fn find_decoration(&self, id: u32, decoration: Decoration) -> Option<&DecorationEntry> {
        self.decorations.get(&id)?.iter().find(|d| d.decoration == decoration as u32)
    }

    fn find_member_decoration(&self, struct_id: u32, member: u32, decoration: Decoration) -> Option<&DecorationEntry> {
        self.member_decorations.get(&(struct_id, member))?.iter().find(|d| d.decoration == decoration as u32)
    }

    #[inline]
    pub fn has_decoration(&self, id: u32, decoration: Decoration) -> bool {
        self.find_decoration(id, decoration).is_some()
    }

    #[inline]
    pub fn decoration(&self, id: u32, decoration: Decoration) -> Option<u32> {
        self.find_decoration(id, decoration)?.literal
    }

    /// decoration literal 在二进制中的 word 下标
    #[inline]
    pub fn decoration_word_offset(&self, id: u32, decoration: Decoration) -> Option<usize> {
        self.find_decoration(id, decoration)?.literal_offset
    }

    #[inline]
    pub fn has_member_decoration(&self, struct_id: u32, member: u32, decoration: Decoration) -> bool {
        self.find_member_decoration(struct_id, member, decoration).is_some()
    }

    #[inline]
    pub fn member_decoration(&self, struct_id: u32, member: u32, decoration: Decoration) -> Option<u32> {
        self.find_member_decoration(struct_id, member, decoration)?.literal
    }

    /// 数组长度；运行时数组和非数组返回 None
    pub fn array_length(&self, type_id: u32) -> Option<u32> {
        match self.ty(type_id)? {
            SpirvType::Array { length_id, .. } => self.constant(*length_id),
            _ => None,
        }
    }

    /// 去掉所有数组维度之后的类型
    pub fn strip_arrays(&self, mut type_id: u32) -> u32 {
        while let Some(SpirvType::Array { element, .. } | SpirvType::RuntimeArray { element }) = self.ty(type_id) {
            type_id = *element;
        }
        type_id
    }

    /// 向量、矩阵、数组的标量基础类型
    pub fn scalar_kind(&self, type_id: u32) -> Option<ScalarKind> {
        match self.ty(self.strip_arrays(type_id))? {
            SpirvType::Bool => Some(ScalarKind::Bool),
            SpirvType::Int { signed: true, .. } => Some(ScalarKind::Int),
            SpirvType::Int { signed: false, .. } => Some(ScalarKind::Uint),
            SpirvType::Float { .. } => Some(ScalarKind::Float),
            SpirvType::Vector { component, .. } => self.scalar_kind(*component),
            SpirvType::Matrix { column, .. } => self.scalar_kind(*column),
            _ => None,
        }
    }
}
// tools
impl SpirvModule {
    /// 修改某个 decoration 的 literal，同时更新二进制
    pub fn set_decoration(&mut self, id: u32, decoration: Decoration, value: u32) -> Option<()> {
        let entry = self.decorations.get_mut(&id)?.iter_mut().find(|d| d.decoration == decoration as u32)?;
        let offset = entry.literal_offset?;
        entry.literal = Some(value);
        self.words[offset] = value;
        Some(())
    }
}
