use super::{Decoration, SpirvModule, SpirvType};

/// uniform block 中的一个叶子成员（标量、向量、矩阵或它们的数组）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockMember {
    /// 带有结构体前缀的完整名字，例如 `lights[1].color`
    pub name: String,
    pub type_id: u32,
    /// 相对于 block 起始位置的字节偏移
    pub offset: usize,
    pub size: usize,
}

impl SpirvModule {
    pub fn array_stride(&self, type_id: u32) -> Option<usize> {
        self.decoration(type_id, Decoration::ArrayStride).map(|s| s as usize)
    }

    pub fn member_offset(&self, struct_id: u32, index: u32) -> Option<usize> {
        self.member_decoration(struct_id, index, Decoration::Offset).map(|o| o as usize)
    }

    /// 按照 decoration 给出的显式布局计算类型大小
    pub fn type_size(&self, type_id: u32, matrix_stride: Option<u32>, row_major: bool) -> Option<usize> {
        let size = match self.ty(type_id)? {
            SpirvType::Bool => 4,
            SpirvType::Int { width, .. } | SpirvType::Float { width } => *width as usize / 8,
            SpirvType::Vector { component, count } => self.type_size(*component, None, false)? * *count as usize,
            SpirvType::Matrix { column, columns } => {
                let SpirvType::Vector { component, count: rows } = self.ty(*column)? else {
                    return None;
                };
                let scalar = self.type_size(*component, None, false)?;
                match (matrix_stride, row_major) {
                    (Some(stride), true) => stride as usize * *rows as usize,
                    (Some(stride), false) => stride as usize * *columns as usize,
                    (None, _) => scalar * *rows as usize * *columns as usize,
                }
            }
            SpirvType::Array { element, .. } => {
                let length = self.array_length(type_id)? as usize;
                let stride = match self.array_stride(type_id) {
                    Some(stride) => stride,
                    None => self.type_size(*element, matrix_stride, row_major)?,
                };
                stride * length
            }
            SpirvType::RuntimeArray { .. } => 0,
            SpirvType::Struct { .. } => self.declared_struct_size(type_id)?,
            _ => return None,
        };
        Some(size)
    }

    pub fn declared_struct_member_size(&self, struct_id: u32, index: u32) -> Option<usize> {
        let SpirvType::Struct { members } = self.ty(struct_id)? else {
            return None;
        };
        let member_type = *members.get(index as usize)?;
        let matrix_stride = self.member_decoration(struct_id, index, Decoration::MatrixStride);
        let row_major = self.has_member_decoration(struct_id, index, Decoration::RowMajor);
        self.type_size(member_type, matrix_stride, row_major)
    }

    /// 最后一个成员的 offset + size；运行时数组不计入大小
    pub fn declared_struct_size(&self, struct_id: u32) -> Option<usize> {
        let SpirvType::Struct { members } = self.ty(struct_id)? else {
            return None;
        };
        let Some(last) = members.len().checked_sub(1) else {
            return Some(0);
        };
        let last = last as u32;
        Some(self.member_offset(struct_id, last)? + self.declared_struct_member_size(struct_id, last)?)
    }

    /// 递归展开 block 的成员，结构体和结构体数组会按元素展开
    pub fn flatten_block_members(&self, struct_id: u32) -> Vec<BlockMember> {
        let mut out = vec![];
        self.flatten_into(struct_id, 0, "", &mut out);
        out
    }

    fn flatten_into(&self, struct_id: u32, base_offset: usize, prefix: &str, out: &mut Vec<BlockMember>) {
        let Some(SpirvType::Struct { members }) = self.ty(struct_id) else {
            return;
        };

        for (index, &member_type) in members.iter().enumerate() {
            let index = index as u32;
            let offset = base_offset + self.member_offset(struct_id, index).unwrap_or(0);
            let name = format!("{prefix}{}", self.member_name(struct_id, index).unwrap_or_default());
            let base_type = self.strip_arrays(member_type);

            if let Some(SpirvType::Struct { .. }) = self.ty(base_type) {
                match self.array_length(member_type) {
                    Some(length) => {
                        let stride = self.array_stride(member_type).unwrap_or(0);
                        for i in 0..length as usize {
                            self.flatten_into(base_type, offset + i * stride, &format!("{name}[{i}]."), out);
                        }
                    }
                    None => self.flatten_into(base_type, offset, &format!("{name}."), out),
                }
                continue;
            }

            if self.scalar_kind(member_type).is_none() {
                continue;
            }
            out.push(BlockMember {
                name,
                type_id: member_type,
                offset,
                size: self.declared_struct_member_size(struct_id, index).unwrap_or(0),
            });
        }
    }

    /// 输入输出变量占用的 location 数量：数组长度 × 矩阵列数
    pub fn location_count(&self, type_id: u32) -> u32 {
        let length = self.array_length(type_id).unwrap_or(1);
        match self.ty(self.strip_arrays(type_id)) {
            Some(SpirvType::Matrix { columns, .. }) => length * columns,
            _ => length,
        }
    }
}
