use glam::{Mat4, Vec4};

/// 每次 draw 都会写入的内置 uniform 数据
///
/// 布局和 shader 中的 `BuiltinUniformsPerDraw` 对应（std140，13 个 vec4）。
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BuiltinUniformData {
    pub transform_matrix: Mat4,
    pub projection_matrix: Mat4,
    /// 3x3 法线矩阵，每一行占一个 vec4
    pub normal_matrix: [Vec4; 3],
    /// (width, height, flip y, flip y offset)
    pub screen_size_params: Vec4,
    pub constant_color: Vec4,
}
impl Default for BuiltinUniformData {
    fn default() -> Self {
        Self {
            transform_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            normal_matrix: [Vec4::X, Vec4::Y, Vec4::Z],
            screen_size_params: Vec4::new(1.0, 1.0, 1.0, 0.0),
            constant_color: Vec4::ONE,
        }
    }
}
// tools
impl BuiltinUniformData {
    pub const SIZE: usize = size_of::<Self>();

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_data_layout() {
        assert_eq!(BuiltinUniformData::SIZE, 13 * 16);

        let data = BuiltinUniformData {
            constant_color: Vec4::new(0.25, 0.5, 0.75, 1.0),
            ..Default::default()
        };
        let bytes = data.as_bytes();
        // constant color 是最后一个 vec4
        let color: &[f32] = bytemuck::cast_slice(&bytes[12 * 16..]);
        assert_eq!(color, &[0.25, 0.5, 0.75, 1.0]);
    }
}
