use serde::{Deserialize, Serialize};

/// 多字寄存器值的字节顺序
/// 两个保持寄存器 r0=(A,B) r1=(C,D) 组合为32位值时的字节排列方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Float: AB CD, Int32: AB CD（大端）
    Abcd,
    /// Float: CD AB, Int32: CD AB（字交换，常见默认值）
    Cdab,
    /// Float: BA DC, Int32: BA DC（字内字节交换）
    Badc,
    /// Float: DC BA, Int32: DC BA（小端）
    Dcba,
}

impl Default for ByteOrder {
    fn default() -> Self {
        ByteOrder::Cdab
    }
}

/// 寄存器与32位值之间的转换
pub struct ByteOrderConverter;

impl ByteOrderConverter {
    fn assemble(r0: u16, r1: u16, order: ByteOrder) -> [u8; 4] {
        let [a, b] = r0.to_be_bytes();
        let [c, d] = r1.to_be_bytes();
        match order {
            ByteOrder::Abcd => [a, b, c, d],
            ByteOrder::Cdab => [c, d, a, b],
            ByteOrder::Badc => [b, a, d, c],
            ByteOrder::Dcba => [d, c, b, a],
        }
    }

    fn disassemble(bytes: [u8; 4], order: ByteOrder) -> (u16, u16) {
        let [w, x, y, z] = bytes;
        let (hi, lo) = match order {
            ByteOrder::Abcd => ([w, x], [y, z]),
            ByteOrder::Cdab => ([y, z], [w, x]),
            ByteOrder::Badc => ([x, w], [z, y]),
            ByteOrder::Dcba => ([z, y], [x, w]),
        };
        (u16::from_be_bytes(hi), u16::from_be_bytes(lo))
    }

    pub fn registers_to_float(r0: u16, r1: u16, order: ByteOrder) -> f32 {
        f32::from_be_bytes(Self::assemble(r0, r1, order))
    }

    pub fn float_to_registers(value: f32, order: ByteOrder) -> (u16, u16) {
        Self::disassemble(value.to_be_bytes(), order)
    }

    pub fn registers_to_int32(r0: u16, r1: u16, order: ByteOrder) -> i32 {
        i32::from_be_bytes(Self::assemble(r0, r1, order))
    }

    pub fn int32_to_registers(value: i32, order: ByteOrder) -> (u16, u16) {
        Self::disassemble(value.to_be_bytes(), order)
    }
}
