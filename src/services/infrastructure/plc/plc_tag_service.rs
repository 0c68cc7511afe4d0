/// PLC标签服务接口
///
/// 对握手协调器与心跳服务屏蔽底层驱动细节：
/// 按名义标签（触发、错误码、心跳、配方复合标签）进行类型化读写

use async_trait::async_trait;

use crate::models::RecipeRecord;
use crate::utils::error::{AppError, AppResult};

/// 心跳计数器的回绕模数（15位计数器）
pub const HEARTBEAT_MODULUS: u16 = 32768;

/// PLC标签读写服务
///
/// 所有操作经由实现内部的单一临界区串行化，底层驱动不可重入
#[async_trait]
pub trait PlcTagService: Send + Sync {
    /// 读取触发标签当前值，PLC不可达时返回错误
    async fn read_trigger(&self) -> AppResult<u16>;

    /// 写入触发标签
    async fn write_trigger(&self, value: u16) -> AppResult<()>;

    /// 读取配方复合标签及全部辅助标签，合并为一条记录
    ///
    /// 复合标签读取失败则整个操作失败；
    /// 单个辅助标签读取失败仅省略该键，同名辅助键覆盖配方键
    async fn read_recipe_and_extras(&self) -> AppResult<RecipeRecord>;

    /// 读取心跳标签当前值
    async fn read_heartbeat(&self) -> AppResult<u16>;

    /// 写入心跳标签
    async fn write_heartbeat(&self, value: u16) -> AppResult<()>;

    /// 心跳递增写入（32768回绕），返回写入的新值
    async fn increment_heartbeat(&self, current: u16) -> AppResult<u16> {
        let next = current.wrapping_add(1) % HEARTBEAT_MODULUS;
        self.write_heartbeat(next).await?;
        Ok(next)
    }

    /// 写入错误码标签
    async fn write_error_code(&self, code: u16) -> AppResult<()>;

    /// 最近一次操作后连接是否存活
    fn is_connected(&self) -> bool;
}

/// 解析 "40001" 形式的Modbus数据地址
///
/// 返回 (寄存器类型前缀, 协议偏移量)。
/// 类型前缀: 0 = 线圈, 1 = 离散量输入, 3 = 输入寄存器, 4 = 保持寄存器。
/// 用户地址从1开始，协议地址从0开始。
pub fn parse_modbus_address(address_str: &str) -> AppResult<(char, u16)> {
    if address_str.is_empty() {
        return Err(AppError::plc_communication_error("地址不能为空"));
    }
    let mut chars = address_str.chars();
    let first_char = chars
        .next()
        .ok_or_else(|| AppError::plc_communication_error("地址不能为空"))?;
    let offset_str = chars.as_str();

    let offset = offset_str.parse::<u16>().map_err(|_| {
        AppError::plc_communication_error(format!("无效的地址偏移量: {}", offset_str))
    })?;

    if offset == 0 {
        return Err(AppError::plc_communication_error(
            "Modbus地址偏移量通常从1开始",
        ));
    }

    let final_offset = offset - 1;

    match first_char {
        '0' | '1' | '3' | '4' => Ok((first_char, final_offset)),
        _ => Err(AppError::plc_communication_error(format!(
            "不支持的地址类型前缀 '{}' in '{}'. 请使用 0 (线圈), 1 (离散量输入), 3 (输入寄存器), 或 4 (保持寄存器).",
            first_char, address_str
        ))),
    }
}

/// 从寄存器字序列解码ASCII字符串（每字高低两个字节），去除NUL填充
pub fn registers_to_string(registers: &[u16]) -> String {
    let mut bytes = Vec::with_capacity(registers.len() * 2);
    for word in registers {
        bytes.push((word >> 8) as u8);
        bytes.push((word & 0xFF) as u8);
    }
    String::from_utf8_lossy(&bytes)
        .trim_end_matches(['\0', ' '])
        .to_string()
}
