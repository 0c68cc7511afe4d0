// modbus_plc_service.rs
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tokio_modbus::client::Context as ModbusClientContext;
use tokio_modbus::prelude::*; // for tcp::connect_slave and Slave

use async_trait::async_trait;

use super::plc_tag_service::{parse_modbus_address, registers_to_string, PlcTagService};
use crate::models::{RecipeRecord, TagValue};
use crate::utils::byte_order::ByteOrderConverter;
use crate::utils::config::{PlcConfig, PlcDataType, RecipeFieldConfig};
use crate::utils::error::{AppError, AppResult};

/// Modbus TCP PLC标签服务
///
/// 驱动句柄由单一互斥锁保护，所有读写串行通过该临界区；
/// 任何操作失败即丢弃连接，下次调用时在连接超时内惰性重连
pub struct ModbusPlcService {
    config: PlcConfig,
    client_context: Arc<Mutex<Option<ModbusClientContext>>>,
    connected: AtomicBool,
}

impl ModbusPlcService {
    pub fn new(config: PlcConfig) -> Self {
        Self {
            config,
            client_context: Arc::new(Mutex::new(None)),
            connected: AtomicBool::new(false),
        }
    }

    fn get_socket_addr(&self) -> AppResult<SocketAddr> {
        format!("{}:{}", self.config.ip, self.config.port)
            .parse::<SocketAddr>()
            .map_err(|e| AppError::ConfigurationError {
                message: format!("无效的IP地址或端口: {}", e),
            })
    }

    fn get_slave(&self) -> Slave {
        Slave(self.config.slave_id)
    }

    /// 建立新的Modbus TCP连接，受配置的连接超时约束
    async fn open_context(&self) -> AppResult<ModbusClientContext> {
        let socket_addr = self.get_socket_addr()?;
        let slave = self.get_slave();

        match tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            tokio_modbus::client::tcp::connect_slave(socket_addr, slave),
        )
        .await
        {
            Ok(Ok(ctx)) => {
                log::info!("已连接到PLC {}", socket_addr);
                Ok(ctx)
            }
            Ok(Err(e)) => Err(AppError::plc_communication_error(format!(
                "Modbus连接失败: {}",
                e
            ))),
            Err(_timeout_err) => Err(AppError::plc_communication_error("Modbus连接超时")),
        }
    }

    /// 确保临界区内持有活跃连接，必要时重连
    async fn ensure_connected_locked(
        &self,
        guard: &mut Option<ModbusClientContext>,
    ) -> AppResult<()> {
        if guard.is_none() {
            match self.open_context().await {
                Ok(ctx) => {
                    *guard = Some(ctx);
                    self.connected.store(true, Ordering::SeqCst);
                }
                Err(e) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// 连接失效时丢弃上下文，下次调用重连
    fn mark_dead(&self, guard: &mut Option<ModbusClientContext>) {
        *guard = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    /// 读取寄存器（保持寄存器或输入寄存器）
    async fn read_registers(&self, kind: char, offset: u16, count: u16) -> AppResult<Vec<u16>> {
        let mut guard = self.client_context.lock().await;
        self.ensure_connected_locked(&mut guard).await?;
        let ctx = guard
            .as_mut()
            .ok_or_else(|| AppError::plc_communication_error("未连接"))?;

        let modbus_io_result = match kind {
            '4' => ctx.read_holding_registers(offset, count).await,
            '3' => ctx.read_input_registers(offset, count).await,
            _ => {
                return Err(AppError::plc_communication_error(format!(
                    "地址类型 '{}' 不是有效的寄存器 (保持或输入) 地址",
                    kind
                )))
            }
        };

        match modbus_io_result {
            Ok(modbus_protocol_result) => match modbus_protocol_result {
                Ok(values) => {
                    self.connected.store(true, Ordering::SeqCst);
                    Ok(values)
                }
                Err(e_code) => Err(AppError::plc_communication_error(format!(
                    "Modbus协议错误 (读取寄存器): {:?}",
                    e_code
                ))),
            },
            Err(io_err) => {
                self.mark_dead(&mut guard);
                Err(AppError::plc_communication_error(format!(
                    "Modbus IO错误 (读取寄存器): {}",
                    io_err
                )))
            }
        }
    }

    /// 读取线圈或离散量输入
    async fn read_bits(&self, kind: char, offset: u16, count: u16) -> AppResult<Vec<bool>> {
        let mut guard = self.client_context.lock().await;
        self.ensure_connected_locked(&mut guard).await?;
        let ctx = guard
            .as_mut()
            .ok_or_else(|| AppError::plc_communication_error("未连接"))?;

        let modbus_io_result = match kind {
            '0' => ctx.read_coils(offset, count).await,
            '1' => ctx.read_discrete_inputs(offset, count).await,
            _ => {
                return Err(AppError::plc_communication_error(format!(
                    "地址类型 '{}' 不是有效的布尔型 (线圈或离散量输入) 地址",
                    kind
                )))
            }
        };

        match modbus_io_result {
            Ok(modbus_protocol_result) => match modbus_protocol_result {
                Ok(values) => {
                    self.connected.store(true, Ordering::SeqCst);
                    Ok(values)
                }
                Err(e_code) => Err(AppError::plc_communication_error(format!(
                    "Modbus协议错误 (读取布尔值): {:?}",
                    e_code
                ))),
            },
            Err(io_err) => {
                self.mark_dead(&mut guard);
                Err(AppError::plc_communication_error(format!(
                    "Modbus IO错误 (读取布尔值): {}",
                    io_err
                )))
            }
        }
    }

    /// 写入单个保持寄存器
    async fn write_register(&self, address: &str, value: u16) -> AppResult<()> {
        let (kind, offset) = parse_modbus_address(address)?;
        if kind != '4' {
            return Err(AppError::plc_communication_error(format!(
                "地址 {} 不是有效的可写保持寄存器地址",
                address
            )));
        }

        let mut guard = self.client_context.lock().await;
        self.ensure_connected_locked(&mut guard).await?;
        let ctx = guard
            .as_mut()
            .ok_or_else(|| AppError::plc_communication_error("未连接"))?;

        let modbus_io_result = ctx.write_single_register(offset, value).await;

        match modbus_io_result {
            Ok(modbus_protocol_result) => match modbus_protocol_result {
                Ok(_) => {
                    self.connected.store(true, Ordering::SeqCst);
                    Ok(())
                }
                Err(e_code) => Err(AppError::plc_communication_error(format!(
                    "Modbus协议错误 (写入u16): {:?}",
                    e_code
                ))),
            },
            Err(io_err) => {
                self.mark_dead(&mut guard);
                Err(AppError::plc_communication_error(format!(
                    "Modbus IO错误 (写入u16): {}",
                    io_err
                )))
            }
        }
    }

    /// 读取单个寄存器值
    async fn read_single_register(&self, address: &str) -> AppResult<u16> {
        let (kind, offset) = parse_modbus_address(address)?;
        let values = self.read_registers(kind, offset, 1).await?;
        values
            .first()
            .copied()
            .ok_or_else(|| AppError::plc_communication_error("读取寄存器时返回为空"))
    }

    /// 字段占用的寄存器字数
    fn field_words(field: &RecipeFieldConfig) -> u16 {
        match field.data_type {
            PlcDataType::Bool | PlcDataType::Int16 => 1,
            PlcDataType::Int32 | PlcDataType::Float32 => 2,
            PlcDataType::Text => field.length.unwrap_or(1),
        }
    }

    /// 按字段定义从寄存器块中解码值
    fn decode_field(&self, field: &RecipeFieldConfig, words: &[u16]) -> AppResult<TagValue> {
        let byte_order = self.config.byte_order;
        match field.data_type {
            PlcDataType::Bool => Ok(TagValue::Bool(words[0] != 0)),
            PlcDataType::Int16 => Ok(TagValue::Int(words[0] as i16 as i64)),
            PlcDataType::Int32 => Ok(TagValue::Int(
                ByteOrderConverter::registers_to_int32(words[0], words[1], byte_order) as i64,
            )),
            PlcDataType::Float32 => Ok(TagValue::Float(
                ByteOrderConverter::registers_to_float(words[0], words[1], byte_order) as f64,
            )),
            PlcDataType::Text => Ok(TagValue::Text(registers_to_string(words))),
        }
    }

    /// 读取任意标量标签（辅助标签用）
    async fn read_scalar_tag(
        &self,
        address: &str,
        data_type: PlcDataType,
        length: Option<u16>,
    ) -> AppResult<TagValue> {
        let (kind, offset) = parse_modbus_address(address)?;
        let byte_order = self.config.byte_order;

        match data_type {
            PlcDataType::Bool => {
                if kind == '0' || kind == '1' {
                    let values = self.read_bits(kind, offset, 1).await?;
                    let value = values.first().copied().ok_or_else(|| {
                        AppError::plc_communication_error("读取布尔值时返回为空")
                    })?;
                    Ok(TagValue::Bool(value))
                } else {
                    let values = self.read_registers(kind, offset, 1).await?;
                    let value = values.first().copied().ok_or_else(|| {
                        AppError::plc_communication_error("读取布尔值时返回为空")
                    })?;
                    Ok(TagValue::Bool(value != 0))
                }
            }
            PlcDataType::Int16 => {
                let values = self.read_registers(kind, offset, 1).await?;
                let value = values
                    .first()
                    .copied()
                    .ok_or_else(|| AppError::plc_communication_error("读取u16时返回为空"))?;
                Ok(TagValue::Int(value as i16 as i64))
            }
            PlcDataType::Int32 => {
                let values = self.read_registers(kind, offset, 2).await?;
                if values.len() < 2 {
                    return Err(AppError::plc_communication_error(
                        "读取i32时返回的寄存器数量不足",
                    ));
                }
                Ok(TagValue::Int(ByteOrderConverter::registers_to_int32(
                    values[0], values[1], byte_order,
                ) as i64))
            }
            PlcDataType::Float32 => {
                let values = self.read_registers(kind, offset, 2).await?;
                if values.len() < 2 {
                    return Err(AppError::plc_communication_error(
                        "读取f32时返回的寄存器数量不足",
                    ));
                }
                Ok(TagValue::Float(ByteOrderConverter::registers_to_float(
                    values[0], values[1], byte_order,
                ) as f64))
            }
            PlcDataType::Text => {
                let words = length.unwrap_or(1);
                let values = self.read_registers(kind, offset, words).await?;
                Ok(TagValue::Text(registers_to_string(&values)))
            }
        }
    }

    /// 一次块读取配方复合标签并逐字段解码
    async fn read_recipe(&self) -> AppResult<RecipeRecord> {
        let fields = &self.config.recipe.fields;
        if fields.is_empty() {
            return Ok(RecipeRecord::new());
        }

        let (kind, base) = parse_modbus_address(&self.config.recipe.base_address)?;
        let total_words = fields
            .iter()
            .map(|f| f.offset + Self::field_words(f))
            .max()
            .unwrap_or(0);

        let registers = self.read_registers(kind, base, total_words).await?;

        let mut record = RecipeRecord::new();
        for field in fields {
            let start = field.offset as usize;
            let words = Self::field_words(field) as usize;
            let slice = registers.get(start..start + words).ok_or_else(|| {
                AppError::plc_communication_error(format!(
                    "配方字段 {} 超出读取块范围",
                    field.name
                ))
            })?;
            record.insert(field.name.clone(), self.decode_field(field, slice)?);
        }
        Ok(record)
    }

    /// 逐个读取辅助标签与槽位名称，失败的标签仅记录日志并省略
    async fn read_extra_tags(&self) -> RecipeRecord {
        let mut extras = RecipeRecord::new();

        for tag in &self.config.extra_tags {
            match self
                .read_scalar_tag(&tag.address, tag.data_type, None)
                .await
            {
                Ok(value) => extras.insert(tag.name.clone(), value),
                Err(e) => log::warn!("读取辅助标签 {} 失败: {}", tag.name, e),
            }
        }

        for slot in &self.config.slot_names {
            match self
                .read_scalar_tag(&slot.address, PlcDataType::Text, Some(slot.length))
                .await
            {
                Ok(value) => extras.insert(slot.name.clone(), value),
                Err(e) => log::warn!("读取槽位名称 {} 失败: {}", slot.name, e),
            }
        }

        extras
    }
}

#[async_trait]
impl PlcTagService for ModbusPlcService {
    async fn read_trigger(&self) -> AppResult<u16> {
        self.read_single_register(&self.config.trigger_tag).await
    }

    async fn write_trigger(&self, value: u16) -> AppResult<()> {
        self.write_register(&self.config.trigger_tag, value).await
    }

    async fn read_recipe_and_extras(&self) -> AppResult<RecipeRecord> {
        let mut record = self.read_recipe().await?;
        let extras = self.read_extra_tags().await;
        record.merge(extras);
        Ok(record)
    }

    async fn read_heartbeat(&self) -> AppResult<u16> {
        self.read_single_register(&self.config.heartbeat_tag).await
    }

    async fn write_heartbeat(&self, value: u16) -> AppResult<()> {
        self.write_register(&self.config.heartbeat_tag, value).await
    }

    async fn write_error_code(&self, code: u16) -> AppResult<()> {
        self.write_register(&self.config.error_code_tag, code).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
